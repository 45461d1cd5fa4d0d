//! PII scrubbing for chat messages before they reach the provider.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

struct Rule {
    kind: &'static str,
    pattern: Regex,
    replacement: &'static str,
}

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let table: [(&str, &str, &str); 6] = [
            (
                "email",
                r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
                "[EMAIL_REDACTED]",
            ),
            ("ssn", r"\b\d{3}-\d{2}-\d{4}\b", "[SSN_REDACTED]"),
            (
                "phone",
                r"(?:\+?1[-. ]?)?\(?\b[0-9]{3}\)?[-. ]?[0-9]{3}[-. ]?[0-9]{4}\b",
                "[PHONE_REDACTED]",
            ),
            (
                "member_id",
                r"(?i)\b(participant|patient|member)(\s+ID)[:\s]+\w{5,}",
                "$1$2 [MEMBER_ID_REDACTED]",
            ),
            (
                "employee_id",
                r"(?i)\b(employee|emp|staff)(\s+ID)[:\s]+\w{5,}",
                "$1$2 [EMPLOYEE_ID_REDACTED]",
            ),
            ("generic_id", r"(?i)\bID[:\s]+[A-Z0-9]{5,}\b", "[ID_REDACTED]"),
        ];
        table
            .into_iter()
            .map(|(kind, pattern, replacement)| Rule {
                kind,
                pattern: Regex::new(pattern).expect("built-in PII pattern compiles"),
                replacement,
            })
            .collect()
    })
}

/// Replace emails, phone numbers, SSNs, and member/employee ID numbers
/// with fixed placeholders.
pub fn anonymize(text: &str) -> String {
    let mut scrubbed = text.to_string();
    for rule in rules() {
        let hits = rule.pattern.find_iter(&scrubbed).count();
        if hits > 0 {
            debug!(kind = rule.kind, hits, "redacted sensitive data");
            scrubbed = rule
                .pattern
                .replace_all(&scrubbed, rule.replacement)
                .into_owned();
        }
    }
    scrubbed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_contact_details() {
        let out = anonymize("mail jane.doe@example.com or call 555-123-4567");
        assert_eq!(out, "mail [EMAIL_REDACTED] or call [PHONE_REDACTED]");
    }

    #[test]
    fn test_redacts_ssn_before_phone() {
        assert_eq!(anonymize("ssn 123-45-6789"), "ssn [SSN_REDACTED]");
    }

    #[test]
    fn test_redacts_ids_keeping_label() {
        let out = anonymize("Patient ID: AB12345 needs a refill");
        assert_eq!(out, "Patient ID [MEMBER_ID_REDACTED] needs a refill");
        assert_eq!(anonymize("ref ID: ZX99887"), "ref [ID_REDACTED]");
    }

    #[test]
    fn test_plain_text_untouched() {
        let text = "Lunch is at noon on Fridays in room 204";
        assert_eq!(anonymize(text), text);
    }
}
