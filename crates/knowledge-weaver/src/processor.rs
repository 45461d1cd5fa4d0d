//! Batch ingestion of raw chat messages.
//!
//! A batch is split into units: consecutive messages sharing a `thread_id`
//! form one thread segment, every other message stands alone. Each unit
//! becomes at most one `chat_log_derived` draft entry. A unit that fails
//! analysis or embedding is logged and skipped; the rest of the batch still
//! goes through.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use knowledge_weaver_core::models::{ChatMessage, EntryType, SourceMetadata};
use knowledge_weaver_core::{Result, WeaverError};

use crate::anonymize::anonymize;
use crate::repository::{KnowledgeRepository, NewEntry};

/// One unit that could not be turned into an entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFailure {
    pub source_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessingResult {
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<ItemFailure>,
    pub created_ids: Vec<String>,
}

/// A run of messages analyzed together.
#[derive(Debug, Clone)]
pub struct Unit {
    pub source_id: String,
    pub messages: Vec<ChatMessage>,
}

impl Unit {
    fn is_thread(&self) -> bool {
        self.messages.len() > 1
    }

    fn started_at(&self) -> DateTime<Utc> {
        self.messages
            .iter()
            .map(|m| m.timestamp)
            .min()
            .unwrap_or_else(Utc::now)
    }

    /// Text handed to the provider: the bare message, or `sender: content`
    /// lines for a thread.
    fn render(&self, scrub: bool) -> String {
        let clean = |s: &str| if scrub { anonymize(s) } else { s.to_string() };
        if self.is_thread() {
            self.messages
                .iter()
                .map(|m| format!("{}: {}", m.sender, clean(m.content.trim())))
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            self.messages
                .iter()
                .map(|m| clean(m.content.trim()))
                .collect::<String>()
        }
    }

    fn source(&self) -> SourceMetadata {
        let mut participants: Vec<String> = Vec::new();
        for m in &self.messages {
            if !participants.contains(&m.sender) {
                participants.push(m.sender.clone());
            }
        }
        SourceMetadata {
            participants,
            platform: self.messages.iter().find_map(|m| m.platform.clone()),
            source_id: Some(self.source_id.clone()),
            ..SourceMetadata::at(self.started_at())
        }
    }
}

/// Group consecutive messages with the same `thread_id`.
pub fn segment(messages: Vec<ChatMessage>) -> Vec<Unit> {
    let mut units: Vec<Unit> = Vec::new();
    for message in messages {
        if let Some(thread) = message.thread_id.clone() {
            if let Some(last) = units.last_mut() {
                let same_thread = last
                    .messages
                    .last()
                    .and_then(|m| m.thread_id.as_deref())
                    == Some(thread.as_str());
                if same_thread {
                    last.messages.push(message);
                    continue;
                }
            }
            units.push(Unit {
                source_id: thread,
                messages: vec![message],
            });
        } else {
            units.push(Unit {
                source_id: message.id.clone(),
                messages: vec![message],
            });
        }
    }
    units
}

pub struct ChatLogProcessor {
    repo: Arc<KnowledgeRepository>,
    max_batch: usize,
    anonymize: bool,
}

impl ChatLogProcessor {
    pub fn new(repo: Arc<KnowledgeRepository>, max_batch: usize, anonymize: bool) -> Self {
        Self {
            repo,
            max_batch,
            anonymize,
        }
    }

    pub async fn process(&self, messages: Vec<ChatMessage>) -> Result<ProcessingResult> {
        if messages.len() > self.max_batch {
            return Err(WeaverError::BatchTooLarge {
                size: messages.len(),
                max: self.max_batch,
            });
        }

        let total_messages = messages.len();
        let units = segment(messages);
        let mut result = ProcessingResult::default();

        for unit in units {
            let content = unit.render(self.anonymize);
            let new = NewEntry::new(content, EntryType::ChatLogDerived, unit.source());

            match self.repo.create(new).await {
                Ok(entry) => {
                    result.succeeded += 1;
                    result.created_ids.push(entry.id);
                }
                Err(e) => {
                    warn!(
                        source_id = %unit.source_id,
                        timestamp = %unit.started_at(),
                        error = %e,
                        "skipping chat log unit"
                    );
                    result.failed += 1;
                    result.failures.push(ItemFailure {
                        source_id: unit.source_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            messages = total_messages,
            succeeded = result.succeeded,
            failed = result.failed,
            "processed chat log batch"
        );
        Ok(result)
    }
}
