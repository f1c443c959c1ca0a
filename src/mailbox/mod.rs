//! Process-local, in-memory inter-agent mailbox (§4.4).
//!
//! Recipient names are resolved through the agent registry's alias table
//! before a [`MailboxEntry`] is stored, so lookups by canonical id are exact
//! from then on. An empty `to_agent` is treated as the literal `"user"`
//! inbox — the source left this implicit; §9's open question asks for it to
//! be made explicit, so `Mailbox::send` does that normalization itself
//! rather than leaving it to callers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agents::AgentRegistry;

/// Canonical inbox name used whenever `to_agent` is empty or unresolved.
pub const USER_INBOX: &str = "user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailStatus {
    Unread,
    Read,
    Archived,
}

/// Fields a caller supplies to [`Mailbox::send`]; everything else
/// (`message_id`, `thread_id`, `status`, `timestamp`) is assigned by the
/// mailbox itself.
#[derive(Debug, Clone, Default)]
pub struct NewMail {
    pub from_agent: String,
    pub to_agent: String,
    pub subject: String,
    pub body: String,
    pub priority: Priority,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxEntry {
    pub message_id: String,
    pub thread_id: String,
    pub from_agent: String,
    /// Empty in the wire representation means "the user"; stored entries
    /// always carry the resolved, non-empty recipient (§9 open question).
    pub to_agent: String,
    pub subject: String,
    pub body: String,
    pub priority: Priority,
    pub status: MailStatus,
    pub reply_to: Option<String>,
    pub metadata: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("no such message: {0}")]
    NotFound(String),
}

/// Process-local message store. Cheap to clone (wraps an `Arc<Mutex<..>>>`):
/// a single instance is shared process-wide, same as the tool registry.
#[derive(Clone)]
pub struct Mailbox {
    inner: Arc<Mutex<Inner>>,
    agent_registry: Arc<AgentRegistry>,
}

#[derive(Default)]
struct Inner {
    messages: HashMap<String, MailboxEntry>,
    /// Insertion order per recipient, newest last, so `list_all` and `check`
    /// can return messages in arrival order without re-sorting a full scan.
    by_recipient: HashMap<String, Vec<String>>,
}

impl Mailbox {
    /// Recipient names are resolved through `agent_registry`'s alias table
    /// (§4.4) so that `"Debbie"`, `"debbie"`, `"d"`, `"agent d"` all land in
    /// the same inbox; an empty or unresolved name routes to [`USER_INBOX`].
    pub fn new(agent_registry: Arc<AgentRegistry>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            agent_registry,
        }
    }

    fn resolve_recipient(&self, to_agent: &str) -> String {
        let trimmed = to_agent.trim();
        if trimmed.is_empty() {
            return USER_INBOX.to_string();
        }
        self.agent_registry.resolve_alias(trimmed).unwrap_or_else(|_| USER_INBOX.to_string())
    }

    fn insert(&self, mut entry: MailboxEntry) -> String {
        let id = entry.message_id.clone();
        entry.to_agent = self.resolve_recipient(&entry.to_agent);
        let mut inner = self.inner.lock().expect("mailbox lock poisoned");
        inner
            .by_recipient
            .entry(entry.to_agent.clone())
            .or_default()
            .push(id.clone());
        inner.messages.insert(id.clone(), entry);
        id
    }

    /// File a brand-new message. Allocates a fresh `thread_id`.
    pub fn send(&self, mail: NewMail) -> String {
        let id = Uuid::new_v4().to_string();
        let entry = MailboxEntry {
            message_id: id.clone(),
            thread_id: Uuid::new_v4().to_string(),
            from_agent: mail.from_agent,
            to_agent: self.resolve_recipient(&mail.to_agent),
            subject: mail.subject,
            body: mail.body,
            priority: mail.priority,
            status: MailStatus::Unread,
            reply_to: None,
            metadata: mail.metadata,
            timestamp: Utc::now(),
        };
        self.insert(entry)
    }

    /// File a reply to `original_id`, inheriting its `thread_id` and setting
    /// `reply_to`.
    pub fn reply(&self, original_id: &str, mail: NewMail) -> Result<String, MailboxError> {
        let thread_id = {
            let inner = self.inner.lock().expect("mailbox lock poisoned");
            inner
                .messages
                .get(original_id)
                .map(|m| m.thread_id.clone())
                .ok_or_else(|| MailboxError::NotFound(original_id.to_string()))?
        };
        let id = Uuid::new_v4().to_string();
        let entry = MailboxEntry {
            message_id: id.clone(),
            thread_id,
            from_agent: mail.from_agent,
            to_agent: self.resolve_recipient(&mail.to_agent),
            subject: mail.subject,
            body: mail.body,
            priority: mail.priority,
            status: MailStatus::Unread,
            reply_to: Some(original_id.to_string()),
            metadata: mail.metadata,
            timestamp: Utc::now(),
        };
        Ok(self.insert(entry))
    }

    /// Return every unread message for `recipient` and mark them `read`.
    pub fn check(&self, recipient: &str) -> Vec<MailboxEntry> {
        let recipient = self.resolve_recipient(recipient);
        let mut inner = self.inner.lock().expect("mailbox lock poisoned");
        let ids = inner.by_recipient.get(&recipient).cloned().unwrap_or_default();
        let mut unread = Vec::new();
        for id in ids {
            if let Some(entry) = inner.messages.get_mut(&id) {
                if entry.status == MailStatus::Unread {
                    entry.status = MailStatus::Read;
                    unread.push(entry.clone());
                }
            }
        }
        unread
    }

    pub fn list_all(&self, recipient: &str, include_read: bool, include_archived: bool) -> Vec<MailboxEntry> {
        let recipient = self.resolve_recipient(recipient);
        let inner = self.inner.lock().expect("mailbox lock poisoned");
        let ids = inner.by_recipient.get(&recipient).cloned().unwrap_or_default();
        ids.into_iter()
            .filter_map(|id| inner.messages.get(&id).cloned())
            .filter(|m| match m.status {
                MailStatus::Unread => true,
                MailStatus::Read => include_read,
                MailStatus::Archived => include_archived,
            })
            .collect()
    }

    pub fn unread_count(&self, recipient: &str) -> usize {
        let recipient = self.resolve_recipient(recipient);
        let inner = self.inner.lock().expect("mailbox lock poisoned");
        inner
            .by_recipient
            .get(&recipient)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.messages.get(id))
                    .filter(|m| m.status == MailStatus::Unread)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn get(&self, id: &str) -> Option<MailboxEntry> {
        self.inner.lock().expect("mailbox lock poisoned").messages.get(id).cloned()
    }

    /// Move a message to `archived`, the terminal status.
    pub fn archive(&self, id: &str) -> Result<(), MailboxError> {
        let mut inner = self.inner.lock().expect("mailbox lock poisoned");
        let entry = inner
            .messages
            .get_mut(id)
            .ok_or_else(|| MailboxError::NotFound(id.to_string()))?;
        entry.status = MailStatus::Archived;
        Ok(())
    }
}
