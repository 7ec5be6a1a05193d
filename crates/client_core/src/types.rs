use chrono::Utc;
use serde::Serialize;
use shared::domain::CanonicalId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    pub outgoing: bool,
    pub sender_name: String,
    pub timestamp: String,
}

impl ChatMessage {
    /// `index` seeds the synthesized id when the server did not assign one.
    /// An id of `0` counts as unassigned.
    pub fn new(
        id: Option<&CanonicalId>,
        content: String,
        outgoing: bool,
        sender_name: Option<String>,
        created_at: Option<String>,
        index: usize,
    ) -> Self {
        let id = match id.filter(|id| !id.is_empty() && id.as_i64() != Some(0)) {
            Some(id) => id.to_string(),
            None => synthesize_message_id(index),
        };
        Self {
            id,
            content,
            outgoing,
            sender_name: sender_name.unwrap_or_default(),
            timestamp: created_at
                .filter(|ts| !ts.is_empty())
                .unwrap_or_else(|| Utc::now().to_rfc3339()),
        }
    }
}

/// Locally unique enough for display keys; not globally unique.
pub fn synthesize_message_id(index: usize) -> String {
    format!("{}-{index}", Utc::now().timestamp_millis())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub id: CanonicalId,
    pub nickname: String,
    pub display_name: String,
    pub avatar: String,
    pub is_online: bool,
    pub unread: u32,
}

impl Contact {
    /// Entry for someone who messaged us but is not on the roster yet.
    pub fn placeholder(id: CanonicalId, name: Option<String>, unread: u32) -> Self {
        let name = name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("User {id}"));
        Self {
            id,
            nickname: name.clone(),
            display_name: name,
            avatar: String::new(),
            is_online: true,
            unread,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationRecord {
    pub id: i64,
    pub recipient_id: i64,
    pub actor_id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
    pub is_read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Queued,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    ConnectionChanged { connected: bool },
    ConversationUpdated { counterparty: CanonicalId },
    GroupConversationUpdated { group_id: CanonicalId },
    ContactsUpdated,
    ActiveContactChanged(Option<CanonicalId>),
    TypingChanged { sender_id: CanonicalId, typing: bool },
    NotificationMirrored { id: i64, kind: String },
    /// A user-facing error is waiting in the queue; pull it with `next_error`.
    ErrorQueued,
}
