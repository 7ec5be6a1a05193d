use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::{domain::CanonicalId, error::FrameError};

/// Frame types mirrored into the notification list in addition to their
/// normal handling.
pub const NOTIFICATION_KINDS: [&str; 11] = [
    "group_invite",
    "group_invite_response",
    "group_join_request",
    "group_join_response",
    "group_event",
    "new_message",
    "group_message",
    "new_follower",
    "follow_request",
    "follow_request_accepted",
    "follow_request_declined",
];

pub fn is_notification_kind(kind: &str) -> bool {
    NOTIFICATION_KINDS.contains(&kind)
}

pub type FrameObject = Map<String, Value>;

/// Parses a raw text frame into a JSON object without interpreting it.
pub fn parse_frame_object(text: &str) -> Result<FrameObject, FrameError> {
    match serde_json::from_str::<Value>(text).map_err(FrameError::InvalidJson)? {
        Value::Object(object) => Ok(object),
        _ => Err(FrameError::NotAnObject),
    }
}

pub fn frame_kind(object: &FrameObject) -> Option<&str> {
    object.get("type").and_then(Value::as_str)
}

/// JSON truthiness: `false`, `null`, `0`, `NaN` and `""` are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Accepts a plain string or a nullable SQL column (`{"String": .., "Valid": ..}`).
pub fn timestamp_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Object(column) => {
            if !column.get("Valid").and_then(Value::as_bool).unwrap_or(false) {
                return None;
            }
            column
                .get("String")
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
                .map(str::to_owned)
        }
        _ => None,
    }
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(timestamp_from_value))
}

fn truthy<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().is_some_and(is_truthy))
}

fn numeric_when_possible<S: Serializer>(id: &CanonicalId, serializer: S) -> Result<S::Ok, S::Error> {
    match id.as_i64() {
        Some(number) => serializer.serialize_i64(number),
        None => serializer.serialize_str(id.as_str()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    UserListRequest,
    Message {
        receiver_id: CanonicalId,
        content: String,
    },
    GroupMessage {
        #[serde(serialize_with = "numeric_when_possible")]
        group_id: CanonicalId,
        content: String,
    },
    Typing {
        receiver_id: CanonicalId,
    },
    StopTyping {
        receiver_id: CanonicalId,
    },
}

impl OutboundFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserListRequest => "user_list_request",
            Self::Message { .. } => "message",
            Self::GroupMessage { .. } => "group_message",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop_typing",
        }
    }

    pub fn encode(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(FrameError::Encode)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DirectMessageFrame {
    #[serde(default)]
    pub id: Option<CanonicalId>,
    #[serde(default)]
    pub sender_id: Option<CanonicalId>,
    #[serde(default)]
    pub receiver_id: Option<CanonicalId>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GroupMessageFrame {
    #[serde(default)]
    pub id: Option<CanonicalId>,
    #[serde(default)]
    pub group_id: Option<CanonicalId>,
    #[serde(default)]
    pub sender_id: Option<CanonicalId>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TypingFrame {
    pub sender_id: CanonicalId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorFrame {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RosterUser {
    pub id: CanonicalId,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default, deserialize_with = "truthy")]
    pub is_online: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RosterFrame {
    #[serde(default)]
    pub users: Option<Vec<Value>>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterSnapshot {
    pub users: Vec<RosterUser>,
    /// Entries that did not decode as a user and were left out.
    pub skipped: usize,
}

impl RosterFrame {
    /// The inline `users` array wins; otherwise `content` carries the same
    /// array JSON-encoded. A frame with neither is an empty roster.
    pub fn into_users(self) -> Result<RosterSnapshot, FrameError> {
        let entries = match (self.users, self.content.filter(|content| !content.is_empty())) {
            (Some(users), _) => users,
            (None, Some(content)) => {
                serde_json::from_str::<Vec<Value>>(&content).map_err(FrameError::RosterContent)?
            }
            (None, None) => Vec::new(),
        };
        let total = entries.len();
        let users: Vec<RosterUser> = entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect();
        Ok(RosterSnapshot {
            skipped: total - users.len(),
            users,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    UserList(RosterFrame),
    Message(DirectMessageFrame),
    GroupMessage(GroupMessageFrame),
    Typing(TypingFrame),
    StopTyping(TypingFrame),
    Error(ErrorFrame),
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    pub fn from_object(object: FrameObject) -> Result<Self, FrameError> {
        serde_json::from_value(Value::Object(object)).map_err(FrameError::Shape)
    }
}

/// One row of a paginated history response (direct or group).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryRecord {
    #[serde(default)]
    pub id: Option<CanonicalId>,
    #[serde(default)]
    pub sender_id: Option<CanonicalId>,
    #[serde(default)]
    pub receiver_id: Option<CanonicalId>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<String>,
}
