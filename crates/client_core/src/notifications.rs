use std::{
    collections::VecDeque,
    sync::{Arc, PoisonError, RwLock},
};

use chrono::Utc;
use serde_json::Value;
use shared::protocol::{frame_kind, is_notification_kind, is_truthy, FrameObject};

use crate::types::NotificationRecord;

/// The sibling notification list that receives realtime mirrors.
pub trait NotificationSink: Send + Sync {
    /// Inserts at the head; the list is most-recent-first.
    fn push_front(&self, record: NotificationRecord);
}

#[derive(Debug, Default)]
pub struct NotificationList {
    records: RwLock<VecDeque<NotificationRecord>>,
}

impl NotificationList {
    pub fn snapshot(&self) -> Vec<NotificationRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for NotificationList {
    fn push_front(&self, record: NotificationRecord) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push_front(record);
    }
}

pub struct NullNotificationSink;

impl NotificationSink for NullNotificationSink {
    fn push_front(&self, _record: NotificationRecord) {}
}

/// Mirrors whitelisted frames into the sink under temporary ids.
///
/// Temporary ids are negative so they never collide with server ids, and
/// strictly decreasing even when two frames land in the same millisecond.
pub struct NotificationBridge {
    sink: Arc<dyn NotificationSink>,
    last_temp_id: i64,
}

impl NotificationBridge {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            sink,
            last_temp_id: 0,
        }
    }

    /// Returns the mirrored record's id and kind, or `None` for frames
    /// outside the whitelist.
    pub fn mirror(&mut self, frame: &FrameObject, recipient_id: i64) -> Option<(i64, String)> {
        let kind = frame_kind(frame).filter(|kind| is_notification_kind(kind))?;
        let data = match frame.get("data") {
            Some(value) if is_truthy(value) => value.to_string(),
            _ => Value::Object(Default::default()).to_string(),
        };
        let now = Utc::now();
        let id = self.next_temp_id(now.timestamp_millis());
        let record = NotificationRecord {
            id,
            recipient_id,
            actor_id: 0,
            kind: kind.to_string(),
            data,
            is_read: false,
            created_at: now.to_rfc3339(),
        };
        let kind = record.kind.clone();
        self.sink.push_front(record);
        Some((id, kind))
    }

    fn next_temp_id(&mut self, now_millis: i64) -> i64 {
        let candidate = -now_millis;
        let id = if candidate < self.last_temp_id {
            candidate
        } else {
            self.last_temp_id - 1
        };
        self.last_temp_id = id;
        id
    }
}
