use std::collections::HashMap;

use shared::{domain::CanonicalId, protocol::HistoryRecord};

use crate::types::ChatMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationKind {
    Direct,
    Group,
}

/// Message lists per counterparty and per group. Lists keep append order
/// and are never re-sorted.
#[derive(Debug, Default)]
pub struct ConversationStore {
    direct: HashMap<CanonicalId, Vec<ChatMessage>>,
    groups: HashMap<CanonicalId, Vec<ChatMessage>>,
}

impl ConversationStore {
    fn lists(&self, kind: ConversationKind) -> &HashMap<CanonicalId, Vec<ChatMessage>> {
        match kind {
            ConversationKind::Direct => &self.direct,
            ConversationKind::Group => &self.groups,
        }
    }

    fn lists_mut(&mut self, kind: ConversationKind) -> &mut HashMap<CanonicalId, Vec<ChatMessage>> {
        match kind {
            ConversationKind::Direct => &mut self.direct,
            ConversationKind::Group => &mut self.groups,
        }
    }

    pub fn ensure(&mut self, kind: ConversationKind, id: &CanonicalId) -> &mut Vec<ChatMessage> {
        self.lists_mut(kind).entry(id.clone()).or_default()
    }

    pub fn get(&self, kind: ConversationKind, id: &CanonicalId) -> Option<&[ChatMessage]> {
        self.lists(kind).get(id).map(Vec::as_slice)
    }

    /// Appends a live message. `make` receives the list length, which seeds
    /// a synthesized id when the server did not assign one.
    pub fn append_with(
        &mut self,
        kind: ConversationKind,
        id: &CanonicalId,
        make: impl FnOnce(usize) -> ChatMessage,
    ) {
        let list = self.ensure(kind, id);
        let index = list.len();
        list.push(make(index));
    }

    /// Drops whatever was held and installs `messages`.
    pub fn replace(&mut self, kind: ConversationKind, id: &CanonicalId, messages: Vec<ChatMessage>) {
        self.lists_mut(kind).insert(id.clone(), messages);
    }

    /// Puts an older page in front. No overlap check against held messages.
    pub fn prepend(
        &mut self,
        kind: ConversationKind,
        id: &CanonicalId,
        older: Vec<ChatMessage>,
    ) -> usize {
        let added = older.len();
        let list = self.ensure(kind, id);
        let newer = std::mem::replace(list, older);
        list.extend(newer);
        added
    }

    pub fn oldest_message_id(&self, kind: ConversationKind, id: &CanonicalId) -> Option<String> {
        self.lists(kind)
            .get(id)
            .and_then(|list| list.first())
            .map(|message| message.id.clone())
    }

    pub fn clear(&mut self) {
        self.direct.clear();
        self.groups.clear();
    }
}

/// Maps a history page to display messages; `outgoing` compares the sender
/// against the current user.
pub fn messages_from_history(
    records: Vec<HistoryRecord>,
    current_user: Option<&CanonicalId>,
) -> Vec<ChatMessage> {
    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            let outgoing = current_user.is_some() && record.sender_id.as_ref() == current_user;
            ChatMessage::new(
                record.id.as_ref(),
                record.content,
                outgoing,
                record.sender_name,
                record.created_at,
                index,
            )
        })
        .collect()
}
