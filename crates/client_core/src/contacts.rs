use std::collections::HashMap;

use shared::{domain::CanonicalId, protocol::RosterUser};
use url::Url;

use crate::types::Contact;

/// Roster mirror plus the active selection.
#[derive(Debug, Default)]
pub struct ContactDirectory {
    contacts: Vec<Contact>,
    active: Option<CanonicalId>,
    asset_base: Option<Url>,
}

impl ContactDirectory {
    /// `asset_base` resolves relative avatar paths to absolute URLs.
    pub fn new(asset_base: Option<Url>) -> Self {
        Self {
            contacts: Vec::new(),
            active: None,
            asset_base,
        }
    }

    /// Replaces the whole list with `users`, carrying unread counts over by
    /// id. Returns the contact that should become active, if the selection
    /// needs to move.
    pub fn apply_snapshot(&mut self, users: Vec<RosterUser>) -> Option<CanonicalId> {
        let carried: HashMap<CanonicalId, u32> = self
            .contacts
            .drain(..)
            .map(|contact| (contact.id, contact.unread))
            .collect();

        self.contacts = users
            .into_iter()
            .map(|user| {
                let unread = carried.get(&user.id).copied().unwrap_or(0);
                self.contact_from_roster(user, unread)
            })
            .collect();

        if let Some(active) = &self.active {
            if self.contains(active) {
                return None;
            }
            self.active = None;
        }
        self.contacts.first().map(|contact| contact.id.clone())
    }

    fn contact_from_roster(&self, user: RosterUser, unread: u32) -> Contact {
        let nickname = non_empty(user.nickname.as_deref());
        let display_name = non_empty(user.display_name.as_deref());
        let fallback = || format!("User {}", user.id);
        Contact {
            nickname: nickname
                .or(display_name)
                .map(str::to_string)
                .unwrap_or_else(fallback),
            display_name: display_name
                .or(nickname)
                .map(str::to_string)
                .unwrap_or_else(fallback),
            avatar: normalize_avatar(user.avatar.as_deref(), self.asset_base.as_ref()),
            is_online: user.is_online,
            unread,
            id: user.id,
        }
    }

    pub fn set_active(&mut self, id: Option<CanonicalId>) {
        self.active = id;
    }

    pub fn active_id(&self) -> Option<&CanonicalId> {
        self.active.as_ref()
    }

    pub fn is_active(&self, id: &CanonicalId) -> bool {
        self.active.as_ref() == Some(id)
    }

    pub fn active(&self) -> Option<&Contact> {
        self.active.as_ref().and_then(|id| self.get(id))
    }

    pub fn get(&self, id: &CanonicalId) -> Option<&Contact> {
        self.contacts.iter().find(|contact| &contact.id == id)
    }

    pub fn contains(&self, id: &CanonicalId) -> bool {
        self.get(id).is_some()
    }

    pub fn mark_read(&mut self, id: &CanonicalId) {
        if let Some(contact) = self.contacts.iter_mut().find(|contact| &contact.id == id) {
            contact.unread = 0;
        }
    }

    /// Returns false when no contact carries `id`.
    pub fn increment_unread(&mut self, id: &CanonicalId) -> bool {
        match self.contacts.iter_mut().find(|contact| &contact.id == id) {
            Some(contact) => {
                contact.unread = contact.unread.saturating_add(1);
                true
            }
            None => false,
        }
    }

    pub fn insert(&mut self, contact: Contact) {
        self.contacts.push(contact);
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn clear(&mut self) {
        self.contacts.clear();
        self.active = None;
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

/// Absolute URLs pass through; server-relative paths are rooted and, when
/// the server origin is known, made absolute against it.
pub fn normalize_avatar(path: Option<&str>, base: Option<&Url>) -> String {
    let path = match non_empty(path.map(str::trim)) {
        Some(path) => path,
        None => return String::new(),
    };
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let rooted = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    match base {
        Some(base) => format!("{}{rooted}", base.origin().ascii_serialization()),
        None => rooted,
    }
}
