use std::sync::{PoisonError, RwLock};

use shared::domain::CanonicalId;

/// Accessor for the signed-in user, owned by the session layer.
pub trait SessionIdentity: Send + Sync {
    fn current_user_id(&self) -> Option<CanonicalId>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<CanonicalId>);

impl StaticIdentity {
    pub fn new(user_id: impl Into<CanonicalId>) -> Self {
        Self(Some(user_id.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl SessionIdentity for StaticIdentity {
    fn current_user_id(&self) -> Option<CanonicalId> {
        self.0.clone()
    }
}

/// Identity that changes over the process lifetime (login/logout).
#[derive(Debug, Default)]
pub struct SharedIdentity {
    user_id: RwLock<Option<CanonicalId>>,
}

impl SharedIdentity {
    pub fn set(&self, user_id: impl Into<CanonicalId>) {
        *self.user_id.write().unwrap_or_else(PoisonError::into_inner) = Some(user_id.into());
    }

    pub fn clear(&self) {
        *self.user_id.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl SessionIdentity for SharedIdentity {
    fn current_user_id(&self) -> Option<CanonicalId> {
        self.user_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
