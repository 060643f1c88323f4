use pixforge_core::UserId;

/// Caller identity for a request.
///
/// Inserted by [`identity_middleware`](crate::middleware::identity_middleware);
/// every route under it can rely on the account existing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UserContext {
    user_id: UserId,
}

impl UserContext {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}
