//! Caller identity handed to the core by the surrounding auth layer.
//!
//! Credentials are verified before a request reaches a service; every
//! operation receives an already-authenticated [`AuthenticatedUser`].

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::ServiceError;

pub use crate::entities::user::UserRole as Role;

/// Authenticated caller: user id plus role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn new(user_id: i64, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn customer(user_id: i64) -> Self {
        Self::new(user_id, Role::Customer)
    }

    pub fn seller(user_id: i64) -> Self {
        Self::new(user_id, Role::Seller)
    }

    /// Check if the user has a specific role
    pub fn has_role(&self, role: Role) -> bool {
        self.role == role
    }

    /// Fails with `AccessDenied` unless the caller holds `role`.
    pub fn require_role(&self, role: Role) -> Result<(), ServiceError> {
        if self.has_role(role) {
            Ok(())
        } else {
            warn!(
                user_id = self.user_id,
                required = %role,
                actual = %self.role,
                "role check failed"
            );
            Err(ServiceError::AccessDenied(format!(
                "{} role required",
                role
            )))
        }
    }

    pub fn require_seller(&self) -> Result<(), ServiceError> {
        self.require_role(Role::Seller)
    }
}
