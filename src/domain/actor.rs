use super::ids::UserId;
use crate::error::EscrowError;
use std::collections::HashSet;

/// What an actor is allowed to do to escrowed payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Release, resolve, refund and retry payments.
    ManageEscrow,
    /// See raw states, provider errors and audit notes.
    ViewAuditTrail,
}

/// The caller of a command, with the permissions resolved by the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    permissions: HashSet<Permission>,
}

impl Actor {
    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            permissions: HashSet::from([Permission::ManageEscrow, Permission::ViewAuditTrail]),
        }
    }

    /// A facility or professional with no operator permissions.
    pub fn member(user_id: UserId) -> Self {
        Self {
            user_id,
            permissions: HashSet::new(),
        }
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.insert(permission);
        self
    }

    pub fn can(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn require(&self, permission: Permission) -> Result<(), EscrowError> {
        if self.can(permission) {
            Ok(())
        } else {
            Err(EscrowError::Unauthorized(format!(
                "User {} lacks {:?}",
                self.user_id, permission
            )))
        }
    }
}
