// src/permissions.rs
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::UserId;

pub const EDIT_SCHEDULES: &str = "Edycja Grafików Pracy";
pub const CONFIGURE_HOLIDAYS: &str = "Konfiguracja dni wolnych";
pub const MANAGE_SHIFT_TEMPLATES: &str = "Harmonogram Zmian";

/// Header carrying the id of the user authenticated upstream.
pub const USER_HEADER: &str = "x-user-id";

/// Who performs an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User(UserId),
    /// CLI commands and background jobs.
    System,
}

impl Actor {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Actor::User(id) => Some(*id),
            Actor::System => None,
        }
    }

    pub fn require_user(&self) -> AppResult<UserId> {
        self.user_id().ok_or(AppError::Unauthenticated)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::User(id) => write!(f, "user {}", id),
            Actor::System => write!(f, "System"),
        }
    }
}

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<UserId>().ok())
            .map(Actor::User)
            .ok_or(AppError::Unauthenticated)
    }
}

pub trait PermissionChecker: Send + Sync {
    fn has_permission(&self, actor: &Actor, permission: &str) -> bool;
}

/// Every actor holds every permission.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantAll;

impl PermissionChecker for GrantAll {
    fn has_permission(&self, _actor: &Actor, _permission: &str) -> bool {
        true
    }
}

/// Fixed user -> permission names table, e.g. `{"1": ["Harmonogram Zmian"]}`.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissions {
    grants: HashMap<UserId, HashSet<String>>,
}

impl StaticPermissions {
    pub fn from_json(raw: &str) -> AppResult<Self> {
        let grants: HashMap<UserId, HashSet<String>> = serde_json::from_str(raw)?;
        Ok(Self { grants })
    }

    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let permissions = Self::from_json(&raw)?;
        info!(
            "Loaded permissions for {} user(s) from {}",
            permissions.grants.len(),
            path.display()
        );
        Ok(permissions)
    }

    pub fn grant(&mut self, user_id: UserId, permission: &str) {
        self.grants
            .entry(user_id)
            .or_default()
            .insert(permission.to_string());
    }
}

impl PermissionChecker for StaticPermissions {
    fn has_permission(&self, actor: &Actor, permission: &str) -> bool {
        match actor {
            Actor::System => true,
            Actor::User(id) => self
                .grants
                .get(id)
                .is_some_and(|granted| granted.contains(permission)),
        }
    }
}

pub fn require(
    checker: &dyn PermissionChecker,
    actor: &Actor,
    permission: &str,
) -> AppResult<()> {
    if checker.has_permission(actor, permission) {
        Ok(())
    } else {
        warn!("{} lacks permission '{}'", actor, permission);
        Err(AppError::Forbidden(permission.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_permissions_from_json() {
        let permissions =
            StaticPermissions::from_json(r#"{"1": ["Harmonogram Zmian"], "2": []}"#).unwrap();
        assert!(permissions.has_permission(&Actor::User(1), MANAGE_SHIFT_TEMPLATES));
        assert!(!permissions.has_permission(&Actor::User(1), EDIT_SCHEDULES));
        assert!(!permissions.has_permission(&Actor::User(2), MANAGE_SHIFT_TEMPLATES));
        assert!(!permissions.has_permission(&Actor::User(3), MANAGE_SHIFT_TEMPLATES));
        assert!(permissions.has_permission(&Actor::System, EDIT_SCHEDULES));
    }

    #[test]
    fn require_maps_to_forbidden() {
        let mut permissions = StaticPermissions::default();
        permissions.grant(5, CONFIGURE_HOLIDAYS);
        assert!(require(&permissions, &Actor::User(5), CONFIGURE_HOLIDAYS).is_ok());
        assert!(matches!(
            require(&permissions, &Actor::User(5), EDIT_SCHEDULES),
            Err(AppError::Forbidden(name)) if name == EDIT_SCHEDULES
        ));
        assert!(require(&GrantAll, &Actor::User(9), EDIT_SCHEDULES).is_ok());
    }

    #[test]
    fn actor_display() {
        assert_eq!(Actor::User(4).to_string(), "user 4");
        assert_eq!(Actor::System.to_string(), "System");
        assert!(Actor::System.require_user().is_err());
    }
}
