use domain::{DomainError, RoomId};
use thiserror::Error;

use crate::rate_limiter::DenyReason;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("store error: {0}")]
    Store(StoreError),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },
    #[error("banned from room {room_id}")]
    Banned { room_id: RoomId },
    /// 事务在反复冲突后放弃
    #[error("stale read: {0}")]
    StaleRead(String),
    #[error("rate limited ({reason}), retry in {remaining_seconds}s")]
    RateLimited {
        remaining_seconds: u64,
        reason: DenyReason,
    },
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }

    pub fn permission_denied(action: impl Into<String>) -> Self {
        ApplicationError::PermissionDenied(action.into())
    }

    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        ApplicationError::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// 面向终端用户的提示文案
    pub fn user_message(&self) -> String {
        match self {
            ApplicationError::NotFound { resource: "room", .. } => {
                "This room no longer exists.".to_string()
            }
            ApplicationError::NotFound { resource, .. } => format!("The {resource} was not found."),
            ApplicationError::Banned { .. } => "You are banned from this room.".to_string(),
            ApplicationError::PermissionDenied(_) => {
                "You do not have permission to do that.".to_string()
            }
            ApplicationError::RateLimited {
                remaining_seconds,
                reason: DenyReason::Lockout,
            } => format!("Too many messages. You can send again in {remaining_seconds}s."),
            ApplicationError::RateLimited {
                remaining_seconds, ..
            } => format!("Slow mode is on. You can send again in {remaining_seconds}s."),
            ApplicationError::Domain(err) => err.to_string(),
            ApplicationError::StaleRead(_)
            | ApplicationError::Store(_)
            | ApplicationError::Infrastructure(_) => {
                "Something went wrong, please try again.".to_string()
            }
        }
    }

    /// 调用方是否可以原样重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApplicationError::StaleRead(_)
                | ApplicationError::Infrastructure(_)
                | ApplicationError::Store(StoreError::Unavailable(_))
        )
    }
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::PermissionDenied(path) => {
                ApplicationError::PermissionDenied(format!("write to {path}"))
            }
            StoreError::Conflict(path) => ApplicationError::StaleRead(path),
            other => ApplicationError::Store(other),
        }
    }
}

impl From<serde_json::Error> for ApplicationError {
    fn from(value: serde_json::Error) -> Self {
        ApplicationError::Store(StoreError::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_permission_denied_maps_to_permission_denied() {
        let err = ApplicationError::from(StoreError::PermissionDenied("rooms/r1".to_string()));
        assert!(matches!(err, ApplicationError::PermissionDenied(ref action) if action.contains("rooms/r1")));
        assert!(!err.is_retryable());
    }

    #[test]
    fn unavailable_store_is_retryable() {
        let err = ApplicationError::from(StoreError::Unavailable("lock poisoned".to_string()));
        assert!(err.is_retryable());
        assert_eq!(err.user_message(), "Something went wrong, please try again.");
    }

    #[test]
    fn rate_limited_message_mentions_remaining_seconds() {
        let err = ApplicationError::RateLimited {
            remaining_seconds: 2,
            reason: DenyReason::Cooldown,
        };
        assert!(err.user_message().contains("2s"));

        let err = ApplicationError::RateLimited {
            remaining_seconds: 30,
            reason: DenyReason::Lockout,
        };
        assert!(err.user_message().starts_with("Too many messages"));
    }

    #[test]
    fn missing_room_has_friendly_message() {
        let err = ApplicationError::not_found("room", "r1");
        assert_eq!(err.to_string(), "room not found: r1");
        assert_eq!(err.user_message(), "This room no longer exists.");
    }
}
