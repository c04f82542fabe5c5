//! Error types for MUSTER operations

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Entity type discriminator for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Agent,
    Dispatch,
    Message,
    Alert,
    Event,
    Activity,
    Preferences,
    Delivery,
}

/// Stable error kinds exposed to API consumers.
///
/// Every mutating operation returns one of these when it fails, so callers
/// can branch without parsing error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidStateTransition,
    AlreadyClaimed,
    RateLimited,
    Conflict,
    InvalidInput,
    Internal,
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: Uuid },

    #[error("Insert failed for {entity_type:?}: {reason}")]
    InsertFailed {
        entity_type: EntityType,
        reason: String,
    },

    #[error("Version conflict on {entity_type:?} {id}: expected {expected}, found {actual}")]
    VersionConflict {
        entity_type: EntityType,
        id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Dispatch queue errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Dispatch {id} is already claimed")]
    AlreadyClaimed { id: Uuid },

    #[error("Invalid dispatch transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: String,
        to: String,
    },
}

/// Message loop errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoopError {
    #[error("Loop for message {id} is broken: {reason}")]
    LoopBroken { id: Uuid, reason: String },
}

/// Agent registry errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("Agent not registered: {name}")]
    NotRegistered { name: String },

    #[error("Agent already registered: {name}")]
    AlreadyRegistered { name: String },
}

/// Rate limiting errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Rate limit exceeded for {target}, retry after {retry_after_secs}s")]
    LimitExceeded {
        target: String,
        retry_after_secs: u64,
    },
}

/// Validation error for malformed input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid value for {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

/// Master error type for all MUSTER errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MusterError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Loop error: {0}")]
    Loop(#[from] LoopError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl MusterError {
    /// Map to the stable error kind contract.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MusterError::Storage(StorageError::NotFound { .. }) => ErrorKind::NotFound,
            MusterError::Storage(StorageError::VersionConflict { .. }) => ErrorKind::Conflict,
            MusterError::Storage(_) => ErrorKind::Internal,
            MusterError::Dispatch(DispatchError::AlreadyClaimed { .. }) => {
                ErrorKind::AlreadyClaimed
            }
            MusterError::Dispatch(DispatchError::InvalidTransition { .. }) => {
                ErrorKind::InvalidStateTransition
            }
            MusterError::Loop(LoopError::LoopBroken { .. }) => ErrorKind::InvalidStateTransition,
            MusterError::Agent(AgentError::NotRegistered { .. }) => ErrorKind::NotFound,
            MusterError::Agent(AgentError::AlreadyRegistered { .. }) => ErrorKind::Conflict,
            MusterError::RateLimit(_) => ErrorKind::RateLimited,
            MusterError::Validation(_) => ErrorKind::InvalidInput,
        }
    }

    /// Construct a not-found error for an entity.
    pub fn not_found(entity_type: EntityType, id: Uuid) -> Self {
        MusterError::Storage(StorageError::NotFound { entity_type, id })
    }
}

/// Result type alias for MUSTER operations.
pub type MusterResult<T> = Result<T, MusterError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            entity_type: EntityType::Dispatch,
            id: Uuid::nil(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Entity not found"));
        assert!(msg.contains("Dispatch"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_version_conflict_maps_to_conflict_kind() {
        let err = MusterError::Storage(StorageError::VersionConflict {
            entity_type: EntityType::Dispatch,
            id: Uuid::nil(),
            expected: 1,
            actual: 2,
        });
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_already_claimed_kind() {
        let err = MusterError::Dispatch(DispatchError::AlreadyClaimed { id: Uuid::nil() });
        assert_eq!(err.kind(), ErrorKind::AlreadyClaimed);
    }

    #[test]
    fn test_invalid_transition_kind() {
        let err = MusterError::Dispatch(DispatchError::InvalidTransition {
            id: Uuid::nil(),
            from: "completed".to_string(),
            to: "running".to_string(),
        });
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
    }

    #[test]
    fn test_rate_limit_kind_and_display() {
        let err = MusterError::RateLimit(RateLimitError::LimitExceeded {
            target: "sam".to_string(),
            retry_after_secs: 12,
        });
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        let msg = format!("{}", err);
        assert!(msg.contains("sam"));
        assert!(msg.contains("12"));
    }

    #[test]
    fn test_agent_not_registered_is_not_found() {
        let err = MusterError::Agent(AgentError::NotRegistered {
            name: "leo".to_string(),
        });
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::InvalidStateTransition).unwrap();
        assert_eq!(json, "\"invalid_state_transition\"");
        let json = serde_json::to_string(&ErrorKind::AlreadyClaimed).unwrap();
        assert_eq!(json, "\"already_claimed\"");
    }

    #[test]
    fn test_muster_error_from_variants() {
        let storage = MusterError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, MusterError::Storage(_)));

        let dispatch = MusterError::from(DispatchError::AlreadyClaimed { id: Uuid::nil() });
        assert!(matches!(dispatch, MusterError::Dispatch(_)));

        let agent = MusterError::from(AgentError::NotRegistered {
            name: "max".to_string(),
        });
        assert!(matches!(agent, MusterError::Agent(_)));
    }
}
