//! Error Types for the MUSTER API
//!
//! This module defines error handling for the API layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use muster_core::{
    AgentError, DispatchError, EntityType, MusterError, RateLimitError, StorageError,
};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code and represents
/// a category of error that can occur during API operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request contains invalid input data
    InvalidInput,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Requested agent does not exist or is retired
    AgentNotFound,

    /// Requested dispatch does not exist
    DispatchNotFound,

    /// Requested message does not exist
    MessageNotFound,

    /// Requested alert does not exist
    AlertNotFound,

    /// Requested event does not exist
    EventNotFound,

    /// Requested entity does not exist
    EntityNotFound,

    // ========================================================================
    // Conflict Errors (409)
    // ========================================================================
    /// Agent with the same name is already registered
    AgentAlreadyRegistered,

    /// Dispatch is already claimed by another worker
    AlreadyClaimed,

    /// Concurrent modification detected (version check failure)
    ConcurrentModification,

    /// Operation conflicts with current lifecycle state
    StateConflict,

    /// Message loop has been broken and rejects further transitions
    LoopBroken,

    // ========================================================================
    // Rate Limiting (429)
    // ========================================================================
    /// Request rate limit exceeded
    TooManyRequests,

    // ========================================================================
    // Server Errors (500)
    // ========================================================================
    /// Internal server error
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,

            ErrorCode::AgentNotFound
            | ErrorCode::DispatchNotFound
            | ErrorCode::MessageNotFound
            | ErrorCode::AlertNotFound
            | ErrorCode::EventNotFound
            | ErrorCode::EntityNotFound => StatusCode::NOT_FOUND,

            ErrorCode::AgentAlreadyRegistered
            | ErrorCode::AlreadyClaimed
            | ErrorCode::ConcurrentModification
            | ErrorCode::StateConflict
            | ErrorCode::LoopBroken => StatusCode::CONFLICT,

            ErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,

            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::AgentNotFound => "Agent not found",
            ErrorCode::DispatchNotFound => "Dispatch not found",
            ErrorCode::MessageNotFound => "Message not found",
            ErrorCode::AlertNotFound => "Alert not found",
            ErrorCode::EventNotFound => "Event not found",
            ErrorCode::EntityNotFound => "Entity not found",
            ErrorCode::AgentAlreadyRegistered => "Agent already registered",
            ErrorCode::AlreadyClaimed => "Dispatch already claimed",
            ErrorCode::ConcurrentModification => "Concurrent modification detected",
            ErrorCode::StateConflict => "Operation conflicts with current state",
            ErrorCode::LoopBroken => "Message loop is broken",
            ErrorCode::TooManyRequests => "Rate limit exceeded",
            ErrorCode::InternalError => "Internal server error",
        }
    }

    /// Not-found code for a specific entity type.
    fn for_missing(entity_type: EntityType) -> Self {
        match entity_type {
            EntityType::Agent => ErrorCode::AgentNotFound,
            EntityType::Dispatch => ErrorCode::DispatchNotFound,
            EntityType::Message => ErrorCode::MessageNotFound,
            EntityType::Alert => ErrorCode::AlertNotFound,
            EntityType::Event => ErrorCode::EventNotFound,
            _ => ErrorCode::EntityNotFound,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
///
/// This type is returned by all API endpoints when an error occurs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (retry hints, field errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            details: None,
        }
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    /// Create an InvalidInput error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create an InternalError.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

/// Implement IntoResponse for ApiError to enable automatic error handling
/// in Axum. This allows ApiError to be returned directly from handlers.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM CORE ERRORS
// ============================================================================

impl From<MusterError> for ApiError {
    fn from(err: MusterError) -> Self {
        let message = err.to_string();
        match &err {
            MusterError::Storage(StorageError::NotFound { entity_type, .. }) => {
                Self::new(ErrorCode::for_missing(*entity_type), message)
            }
            MusterError::Storage(StorageError::VersionConflict { .. }) => {
                Self::new(ErrorCode::ConcurrentModification, message)
            }
            MusterError::Storage(storage) => {
                tracing::error!(error = %storage, "storage error");
                Self::new(ErrorCode::InternalError, message)
            }
            MusterError::Dispatch(DispatchError::AlreadyClaimed { .. }) => {
                Self::new(ErrorCode::AlreadyClaimed, message)
            }
            MusterError::Dispatch(DispatchError::InvalidTransition { .. }) => {
                Self::new(ErrorCode::StateConflict, message)
            }
            MusterError::Loop(_) => Self::new(ErrorCode::LoopBroken, message),
            MusterError::Agent(AgentError::NotRegistered { .. }) => {
                Self::new(ErrorCode::AgentNotFound, message)
            }
            MusterError::Agent(AgentError::AlreadyRegistered { .. }) => {
                Self::new(ErrorCode::AgentAlreadyRegistered, message)
            }
            MusterError::RateLimit(RateLimitError::LimitExceeded {
                retry_after_secs, ..
            }) => Self::new(ErrorCode::TooManyRequests, message).with_details(serde_json::json!({
                "retry_after_secs": retry_after_secs,
            })),
            MusterError::Validation(_) => Self::new(ErrorCode::InvalidInput, message),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_input(format!("Invalid JSON: {}", err))
    }
}

// =============================================================================
// TESTS
// =============================================================================
