use http::StatusCode;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};

use crate::cache::CacheError;

/// Serialisable error body handed to the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Not Found", "Conflict")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// RFC 3339 timestamp when the error was produced
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not found or access denied: {0}")]
    NotFoundOrAccessDenied(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Not owner: {0}")]
    NotOwner(String),

    #[error("Invalid status transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Illegal status transition: {0}")]
    IllegalStatusTransition(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Maximum quantity exceeded: {0}")]
    MaxQuantityExceeded(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Order item not delivered: {0}")]
    ItemNotDelivered(String),

    #[error("Refund window expired: {0}")]
    RefundWindowExpired(String),

    #[error("Refund already exists: {0}")]
    RefundAlreadyExists(String),

    #[error("Order already processed: {0}")]
    OrderAlreadyProcessed(String),

    #[error("External gateway error: {0}")]
    ExternalGatewayError(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl From<CacheError> for ServiceError {
    fn from(err: CacheError) -> Self {
        ServiceError::CacheError(err.to_string())
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::ExternalGatewayError(format!("payment gateway timed out: {}", err))
        } else {
            ServiceError::ExternalGatewayError(err.to_string())
        }
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_)
            | Self::CacheError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) | Self::NotFoundOrAccessDenied(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::EmptyCart | Self::MaxQuantityExceeded(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            Self::AccessDenied(_) | Self::NotOwner(_) => StatusCode::FORBIDDEN,
            Self::InvalidTransition { .. }
            | Self::IllegalStatusTransition(_)
            | Self::RefundAlreadyExists(_)
            | Self::OrderAlreadyProcessed(_) => StatusCode::CONFLICT,
            Self::InsufficientStock(_)
            | Self::ItemNotDelivered(_)
            | Self::RefundWindowExpired(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ExternalGatewayError(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::CacheError(_) | Self::SerializationError(_) | Self::InternalError(_) => {
                "Internal server error".to_string()
            }
            Self::ExternalGatewayError(_) => "Payment provider unavailable".to_string(),
            _ => self.to_string(),
        }
    }

    /// True for failures the caller caused (4xx), false for ours (5xx).
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl From<&ServiceError> for ErrorResponse {
    fn from(error: &ServiceError) -> Self {
        let status = error.status_code();
        ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: error.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
