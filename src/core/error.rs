//! Typed error handling for the cellar framework
//!
//! Every operation of an interface returns [`CellarError`] so callers (and the
//! HTTP exposure) can tell an authentication problem from an authorization
//! denial, a disabled verb from a disabled field, and a user error from a
//! deployment defect.
//!
//! # Error Categories
//!
//! - Not-found, duplicate and version conflicts come from storage
//! - Not-authenticated / not-authorized come from rule enforcement
//! - Disabled-method / disabled-field come from the interface declaration
//! - [`CompoundValidationError`] aggregates field-level validation failures
//! - `Config` marks an inconsistent declaration and is never a user error
//!
//! # Example
//!
//! ```rust,ignore
//! match interface.delete("42", RawOptions::default()).await {
//!     Err(CellarError::NotAuthenticated) => prompt_login(),
//!     Err(CellarError::NotAuthorized { .. }) => deny(),
//!     Err(e) => eprintln!("Other error: {}", e),
//!     Ok(()) => {}
//! }
//! ```

use crate::core::rules::Method;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the framework
pub type Result<T> = std::result::Result<T, CellarError>;

/// The main error type for the cellar framework
#[derive(Debug, Error)]
pub enum CellarError {
    /// No item matched an id-based operation
    #[error("{entity} with id '{id}' not found")]
    NotFound { entity: String, id: String },

    /// A rule needed an identity and the request carried none
    #[error("Authentication required")]
    NotAuthenticated,

    /// A rule evaluated to false
    #[error("Not authorized to {method}")]
    NotAuthorized { method: Method },

    /// The verb was never enabled on this interface
    #[error("Method '{method}' is disabled on '{interface}'")]
    DisabledMethod { interface: String, method: Method },

    /// A filter or sort referenced a field outside the allow-list
    #[error("Field '{field}' cannot be used here")]
    DisabledField { field: String },

    /// Field-level validation failures, keyed by field name
    #[error("{0}")]
    Validation(CompoundValidationError),

    /// A unique field already holds this value
    #[error("Duplicate value for {entity}.{field}")]
    Duplicate { entity: String, field: String },

    /// Storage refused a write because the stored version moved on
    #[error("Version conflict on {entity} '{id}'")]
    VersionConflict { entity: String, id: String },

    /// Malformed option value (sort key, filter shape, ...)
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    /// The API was declared inconsistently
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Storage backend failure
    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl CellarError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn disabled_field(field: impl Into<String>) -> Self {
        Self::DisabledField {
            field: field.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Create a configuration error and log it, these indicate a broken deployment
    pub fn config(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(%message, "configuration error");
        Self::Config { message }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            CellarError::NotFound { .. } => StatusCode::NOT_FOUND,
            CellarError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            CellarError::NotAuthorized { .. } => StatusCode::FORBIDDEN,
            CellarError::DisabledMethod { .. } => StatusCode::METHOD_NOT_ALLOWED,
            CellarError::DisabledField { .. } => StatusCode::BAD_REQUEST,
            CellarError::Validation(_) => StatusCode::BAD_REQUEST,
            CellarError::Duplicate { .. } => StatusCode::CONFLICT,
            CellarError::VersionConflict { .. } => StatusCode::CONFLICT,
            CellarError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            CellarError::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            CellarError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            CellarError::NotFound { .. } => "NOT_FOUND",
            CellarError::NotAuthenticated => "NOT_AUTHENTICATED",
            CellarError::NotAuthorized { .. } => "NOT_AUTHORIZED",
            CellarError::DisabledMethod { .. } => "DISABLED_METHOD",
            CellarError::DisabledField { .. } => "DISABLED_FIELD",
            CellarError::Validation(_) => "VALIDATION_ERROR",
            CellarError::Duplicate { .. } => "DUPLICATE_FIELD",
            CellarError::VersionConflict { .. } => "VERSION_CONFLICT",
            CellarError::BadRequest { .. } => "BAD_REQUEST",
            CellarError::Config { .. } => "CONFIGURATION_ERROR",
            CellarError::Storage { .. } => "STORAGE_ERROR",
        }
    }

    /// Convert to an error response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
            details: self.details(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            CellarError::NotFound { entity, id } => Some(serde_json::json!({
                "entity": entity,
                "id": id,
            })),
            CellarError::DisabledField { field } => Some(serde_json::json!({ "field": field })),
            CellarError::Duplicate { field, .. } => Some(serde_json::json!({ "field": field })),
            CellarError::Validation(errors) => Some(serde_json::json!({ "fields": errors.errors })),
            _ => None,
        }
    }
}

/// Error response structure for HTTP responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for CellarError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self.to_response());
        (status, body).into_response()
    }
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Validation failures aggregated by field name
///
/// Produced by the validation collaborator and propagated unmodified.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompoundValidationError {
    pub errors: IndexMap<String, String>,
}

impl CompoundValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure; the first message recorded for a field wins
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.entry(field.into()).or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.errors.get(field).map(String::as_str)
    }

    /// `Ok(())` when nothing was recorded, otherwise the compound error
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CellarError::Validation(self))
        }
    }
}

impl fmt::Display for CompoundValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msgs: Vec<String> = self
            .errors
            .iter()
            .map(|(field, message)| format!("{}: {}", field, message))
            .collect();
        write!(f, "Validation errors: {}", msgs.join(", "))
    }
}

impl From<CompoundValidationError> for CellarError {
    fn from(err: CompoundValidationError) -> Self {
        CellarError::Validation(err)
    }
}
