//! Error taxonomy for the shift tracking core.
//!
//! `Conflict` and `Validation` are caller mistakes and are returned as-is;
//! `Storage` is transient and scheduled jobs retry it on their next tick.

use std::fmt::Display;

#[derive(Debug, thiserror::Error)]
pub enum ShiftError {
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Storage error: {context}: {message}")]
    Storage { context: String, message: String },
}

impl ShiftError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        ShiftError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn storage(context: &str, err: impl Display) -> Self {
        ShiftError::Storage {
            context: context.to_string(),
            message: err.to_string(),
        }
    }

    /// Stable code used in IPC error responses.
    pub fn code(&self) -> &'static str {
        match self {
            ShiftError::Conflict(_) => "conflict",
            ShiftError::NotFound { .. } => "not_found",
            ShiftError::Validation(_) => "validation_error",
            ShiftError::Storage { .. } => "storage_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, ShiftError>;
