use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A single rejected input field, rendered next to that field by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.0.push(FieldError::new(field, message));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> &[FieldError] {
        &self.0
    }

    /// `Ok(())` when nothing was collected, otherwise the whole set as one error.
    pub fn into_result(self) -> Result<(), AppError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", rendered.join("; "))
    }
}

#[derive(Error, Debug, Serialize)]
pub enum AppError {
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Terminal not found: {0}")]
    NotFound(String),

    #[error("Process already running for terminal {0}")]
    AlreadyRunning(String),

    #[error("Process is not running for terminal {0}")]
    NotRunning(String),

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    StdIoError(String), // Store as String for Serialize

    #[error("Serde JSON error: {0}")]
    SerdeJsonError(String),

    #[error("Invalid input argument: {0}")]
    InvalidInputArgument(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable wire name of the error class. Clients branch on this, never on `message`.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "ValidationError",
            AppError::NotFound(_) => "NotFound",
            AppError::AlreadyRunning(_) => "AlreadyRunning",
            AppError::NotRunning(_) => "NotRunning",
            AppError::Spawn(_) => "SpawnError",
            AppError::Storage(_) | AppError::StdIoError(_) | AppError::SerdeJsonError(_) => {
                "StorageError"
            }
            AppError::InvalidInputArgument(_) => "InvalidRequest",
            AppError::UnknownCommand(_) => "UnknownCommand",
            AppError::Internal(_) => "Internal",
        }
    }

    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            AppError::Validation(errors) => errors.fields(),
            _ => &[],
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::StdIoError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerdeJsonError(err.to_string())
    }
}
