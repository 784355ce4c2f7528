//! errors.rs
//! Tipos de error del núcleo de transmisión EDI.

use serde::Serialize;
use thiserror::Error;

use crate::models::transmission_model::TransmissionRecord;

/// Categoría de un error según la política de reintentos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Permission,
    /// Duplicado / violación de unicidad
    Conflict,
    MalformedRequest,
    /// Red, timeout, conexión, deadlock...
    Transient,
    /// No reconocido: no se reintenta
    Unknown,
}

impl ErrorCategory {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transient)
    }
}

/// Error devuelto por el transporte (relay FTP/SFTP o equivalente).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{code}] {message}")]
pub struct TransportError {
    pub code: String,
    pub message: String,
}

impl TransportError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        TransportError {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransmissionError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// El envío terminó en FAILED; el registro queda disponible para diagnóstico.
    #[error("Delivery failed ({category:?}): {message}")]
    Delivery {
        record: Box<TransmissionRecord>,
        category: ErrorCategory,
        message: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl TransmissionError {
    /// Registro asociado cuando el error es un fallo de entrega.
    #[cfg(test)]
    pub fn record(&self) -> Option<&TransmissionRecord> {
        match self {
            TransmissionError::Delivery { record, .. } => Some(record),
            _ => None,
        }
    }
}

pub type TransmissionResult<T> = Result<T, TransmissionError>;
