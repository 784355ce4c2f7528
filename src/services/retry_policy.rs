//! services/retry_policy.rs
//! Política de reintentos: clasificación de errores y backoff exponencial con jitter.
//!
//! Es una función pura sobre su configuración: no hace I/O ni guarda estado
//! entre llamadas. Quien programa y cancela los reintentos es el coordinador.

use rand::Rng;
use serde::Serialize;
use std::time::Duration;

use crate::config::retry_config::{OperationClass, RetryConfig, RetrySettings};
use crate::errors::{ErrorCategory, TransportError};

/// Clase de los envíos al partner: operación con efectos.
pub(crate) const SEND_CLASS: OperationClass = OperationClass::Write;

/// Jitter máximo añadido sobre el delay calculado (10%).
const MAX_JITTER_RATIO: f64 = 0.10;

/// Red / timeout / conexión y códigos transitorios del backend
/// (connection failure, too many connections, conexión terminada,
/// serialization failure, deadlock).
const TRANSIENT_CODES: &[&str] = &[
    "NETWORK_ERROR",
    "TIMEOUT",
    "ETIMEDOUT",
    "ECONNRESET",
    "ECONNREFUSED",
    "ECONNABORTED",
    "EPIPE",
    "CONNECTION_REFUSED",
    "CONNECTION_RESET",
    "CONNECTION_CLOSED",
    "08000",
    "08003",
    "08006",
    "53300",
    "57P01",
    "40001",
    "40P01",
];

const VALIDATION_CODES: &[&str] = &[
    "VALIDATION_ERROR",
    "FILE_NOT_FOUND",
    "22P02",
    "23502",
    "23514",
];

const PERMISSION_CODES: &[&str] = &[
    "PERMISSION_DENIED",
    "UNAUTHORIZED",
    "FORBIDDEN",
    "AUTH_FAILED",
    "42501",
    "PGRST301",
];

const CONFLICT_CODES: &[&str] = &["23505", "DUPLICATE", "CONFLICT"];

const MALFORMED_CODES: &[&str] = &["MALFORMED_REQUEST", "BAD_REQUEST", "42601", "PGRST100"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub category: ErrorCategory,
    pub retryable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RetryPolicyEngine {
    settings: RetrySettings,
}

impl RetryPolicyEngine {
    pub fn new(settings: RetrySettings) -> Self {
        RetryPolicyEngine { settings }
    }

    pub fn config(&self, class: OperationClass) -> &RetryConfig {
        self.settings.for_class(class)
    }

    /// Clasifica un error por su código. Lo que no se reconoce no se reintenta.
    pub fn classify(&self, error: &TransportError) -> Classification {
        let code = error.code.trim().to_ascii_uppercase();
        let is = |set: &[&str]| set.iter().any(|c| *c == code);

        let category = if is(TRANSIENT_CODES) {
            ErrorCategory::Transient
        } else if is(VALIDATION_CODES) {
            ErrorCategory::Validation
        } else if is(PERMISSION_CODES) {
            ErrorCategory::Permission
        } else if is(CONFLICT_CODES) {
            ErrorCategory::Conflict
        } else if is(MALFORMED_CODES) {
            ErrorCategory::MalformedRequest
        } else {
            ErrorCategory::Unknown
        };

        Classification {
            category,
            retryable: category.is_retryable(),
        }
    }

    /// `min(base * multiplier^attempt_index, max_delay)`, sin jitter.
    pub fn backoff_delay(&self, class: OperationClass, attempt_index: u32) -> Duration {
        let cfg = self.config(class);
        let exponent = attempt_index.min(i32::MAX as u32) as i32;
        let raw = cfg.base_delay.as_secs_f64() * cfg.backoff_multiplier.powi(exponent);
        let max = cfg.max_delay.as_secs_f64();

        if raw.is_finite() && raw < max {
            Duration::from_secs_f64(raw.max(0.0))
        } else {
            cfg.max_delay
        }
    }

    /// Delay antes del próximo intento: backoff acotado más hasta un 10% de jitter,
    /// para que llamadores concurrentes no reintenten todos a la vez.
    pub fn next_delay(&self, class: OperationClass, attempt_index: u32) -> Duration {
        let delay = self.backoff_delay(class, attempt_index);
        let jitter = rand::thread_rng().gen_range(0.0..=MAX_JITTER_RATIO);
        delay.mul_f64(1.0 + jitter)
    }

    pub fn should_retry(
        &self,
        error: &TransportError,
        attempt_index: u32,
        max_retries: u32,
    ) -> bool {
        self.classify(error).retryable && attempt_index < max_retries
    }

    /// `should_retry` con el `max_retries` configurado para la clase.
    pub fn should_retry_for(
        &self,
        error: &TransportError,
        attempt_index: u32,
        class: OperationClass,
    ) -> bool {
        self.should_retry(error, attempt_index, self.config(class).max_retries)
    }

    /// true si `attempts` ya consumió todos los reintentos automáticos de la clase.
    pub fn retries_exhausted(&self, class: OperationClass, attempts: u32) -> bool {
        attempts.saturating_sub(1) >= self.config(class).max_retries
    }
}
