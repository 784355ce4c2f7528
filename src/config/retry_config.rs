//! config/retry_config.rs
//! Parámetros de reintento por clase de operación.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::env_or;

/// Clase de operación. Las que tienen efectos (write/delete) se reintentan
/// menos y más despacio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    Read,
    Write,
    Delete,
}

impl OperationClass {
    fn env_prefix(&self) -> &'static str {
        match self {
            OperationClass::Read => "EDI_RETRY_READ",
            OperationClass::Write => "EDI_RETRY_WRITE",
            OperationClass::Delete => "EDI_RETRY_DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    pub fn read_default() -> Self {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }

    pub fn write_default() -> Self {
        RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    pub fn delete_default() -> Self {
        RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    fn from_env(class: OperationClass, default: RetryConfig) -> Self {
        let prefix = class.env_prefix();
        let base_ms = env_or(
            &format!("{}_BASE_DELAY_MS", prefix),
            default.base_delay.as_millis() as u64,
        );
        let max_ms = env_or(
            &format!("{}_MAX_DELAY_MS", prefix),
            default.max_delay.as_millis() as u64,
        );
        let multiplier = env_or(
            &format!("{}_MULTIPLIER", prefix),
            default.backoff_multiplier,
        );

        RetryConfig {
            max_retries: env_or(&format!("{}_MAX_RETRIES", prefix), default.max_retries),
            base_delay: Duration::from_millis(base_ms),
            // max_delay nunca por debajo de base_delay
            max_delay: Duration::from_millis(max_ms.max(base_ms)),
            backoff_multiplier: if multiplier >= 1.0 { multiplier } else { 1.0 },
        }
    }
}

/// Configuración de las tres clases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub read: RetryConfig,
    pub write: RetryConfig,
    pub delete: RetryConfig,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            read: RetryConfig::read_default(),
            write: RetryConfig::write_default(),
            delete: RetryConfig::delete_default(),
        }
    }
}

impl RetrySettings {
    pub fn from_env() -> Self {
        RetrySettings {
            read: RetryConfig::from_env(OperationClass::Read, RetryConfig::read_default()),
            write: RetryConfig::from_env(OperationClass::Write, RetryConfig::write_default()),
            delete: RetryConfig::from_env(OperationClass::Delete, RetryConfig::delete_default()),
        }
    }

    pub fn for_class(&self, class: OperationClass) -> &RetryConfig {
        match class {
            OperationClass::Read => &self.read,
            OperationClass::Write => &self.write,
            OperationClass::Delete => &self.delete,
        }
    }
}
