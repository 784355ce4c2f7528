//! config/transmission_config.rs
//! Configuración del poller de acuses, del destino de transferencia y del servidor.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::env_or;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Cada cuánto se concilian los registros SENT/RETRYING
    pub interval: Duration,
    /// A partir de cuánto tiempo sin acuse un registro se reporta como anómalo
    pub stale_after: Duration,
    /// Consultas de acuse simultáneas por pasada
    pub lookup_concurrency: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        PollerConfig {
            interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(3600),
            lookup_concurrency: 4,
        }
    }
}

impl PollerConfig {
    pub fn from_env() -> Self {
        let default = PollerConfig::default();
        PollerConfig {
            interval: Duration::from_secs(
                env_or("EDI_ACK_POLL_INTERVAL_SECS", default.interval.as_secs()).max(1),
            ),
            stale_after: Duration::from_secs(env_or(
                "EDI_ACK_STALE_AFTER_SECS",
                default.stale_after.as_secs(),
            )),
            lookup_concurrency: env_or("EDI_ACK_LOOKUP_CONCURRENCY", default.lookup_concurrency)
                .max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferProtocol {
    Ftp,
    Sftp,
    Auto,
}

impl TransferProtocol {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ftp" => TransferProtocol::Ftp,
            "sftp" => TransferProtocol::Sftp,
            _ => TransferProtocol::Auto,
        }
    }
}

/// Destino FTP/SFTP del partner. La transferencia la ejecuta el relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    pub relay_url: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub remote_dir: String,
    pub protocol: TransferProtocol,
    /// Carpeta local donde quedan los archivos EDI generados
    pub outbound_dir: String,
    pub timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            relay_url: "http://127.0.0.1:8090".to_string(),
            host: "localhost".to_string(),
            port: 22,
            username: String::new(),
            remote_dir: "/".to_string(),
            protocol: TransferProtocol::Auto,
            outbound_dir: "./output".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl TransferConfig {
    pub fn from_env() -> Self {
        let default = TransferConfig::default();
        let remote_dir = env_or("TRANSFER_REMOTE_DIR", default.remote_dir);
        let remote_dir = match remote_dir.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        };

        TransferConfig {
            relay_url: env_or("EDI_RELAY_URL", default.relay_url)
                .trim_end_matches('/')
                .to_string(),
            host: env_or("TRANSFER_HOST", default.host),
            port: env_or("TRANSFER_PORT", default.port),
            username: env_or("TRANSFER_USER", default.username),
            remote_dir,
            protocol: TransferProtocol::parse(&env_or("TRANSFER_PROTOCOL", "auto".to_string())),
            outbound_dir: env_or("EDI_OUTBOUND_DIR", default.outbound_dir),
            timeout: Duration::from_secs(env_or(
                "EDI_TRANSFER_TIMEOUT_SECS",
                default.timeout.as_secs(),
            )),
        }
    }

    /// Protocolo efectivo: explícito, o por puerto (21 = FTP, 22 = SFTP, resto SFTP).
    pub fn detected_protocol(&self) -> TransferProtocol {
        match self.protocol {
            TransferProtocol::Auto => match self.port {
                21 => TransferProtocol::Ftp,
                _ => TransferProtocol::Sftp,
            },
            explicit => explicit,
        }
    }

    /// Protocolo para el intento `attempt` (1 = primero). En modo auto, si el
    /// primer intento falló se prueba con el otro protocolo.
    pub fn protocol_for_attempt(&self, attempt: u32) -> TransferProtocol {
        let detected = self.detected_protocol();
        if self.protocol != TransferProtocol::Auto || attempt <= 1 {
            return detected;
        }
        match detected {
            TransferProtocol::Ftp => TransferProtocol::Sftp,
            _ => TransferProtocol::Ftp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        ServerConfig {
            host: env_or("SERVER_HOST", "0.0.0.0".to_string()),
            port: env_or("SERVER_PORT", 5022),
            database_url: env_or(
                "DATABASE_URL",
                "sqlite:./data/transmissions.db".to_string(),
            ),
        }
    }
}
