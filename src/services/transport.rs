//! services/transport.rs
//! Capacidad de transporte: envío de archivos EDI y consulta de acuses.
//!
//! `RelayTransport` delega la transferencia FTP/SFTP a un relay HTTP.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::path::Path;

use crate::config::transmission_config::{TransferConfig, TransferProtocol};
use crate::errors::TransportError;
use crate::models::ack_model::{AckStatus, TransportAck};
use crate::models::transmission_model::TransmissionPayload;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: &TransmissionPayload) -> Result<TransportAck, TransportError>;

    async fn check_acknowledgment(
        &self,
        transmission_id: &str,
    ) -> Result<AckStatus, TransportError>;
}

/// Cuerpo de error que devuelve el relay: `{ "code": "...", "message": "..." }`
#[derive(Debug, Deserialize)]
struct RelayErrorBody {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayTransferResponse {
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayAckResponse {
    acknowledged: bool,
    received_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct RelayTransport {
    config: TransferConfig,
    http_client: Client,
}

impl RelayTransport {
    pub fn new(config: TransferConfig) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("No se pudo construir el cliente HTTP del relay")?;

        log::info!(
            "(RelayTransport) relay={}, destino={}:{}{} protocolo={:?}",
            config.relay_url,
            config.host,
            config.port,
            config.remote_dir,
            config.detected_protocol()
        );

        Ok(Self {
            config,
            http_client,
        })
    }

    async fn read_outbound_file(&self, file_name: &str) -> Result<Vec<u8>, TransportError> {
        let path = Path::new(&self.config.outbound_dir).join(file_name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(TransportError::new(
                "FILE_NOT_FOUND",
                format!("Archivo local no encontrado: {}", path.display()),
            )),
            Err(e) => Err(TransportError::new(
                "IO_ERROR",
                format!("No se pudo leer {}: {}", path.display(), e),
            )),
        }
    }

    /// Protocolo que se pide al relay para el intento `attempt`.
    pub(crate) fn target_protocol(&self, attempt: u32) -> &'static str {
        match self.config.protocol_for_attempt(attempt) {
            TransferProtocol::Ftp => "ftp",
            _ => "sftp",
        }
    }

    async fn error_from_response(response: reqwest::Response) -> TransportError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if let Ok(RelayErrorBody {
            code: Some(code),
            message,
        }) = serde_json::from_str::<RelayErrorBody>(&body)
        {
            return TransportError::new(code, message.unwrap_or_else(|| body.clone()));
        }

        let message = if body.is_empty() {
            format!("Relay respondió {}", status)
        } else {
            format!("Relay respondió {}: {}", status, body)
        };
        TransportError::new(status_code_to_error_code(status), message)
    }
}

/// Mapea el status HTTP del relay a un código que entiende la política de reintentos.
pub fn status_code_to_error_code(status: StatusCode) -> String {
    match status.as_u16() {
        400 | 422 => "VALIDATION_ERROR".to_string(),
        401 | 403 => "PERMISSION_DENIED".to_string(),
        409 => "23505".to_string(),
        502..=504 => "NETWORK_ERROR".to_string(),
        other => format!("HTTP_{}", other),
    }
}

fn request_error(e: reqwest::Error) -> TransportError {
    let code = if e.is_timeout() {
        "TIMEOUT"
    } else if e.is_connect() {
        "CONNECTION_REFUSED"
    } else if e.is_request() || e.is_body() {
        "NETWORK_ERROR"
    } else if e.is_decode() {
        "MALFORMED_REQUEST"
    } else {
        "UNKNOWN"
    };
    TransportError::new(code, e.to_string())
}

#[async_trait]
impl Transport for RelayTransport {
    async fn send(&self, payload: &TransmissionPayload) -> Result<TransportAck, TransportError> {
        let content = self.read_outbound_file(&payload.file_name).await?;
        log::info!(
            "(RelayTransport::send) id={}, archivo={} ({} bytes), intento={}, protocolo={}",
            payload.transmission_id,
            payload.file_name,
            content.len(),
            payload.attempt,
            self.target_protocol(payload.attempt)
        );

        let body = serde_json::json!({
            "transmissionId": payload.transmission_id,
            "containerNumber": payload.container_number,
            "operation": payload.operation.as_str(),
            "partnerCode": payload.partner_code,
            "fileName": payload.file_name,
            "fileSize": payload.file_size,
            "content": base64::encode(&content),
            "target": {
                "host": self.config.host,
                "port": self.config.port,
                "username": self.config.username,
                "remoteDir": self.config.remote_dir,
                "protocol": self.target_protocol(payload.attempt),
            }
        });

        let url = format!("{}/transfers", self.config.relay_url);
        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        if !response.status().is_success() {
            let err = Self::error_from_response(response).await;
            log::warn!(
                "(RelayTransport::send) Fallo para id={}: {}",
                payload.transmission_id,
                err
            );
            return Err(err);
        }

        // El relay puede responder sin cuerpo
        let reference = response
            .json::<RelayTransferResponse>()
            .await
            .ok()
            .and_then(|r| r.reference);
        Ok(TransportAck { reference })
    }

    async fn check_acknowledgment(
        &self,
        transmission_id: &str,
    ) -> Result<AckStatus, TransportError> {
        let url = format!(
            "{}/acknowledgments/{}",
            self.config.relay_url,
            urlencoding::encode(transmission_id)
        );
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(request_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(AckStatus::NotYet);
        }
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let ack = response
            .json::<RelayAckResponse>()
            .await
            .map_err(|e| TransportError::new("MALFORMED_REQUEST", e.to_string()))?;

        Ok(if ack.acknowledged {
            AckStatus::Acknowledged {
                received_at: ack.received_at,
            }
        } else {
            AckStatus::NotYet
        })
    }
}
