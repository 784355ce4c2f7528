//! models/transmission_model.rs
//! Registro de transmisiones EDI (gate-in / gate-out) y sus estados.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::TransmissionError;

/// Estado de una transmisión.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransmissionStatus {
    Pending,
    /// Enviado, esperando acuse del partner
    Sent,
    Retrying,
    /// Terminal hasta un reintento manual
    Failed,
    /// Terminal (éxito)
    Acknowledged,
}

impl TransmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransmissionStatus::Pending => "PENDING",
            TransmissionStatus::Sent => "SENT",
            TransmissionStatus::Retrying => "RETRYING",
            TransmissionStatus::Failed => "FAILED",
            TransmissionStatus::Acknowledged => "ACKNOWLEDGED",
        }
    }
}

impl fmt::Display for TransmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransmissionStatus {
    type Err = TransmissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(TransmissionStatus::Pending),
            "SENT" => Ok(TransmissionStatus::Sent),
            "RETRYING" => Ok(TransmissionStatus::Retrying),
            "FAILED" => Ok(TransmissionStatus::Failed),
            "ACKNOWLEDGED" => Ok(TransmissionStatus::Acknowledged),
            other => Err(TransmissionError::Validation(format!(
                "Estado desconocido: {}",
                other
            ))),
        }
    }
}

/// Tipo de movimiento notificado al partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdiOperation {
    GateIn,
    GateOut,
}

impl EdiOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdiOperation::GateIn => "GATE_IN",
            EdiOperation::GateOut => "GATE_OUT",
        }
    }
}

impl fmt::Display for EdiOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdiOperation {
    type Err = TransmissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GATE_IN" => Ok(EdiOperation::GateIn),
            "GATE_OUT" => Ok(EdiOperation::GateOut),
            other => Err(TransmissionError::Validation(format!(
                "Operación desconocida: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmissionRecord {
    pub id: String,
    pub container_number: String,
    pub operation: EdiOperation,
    pub partner_code: String,
    pub file_name: String,
    pub file_size: u64,
    pub status: TransmissionStatus,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub acknowledgment_received_at: Option<DateTime<Utc>>,
}

impl TransmissionRecord {
    /// Registro nuevo en PENDING, sin intentos.
    pub fn pending(req: NewTransmission) -> Self {
        TransmissionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            container_number: req.container_number,
            operation: req.operation,
            partner_code: req.partner_code,
            file_name: req.file_name,
            file_size: req.file_size,
            status: TransmissionStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
            created_at: Utc::now(),
            error_message: None,
            acknowledgment_received_at: None,
        }
    }

    /// Desde cuándo el registro espera resolución (último intento o creación).
    pub fn pending_since(&self) -> DateTime<Utc> {
        self.last_attempt_at.unwrap_or(self.created_at)
    }
}

/// Datos de una transmisión ya validada.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransmission {
    pub container_number: String,
    pub operation: EdiOperation,
    pub partner_code: String,
    pub file_name: String,
    pub file_size: u64,
}

/// Request para POST /api/transmissions
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitTransmissionRequest {
    pub container_number: String,
    pub operation: EdiOperation,
    pub partner_code: String,
    pub file_name: String,
    pub file_size: u64,
}

impl SubmitTransmissionRequest {
    /// Valida y normaliza la solicitud.
    pub fn validate(self) -> Result<NewTransmission, TransmissionError> {
        let container_number = self.container_number.trim().to_ascii_uppercase();
        if !is_iso6346_shape(&container_number) {
            return Err(TransmissionError::Validation(format!(
                "Número de contenedor inválido: '{}' (se esperan 4 letras y 7 dígitos)",
                self.container_number
            )));
        }

        let partner_code = self.partner_code.trim().to_string();
        if partner_code.is_empty() {
            return Err(TransmissionError::Validation(
                "partner_code no puede estar vacío".to_string(),
            ));
        }

        let file_name = self.file_name.trim().to_string();
        if file_name.is_empty() {
            return Err(TransmissionError::Validation(
                "file_name no puede estar vacío".to_string(),
            ));
        }
        if file_name.contains('/') || file_name.contains('\\') || file_name == ".." {
            return Err(TransmissionError::Validation(format!(
                "file_name no puede contener rutas: '{}'",
                file_name
            )));
        }

        if self.file_size == 0 {
            return Err(TransmissionError::Validation(
                "file_size debe ser mayor que 0".to_string(),
            ));
        }

        Ok(NewTransmission {
            container_number,
            operation: self.operation,
            partner_code,
            file_name,
            file_size: self.file_size,
        })
    }
}

fn is_iso6346_shape(number: &str) -> bool {
    let bytes = number.as_bytes();
    bytes.len() == 11
        && bytes[..4].iter().all(|b| b.is_ascii_uppercase())
        && bytes[4..].iter().all(|b| b.is_ascii_digit())
}

/// Actualización parcial de un registro.
///
/// Sólo expone los campos mutables; `id`, `created_at` y la metadata
/// descriptiva no se pueden tocar desde aquí.
#[derive(Debug, Clone, Default)]
pub struct TransmissionPatch {
    pub status: Option<TransmissionStatus>,
    pub increment_attempts: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// `Some(None)` limpia el error
    pub error_message: Option<Option<String>>,
    pub acknowledgment_received_at: Option<DateTime<Utc>>,
    /// Si se define, el update falla con InvalidState cuando el estado actual no está en la lista
    pub expected_status: Option<Vec<TransmissionStatus>>,
}

impl TransmissionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TransmissionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn begin_attempt(mut self, at: DateTime<Utc>) -> Self {
        self.increment_attempts = true;
        self.last_attempt_at = Some(at);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(Some(message.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error_message = Some(None);
        self
    }

    pub fn acknowledged_at(mut self, at: DateTime<Utc>) -> Self {
        self.status = Some(TransmissionStatus::Acknowledged);
        self.acknowledgment_received_at = Some(at);
        self.error_message = Some(None);
        self
    }

    pub fn require_status(mut self, statuses: &[TransmissionStatus]) -> Self {
        self.expected_status = Some(statuses.to_vec());
        self
    }

    /// Aplica el patch sobre el registro. Lo comparten todas las implementaciones
    /// del store para que las reglas sean las mismas.
    pub fn apply_to(&self, record: &mut TransmissionRecord) -> Result<(), TransmissionError> {
        if record.status == TransmissionStatus::Acknowledged {
            return Err(TransmissionError::InvalidState(format!(
                "La transmisión {} ya fue confirmada (ACKNOWLEDGED)",
                record.id
            )));
        }
        if let Some(expected) = &self.expected_status {
            if !expected.contains(&record.status) {
                return Err(TransmissionError::InvalidState(format!(
                    "La transmisión {} está en {} (se esperaba {:?})",
                    record.id, record.status, expected
                )));
            }
        }

        if let Some(status) = self.status {
            record.status = status;
        }
        if self.increment_attempts {
            record.attempts += 1;
        }
        if let Some(at) = self.last_attempt_at {
            record.last_attempt_at = Some(at);
        }
        if let Some(error) = &self.error_message {
            record.error_message = error.clone().filter(|e| !e.is_empty());
        }
        if let Some(at) = self.acknowledgment_received_at {
            record.acknowledgment_received_at = Some(at);
        }

        if record.status == TransmissionStatus::Failed && record.error_message.is_none() {
            record.error_message = Some("Fallo sin detalle".to_string());
        }
        Ok(())
    }
}

/// Filtro para GET /api/transmissions
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryFilter {
    #[serde(default, deserialize_with = "from_query_str")]
    pub status: Option<TransmissionStatus>,
    #[serde(default, deserialize_with = "from_query_str")]
    pub operation: Option<EdiOperation>,
    pub container_number: Option<String>,
    pub partner_code: Option<String>,
}

/// Parámetro de query vía `FromStr` (sin distinguir mayúsculas); vacío = sin filtro.
fn from_query_str<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

impl HistoryFilter {
    pub fn matches(&self, record: &TransmissionRecord) -> bool {
        self.status.map_or(true, |s| record.status == s)
            && self.operation.map_or(true, |o| record.operation == o)
            && self
                .container_number
                .as_deref()
                .map_or(true, |c| record.container_number.eq_ignore_ascii_case(c.trim()))
            && self
                .partner_code
                .as_deref()
                .map_or(true, |p| record.partner_code == p.trim())
    }
}

/// Lo que recibe el transporte para un intento de envío.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmissionPayload {
    pub transmission_id: String,
    pub container_number: String,
    pub operation: EdiOperation,
    pub partner_code: String,
    pub file_name: String,
    pub file_size: u64,
    pub attempt: u32,
}

impl From<&TransmissionRecord> for TransmissionPayload {
    fn from(record: &TransmissionRecord) -> Self {
        TransmissionPayload {
            transmission_id: record.id.clone(),
            container_number: record.container_number.clone(),
            operation: record.operation,
            partner_code: record.partner_code.clone(),
            file_name: record.file_name.clone(),
            file_size: record.file_size,
            attempt: record.attempts,
        }
    }
}
