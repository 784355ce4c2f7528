//! models/ack_model.rs
//! Acuses de recibo del transporte y reporte de cada pasada del poller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::transmission_model::{TransmissionRecord, TransmissionStatus};

/// Respuesta del transporte a un envío exitoso.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportAck {
    /// Referencia que devuelve el relay (si la hay)
    pub reference: Option<String>,
}

/// Estado del acuse de un partner para una transmisión.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Acknowledged { received_at: Option<DateTime<Utc>> },
    NotYet,
}

/// Transmisión que lleva demasiado tiempo sin acuse ni reintentos pendientes.
#[derive(Debug, Clone, Serialize)]
pub struct StaleTransmission {
    pub id: String,
    pub container_number: String,
    pub partner_code: String,
    pub status: TransmissionStatus,
    pub attempts: u32,
    pub pending_since: DateTime<Utc>,
    pub pending_for_secs: i64,
}

impl StaleTransmission {
    pub fn from_record(record: &TransmissionRecord, now: DateTime<Utc>) -> Self {
        let pending_since = record.pending_since();
        StaleTransmission {
            id: record.id.clone(),
            container_number: record.container_number.clone(),
            partner_code: record.partner_code.clone(),
            status: record.status,
            attempts: record.attempts,
            pending_since,
            pending_for_secs: (now - pending_since).num_seconds(),
        }
    }
}

/// Resultado de una pasada de conciliación.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// true si la pasada no corrió porque otra seguía en curso
    pub skipped: bool,
    pub checked: usize,
    pub acknowledged: Vec<String>,
    pub stale: Vec<StaleTransmission>,
    pub lookup_errors: usize,
}

impl TickReport {
    pub fn skipped() -> Self {
        TickReport {
            skipped: true,
            ..Default::default()
        }
    }
}
