//! services/history_export.rs
//! Exportación del historial de transmisiones a CSV (RFC 4180).

use chrono::{DateTime, SecondsFormat, Utc};

use crate::models::transmission_model::TransmissionRecord;

const HEADER: &str = "id,container_number,operation,partner_code,file_name,file_size,status,attempts,last_attempt_at,created_at,error_message,acknowledgment_received_at";

fn escape(field: &str) -> String {
    if field.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn ts(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

pub fn records_to_csv(records: &[TransmissionRecord]) -> String {
    let mut out = String::with_capacity(HEADER.len() + records.len() * 160);
    out.push_str(HEADER);
    out.push_str("\r\n");

    for r in records {
        let row = [
            escape(&r.id),
            escape(&r.container_number),
            r.operation.as_str().to_string(),
            escape(&r.partner_code),
            escape(&r.file_name),
            r.file_size.to_string(),
            r.status.as_str().to_string(),
            r.attempts.to_string(),
            ts(r.last_attempt_at),
            ts(Some(r.created_at)),
            escape(r.error_message.as_deref().unwrap_or_default()),
            ts(r.acknowledgment_received_at),
        ];
        out.push_str(&row.join(","));
        out.push_str("\r\n");
    }

    out
}
