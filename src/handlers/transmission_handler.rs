//! handlers/transmission_handler.rs
use actix_web::{http::StatusCode, web, HttpResponse};
use serde_json::json;

use crate::errors::{ErrorCategory, TransmissionError};
use crate::models::transmission_model::{HistoryFilter, SubmitTransmissionRequest};
use crate::services::transmission_coordinator::TransmissionCoordinator;

/// Traduce un error del núcleo a respuesta HTTP.
pub fn error_response(e: &TransmissionError) -> HttpResponse {
    let status = match e {
        TransmissionError::Validation(_) => StatusCode::BAD_REQUEST,
        TransmissionError::Conflict(_) | TransmissionError::InvalidState(_) => StatusCode::CONFLICT,
        TransmissionError::NotFound(_) => StatusCode::NOT_FOUND,
        TransmissionError::Delivery { category, .. } => match category {
            ErrorCategory::Validation | ErrorCategory::MalformedRequest => StatusCode::BAD_REQUEST,
            ErrorCategory::Permission => StatusCode::FORBIDDEN,
            ErrorCategory::Conflict => StatusCode::CONFLICT,
            ErrorCategory::Transient | ErrorCategory::Unknown => StatusCode::BAD_GATEWAY,
        },
        TransmissionError::Storage(_) | TransmissionError::Migration(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    if status.is_server_error() {
        log::error!("(error_response) {}", e);
    }

    let mut body = json!({
        "error": status.canonical_reason().unwrap_or("Error"),
        "details": e.to_string()
    });
    if let TransmissionError::Delivery {
        record, category, ..
    } = e
    {
        body["category"] = json!(category);
        body["transmission"] = json!(record);
    }

    HttpResponse::build(status).json(body)
}

/// POST /api/transmissions
pub async fn submit_transmission_endpoint(
    coordinator: web::Data<TransmissionCoordinator>,
    body: web::Json<SubmitTransmissionRequest>,
) -> HttpResponse {
    match coordinator.submit(body.into_inner()).await {
        Ok(record) => HttpResponse::Ok().json(record),
        Err(e) => error_response(&e),
    }
}

/// GET /api/transmissions
pub async fn list_transmissions_endpoint(
    coordinator: web::Data<TransmissionCoordinator>,
    query: web::Query<HistoryFilter>,
) -> HttpResponse {
    match coordinator.get_history(Some(&query.into_inner())).await {
        Ok(records) => HttpResponse::Ok().json(json!({
            "total": records.len(),
            "items": records
        })),
        Err(e) => error_response(&e),
    }
}

/// GET /api/transmissions/export
pub async fn export_transmissions_endpoint(
    coordinator: web::Data<TransmissionCoordinator>,
) -> HttpResponse {
    match coordinator.export_history_as_csv().await {
        Ok(csv) => HttpResponse::Ok()
            .content_type("text/csv; charset=utf-8")
            .insert_header((
                "Content-Disposition",
                "attachment; filename=\"edi_transmissions.csv\"",
            ))
            .body(csv),
        Err(e) => error_response(&e),
    }
}

/// GET /api/transmissions/{id}
pub async fn get_transmission_endpoint(
    coordinator: web::Data<TransmissionCoordinator>,
    path: web::Path<String>,
) -> HttpResponse {
    let id = path.into_inner();

    match coordinator.get(&id).await {
        Ok(record) => HttpResponse::Ok().json(record),
        Err(e) => error_response(&e),
    }
}

/// POST /api/transmissions/{id}/retry
pub async fn retry_transmission_endpoint(
    coordinator: web::Data<TransmissionCoordinator>,
    path: web::Path<String>,
) -> HttpResponse {
    let id = path.into_inner();

    match coordinator.retry_transmission(&id).await {
        Ok(record) => HttpResponse::Ok().json(record),
        Err(e) => error_response(&e),
    }
}
