//! handlers/poller_handler.rs
use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::services::transmission_coordinator::TransmissionCoordinator;

fn status_body(coordinator: &TransmissionCoordinator) -> serde_json::Value {
    let config = coordinator.poller().config();
    json!({
        "running": coordinator.poller().is_running(),
        "interval_secs": config.interval.as_secs(),
        "stale_after_secs": config.stale_after.as_secs(),
        "scheduled_retries": coordinator.scheduled_retry_count()
    })
}

/// POST /api/poller/start
pub async fn start_poller_endpoint(
    coordinator: web::Data<TransmissionCoordinator>,
) -> HttpResponse {
    let started = coordinator.start_poller();
    let mut body = status_body(&coordinator);
    body["changed"] = json!(started);
    HttpResponse::Ok().json(body)
}

/// POST /api/poller/stop
pub async fn stop_poller_endpoint(
    coordinator: web::Data<TransmissionCoordinator>,
) -> HttpResponse {
    let stopped = coordinator.stop_poller().await;
    let mut body = status_body(&coordinator);
    body["changed"] = json!(stopped);
    HttpResponse::Ok().json(body)
}

/// GET /api/poller/status
pub async fn poller_status_endpoint(
    coordinator: web::Data<TransmissionCoordinator>,
) -> HttpResponse {
    HttpResponse::Ok().json(status_body(&coordinator))
}

/// POST /api/poller/tick
pub async fn poller_tick_endpoint(
    coordinator: web::Data<TransmissionCoordinator>,
) -> HttpResponse {
    let report = coordinator.poll_once().await;
    HttpResponse::Ok().json(report)
}
