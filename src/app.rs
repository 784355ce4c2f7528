//! app.rs
use crate::handlers::{poller_handler, transmission_handler};
use actix_web::web;

pub fn init_app(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(
                web::scope("/transmissions")
                    .route(
                        "",
                        web::post().to(transmission_handler::submit_transmission_endpoint),
                    )
                    .route(
                        "",
                        web::get().to(transmission_handler::list_transmissions_endpoint),
                    )
                    // antes de "/{id}" para que "export" no se tome como id
                    .route(
                        "/export",
                        web::get().to(transmission_handler::export_transmissions_endpoint),
                    )
                    .route(
                        "/{id}",
                        web::get().to(transmission_handler::get_transmission_endpoint),
                    )
                    .route(
                        "/{id}/retry",
                        web::post().to(transmission_handler::retry_transmission_endpoint),
                    ),
            )
            .service(
                web::scope("/poller")
                    .route("/start", web::post().to(poller_handler::start_poller_endpoint))
                    .route("/stop", web::post().to(poller_handler::stop_poller_endpoint))
                    .route("/status", web::get().to(poller_handler::poller_status_endpoint))
                    .route("/tick", web::post().to(poller_handler::poller_tick_endpoint)),
            ),
    );
}
