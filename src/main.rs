use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use dotenv::dotenv;
use std::path::Path;
use std::sync::Arc;

use crate::config::retry_config::RetrySettings;
use crate::config::transmission_config::{PollerConfig, ServerConfig, TransferConfig};
use crate::logger::init_logger;
use crate::services::retry_policy::RetryPolicyEngine;
use crate::services::transmission_coordinator::TransmissionCoordinator;
use crate::services::transmission_store::{
    MemoryTransmissionStore, SqliteTransmissionStore, TransmissionStore,
};
use crate::services::transport::RelayTransport;

mod app;
mod config;
mod errors;
mod handlers;
mod logger;
mod models;
mod services;

#[cfg(test)]
mod tests;

/// Crea la carpeta del archivo SQLite si hace falta (p.ej. ./data).
fn ensure_db_dir(database_url: &str) -> Result<()> {
    let path = database_url
        .trim_start_matches("sqlite:")
        .trim_start_matches("//")
        .split('?')
        .next()
        .unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("No se pudo crear directorio {}", parent.display()))?;
        }
    }
    Ok(())
}

async fn setup_store(database_url: &str) -> Result<Arc<dyn TransmissionStore>> {
    if database_url == "memory" {
        log::warn!("Usando store en memoria: el historial se pierde al reiniciar");
        return Ok(Arc::new(MemoryTransmissionStore::new()));
    }

    ensure_db_dir(database_url)?;
    log::info!("Conectando a SQLite en {}", database_url);

    let store = SqliteTransmissionStore::connect(database_url)
        .await
        .context("No se pudo conectar a la base de datos SQLite")?;
    store
        .run_migrations()
        .await
        .context("Fallo en migraciones de 'transmissions'")?;
    Ok(Arc::new(store))
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv().ok(); // Cargar .env al inicio
    init_logger();

    let server_config = ServerConfig::from_env();
    let store = setup_store(&server_config.database_url).await?;

    let transport =
        RelayTransport::new(TransferConfig::from_env()).context("No se pudo crear el transporte")?;
    let policy = RetryPolicyEngine::new(RetrySettings::from_env());
    let coordinator = TransmissionCoordinator::new(
        store,
        Arc::new(transport),
        policy,
        PollerConfig::from_env(),
    );

    // Lo que quedó a medias antes del reinicio
    coordinator
        .resume_interrupted()
        .await
        .context("No se pudieron recuperar transmisiones interrumpidas")?;
    coordinator.start_poller();

    log::info!(
        "Levantando servidor en {}:{}",
        server_config.host,
        server_config.port
    );
    let app_coordinator = coordinator.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_coordinator.clone()))
            .configure(app::init_app)
    })
    .workers(1)
    .bind((server_config.host.as_str(), server_config.port))?
    .run()
    .await?;

    coordinator.shutdown().await;
    log::info!("Servidor detenido");
    Ok(())
}
