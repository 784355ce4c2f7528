//! logger.rs
//! Configuración del logger usando env_logger.

use log::LevelFilter;

pub fn init_logger() {
    // RUST_LOG define el nivel; si no está, "info".
    let log_env = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_env));

    // sqlx loguea cada query en info; sólo interesan sus avisos
    if !std::env::var("RUST_LOG").map_or(false, |v| v.contains("sqlx")) {
        builder.filter_module("sqlx", LevelFilter::Warn);
    }

    builder.format_timestamp_secs().init();
}
