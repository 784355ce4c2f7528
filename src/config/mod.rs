//! config/mod.rs
//! Configuración del servicio (variables de entorno / .env).

pub mod retry_config;
pub mod transmission_config;

use std::str::FromStr;

/// Lee una variable de entorno; si falta o no se puede parsear, usa el default.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                log::warn!("(config) Valor inválido para {}='{}', usando default", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}
