//! services/mod.rs
//! Módulo que agrupa los "servicios" del núcleo de transmisión EDI.

pub mod ack_poller;
pub mod history_export;
pub mod retry_policy;
pub mod transmission_coordinator;
pub mod transmission_store;
pub mod transport;
