//! handlers/mod.rs
pub mod poller_handler;
pub mod transmission_handler;
