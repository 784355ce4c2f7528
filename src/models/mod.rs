//! models/mod.rs
//! Módulo raíz para modelos/estructuras compartidas.

pub mod ack_model;
pub mod transmission_model;
