//! tests/support.rs
//! Utilidades compartidas por las pruebas: transporte guionado y helpers.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::retry_config::{RetryConfig, RetrySettings};
use crate::config::transmission_config::PollerConfig;
use crate::errors::TransportError;
use crate::models::ack_model::{AckStatus, TransportAck};
use crate::models::transmission_model::{
    EdiOperation, SubmitTransmissionRequest, TransmissionPayload, TransmissionRecord,
    TransmissionStatus,
};
use crate::services::retry_policy::RetryPolicyEngine;
use crate::services::transmission_coordinator::TransmissionCoordinator;
use crate::services::transmission_store::{MemoryTransmissionStore, TransmissionStore};
use crate::services::transport::Transport;

/// Transporte de prueba: responde según un guion y cuenta llamadas.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<TransportAck, TransportError>>>,
    /// Respuesta cuando el guion se agota
    fallback: Mutex<Result<TransportAck, TransportError>>,
    send_delay: Duration,
    ack_delay: Duration,
    acks: Mutex<HashMap<String, Result<AckStatus, TransportError>>>,
    send_calls: AtomicUsize,
    ack_calls: AtomicUsize,
    sent_payloads: Mutex<Vec<TransmissionPayload>>,
}

impl ScriptedTransport {
    pub fn succeeding() -> Self {
        Self::with_script(Vec::new(), Ok(TransportAck::default()))
    }

    pub fn failing(code: &str) -> Self {
        Self::with_script(Vec::new(), Err(network(code)))
    }

    pub fn with_script(
        script: Vec<Result<TransportAck, TransportError>>,
        fallback: Result<TransportAck, TransportError>,
    ) -> Self {
        ScriptedTransport {
            script: Mutex::new(script.into()),
            fallback: Mutex::new(fallback),
            send_delay: Duration::ZERO,
            ack_delay: Duration::ZERO,
            acks: Mutex::new(HashMap::new()),
            send_calls: AtomicUsize::new(0),
            ack_calls: AtomicUsize::new(0),
            sent_payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    pub fn ack_delay(mut self, delay: Duration) -> Self {
        self.ack_delay = delay;
        self
    }

    pub fn set_fallback(&self, result: Result<TransportAck, TransportError>) {
        *self.fallback.lock().unwrap() = result;
    }

    pub fn acknowledge(&self, id: &str) {
        self.acks.lock().unwrap().insert(
            id.to_string(),
            Ok(AckStatus::Acknowledged { received_at: None }),
        );
    }

    pub fn fail_ack_lookup(&self, id: &str, code: &str) {
        self.acks
            .lock()
            .unwrap()
            .insert(id.to_string(), Err(network(code)));
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn ack_calls(&self) -> usize {
        self.ack_calls.load(Ordering::SeqCst)
    }

    pub fn sent_payloads(&self) -> Vec<TransmissionPayload> {
        self.sent_payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, payload: &TransmissionPayload) -> Result<TransportAck, TransportError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.sent_payloads.lock().unwrap().push(payload.clone());
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => self.fallback.lock().unwrap().clone(),
        }
    }

    async fn check_acknowledgment(
        &self,
        transmission_id: &str,
    ) -> Result<AckStatus, TransportError> {
        self.ack_calls.fetch_add(1, Ordering::SeqCst);
        if !self.ack_delay.is_zero() {
            tokio::time::sleep(self.ack_delay).await;
        }
        self.acks
            .lock()
            .unwrap()
            .get(transmission_id)
            .cloned()
            .unwrap_or(Ok(AckStatus::NotYet))
    }
}

pub fn network(code: &str) -> TransportError {
    TransportError::new(code, format!("simulated {}", code))
}

/// Reintentos rápidos para que las pruebas corran en milisegundos.
pub fn fast_settings(write_base: Duration) -> RetrySettings {
    let fast = |max_retries: u32, base: Duration| RetryConfig {
        max_retries,
        base_delay: base,
        max_delay: base * 4,
        backoff_multiplier: 2.0,
    };
    RetrySettings {
        read: fast(3, Duration::from_millis(5)),
        write: fast(2, write_base),
        delete: fast(2, write_base),
    }
}

pub fn quiet_poller() -> PollerConfig {
    PollerConfig {
        interval: Duration::from_secs(3600),
        stale_after: Duration::from_secs(3600),
        lookup_concurrency: 2,
    }
}

pub struct Harness {
    pub coordinator: TransmissionCoordinator,
    pub store: Arc<MemoryTransmissionStore>,
    pub transport: Arc<ScriptedTransport>,
}

pub fn harness(transport: ScriptedTransport) -> Harness {
    harness_with(transport, Duration::from_millis(10), quiet_poller())
}

pub fn harness_with(
    transport: ScriptedTransport,
    write_base: Duration,
    poller: PollerConfig,
) -> Harness {
    let store = Arc::new(MemoryTransmissionStore::new());
    let transport = Arc::new(transport);
    let coordinator = TransmissionCoordinator::new(
        store.clone(),
        transport.clone(),
        RetryPolicyEngine::new(fast_settings(write_base)),
        poller,
    );
    Harness {
        coordinator,
        store,
        transport,
    }
}

pub fn gate_in(container: &str) -> SubmitTransmissionRequest {
    SubmitTransmissionRequest {
        container_number: container.to_string(),
        operation: EdiOperation::GateIn,
        partner_code: "CIABJ31".to_string(),
        file_name: format!("CODECO_{}.edi", container),
        file_size: 512,
    }
}

/// Espera (tiempo real) hasta que el registro llegue a `status`.
pub async fn wait_for_status(
    store: &dyn TransmissionStore,
    id: &str,
    status: TransmissionStatus,
) -> TransmissionRecord {
    for _ in 0..400 {
        let record = store.get(id).await.expect("record exists");
        if record.status == status {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let record = store.get(id).await.expect("record exists");
    panic!(
        "timeout esperando {} para {}: quedó en {} (attempts={})",
        status, id, record.status, record.attempts
    );
}
