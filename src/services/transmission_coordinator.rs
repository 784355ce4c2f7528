//! services/transmission_coordinator.rs
//! Coordinador de transmisiones: máquina de estados, reintentos programados y poller.
//!
//! ```text
//! PENDING  --(intento)--> SENT | RETRYING | FAILED
//! SENT     --(acuse)----> ACKNOWLEDGED
//! SENT     --(reintento manual)--> RETRYING
//! RETRYING --(intento)--> SENT | RETRYING | FAILED
//! FAILED   --(reintento manual)--> RETRYING --(intento)--> SENT | FAILED
//! ```
//!
//! Un solo intento en vuelo por id: quien llega mientras otro intento está en
//! curso espera su resultado y no vuelve a llamar al transporte.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::transmission_config::PollerConfig;
use crate::errors::{ErrorCategory, TransmissionError, TransmissionResult, TransportError};
use crate::models::ack_model::TickReport;
use crate::models::transmission_model::{
    HistoryFilter, SubmitTransmissionRequest, TransmissionPatch, TransmissionPayload,
    TransmissionRecord, TransmissionStatus,
};
use crate::services::ack_poller::AcknowledgmentPoller;
use crate::services::history_export;
use crate::services::retry_policy::{RetryPolicyEngine, SEND_CLASS};
use crate::services::transmission_store::TransmissionStore;
use crate::services::transport::Transport;

/// Estados desde los que se puede lanzar un intento.
const ATTEMPTABLE: [TransmissionStatus; 2] =
    [TransmissionStatus::Pending, TransmissionStatus::Retrying];

/// Quién dispara el intento.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// Primer envío tras `submit` (o registro PENDING recuperado)
    Initial,
    /// Reintento automático programado cuando el registro tenía `expected_attempts`
    Scheduled { expected_attempts: u32 },
    /// Reintento manual
    Manual,
}

/// Fallo de entrega del último intento, para quienes esperaban ese intento.
#[derive(Debug, Clone)]
struct DeliveryFailure {
    category: ErrorCategory,
    message: String,
}

/// Lock de vuelo por id; guarda el fallo del intento que lo liberó.
type Flight = Arc<tokio::sync::Mutex<Option<DeliveryFailure>>>;

struct ScheduledRetry {
    generation: u64,
    token: CancellationToken,
}

struct CoordinatorInner {
    store: Arc<dyn TransmissionStore>,
    transport: Arc<dyn Transport>,
    policy: RetryPolicyEngine,
    poller: AcknowledgmentPoller,
    in_flight: Mutex<HashMap<String, Flight>>,
    scheduled: Mutex<HashMap<String, ScheduledRetry>>,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct TransmissionCoordinator {
    inner: Arc<CoordinatorInner>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TransmissionCoordinator {
    pub fn new(
        store: Arc<dyn TransmissionStore>,
        transport: Arc<dyn Transport>,
        policy: RetryPolicyEngine,
        poller_config: PollerConfig,
    ) -> Self {
        let poller = AcknowledgmentPoller::new(
            store.clone(),
            transport.clone(),
            policy.clone(),
            poller_config,
        );

        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                transport,
                policy,
                poller,
                in_flight: Mutex::new(HashMap::new()),
                scheduled: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn poller(&self) -> &AcknowledgmentPoller {
        &self.inner.poller
    }

    // ======================================================
    // API pública
    // ======================================================

    /// Crea el registro y hace el primer intento de envío.
    pub async fn submit(
        &self,
        req: SubmitTransmissionRequest,
    ) -> TransmissionResult<TransmissionRecord> {
        let new_transmission = req.validate()?;
        let record = TransmissionRecord::pending(new_transmission);
        let id = self.inner.store.create(record).await?;

        log::info!("(submit) Transmisión creada id={}", id);
        self.attempt(&id, Trigger::Initial).await
    }

    /// Reintento manual. Los intentos acumulados se conservan.
    pub async fn retry_transmission(&self, id: &str) -> TransmissionResult<TransmissionRecord> {
        let record = self.inner.store.get(id).await?;
        if record.status == TransmissionStatus::Acknowledged {
            return Err(TransmissionError::InvalidState(format!(
                "La transmisión {} ya fue confirmada, no se puede reintentar",
                id
            )));
        }

        log::info!(
            "(retry_transmission) Reintento manual id={} (status={}, attempts={})",
            id,
            record.status,
            record.attempts
        );
        self.attempt(id, Trigger::Manual).await
    }

    pub async fn get(&self, id: &str) -> TransmissionResult<TransmissionRecord> {
        self.inner.store.get(id).await
    }

    /// Historial (más reciente primero), opcionalmente filtrado.
    pub async fn get_history(
        &self,
        filter: Option<&HistoryFilter>,
    ) -> TransmissionResult<Vec<TransmissionRecord>> {
        let mut records = self.inner.store.export_all().await?;
        if let Some(filter) = filter {
            records.retain(|r| filter.matches(r));
        }
        records.reverse();
        Ok(records)
    }

    pub async fn export_history_as_csv(&self) -> TransmissionResult<String> {
        let records = self.inner.store.export_all().await?;
        Ok(history_export::records_to_csv(&records))
    }

    pub fn start_poller(&self) -> bool {
        self.inner.poller.start(&self.inner.shutdown)
    }

    pub async fn stop_poller(&self) -> bool {
        self.inner.poller.stop().await
    }

    pub async fn poll_once(&self) -> TickReport {
        self.inner.poller.tick().await
    }

    /// Cantidad de reintentos automáticos programados y aún no disparados.
    pub fn scheduled_retry_count(&self) -> usize {
        lock(&self.inner.scheduled).len()
    }

    /// Cancela los reintentos programados y detiene el poller.
    pub async fn shutdown(&self) {
        log::info!("(shutdown) Cancelando reintentos programados y poller...");
        self.inner.shutdown.cancel();
        lock(&self.inner.scheduled).clear();
        self.inner.poller.stop().await;
    }

    /// Recupera registros que quedaron a medias tras un reinicio:
    /// - PENDING: se lanza el primer intento.
    /// - RETRYING con reintentos disponibles: se vuelve a programar.
    /// - RETRYING sin reintentos: FAILED, queda para reintento manual.
    pub async fn resume_interrupted(&self) -> TransmissionResult<usize> {
        let records = self.inner.store.export_all().await?;
        let mut resumed = 0;

        for record in records {
            match record.status {
                TransmissionStatus::Pending => {
                    let this = self.clone();
                    let id = record.id.clone();
                    tokio::spawn(async move {
                        if let Err(e) = this.attempt(&id, Trigger::Initial).await {
                            log::error!("(resume_interrupted) id={} terminó en error: {}", id, e);
                        }
                    });
                    resumed += 1;
                }
                TransmissionStatus::Retrying
                    if !self.inner.policy.retries_exhausted(SEND_CLASS, record.attempts) =>
                {
                    let delay = self
                        .inner
                        .policy
                        .next_delay(SEND_CLASS, record.attempts.saturating_sub(1));
                    self.schedule_retry(record.id.clone(), record.attempts, delay);
                    resumed += 1;
                }
                TransmissionStatus::Retrying => {
                    let patch = TransmissionPatch::new()
                        .status(TransmissionStatus::Failed)
                        .error(format!(
                            "Reintento interrumpido por reinicio. Último error: {}",
                            record.error_message.as_deref().unwrap_or("desconocido")
                        ))
                        .require_status(&[TransmissionStatus::Retrying]);
                    match self.inner.store.update(&record.id, patch).await {
                        Ok(_) => log::warn!(
                            "(resume_interrupted) id={} sin reintentos disponibles, marcado FAILED",
                            record.id
                        ),
                        Err(TransmissionError::InvalidState(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                _ => {}
            }
        }

        log::info!("(resume_interrupted) {} transmisiones reanudadas", resumed);
        Ok(resumed)
    }

    // ======================================================
    // Intentos
    // ======================================================

    fn flight_lock(&self, id: &str) -> Flight {
        lock(&self.inner.in_flight)
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    fn release_flight_lock(&self, id: &str, flight: &Flight) {
        let mut in_flight = lock(&self.inner.in_flight);
        // Sólo el mapa y este llamador: nadie más espera por el id
        if Arc::strong_count(flight) <= 2 {
            if let Some(current) = in_flight.get(id) {
                if Arc::ptr_eq(current, flight) {
                    in_flight.remove(id);
                }
            }
        }
    }

    async fn attempt(&self, id: &str, trigger: Trigger) -> TransmissionResult<TransmissionRecord> {
        let flight = self.flight_lock(id);

        let result = match flight.clone().try_lock_owned() {
            Ok(mut guard) => {
                let result = self.attempt_exclusive(id, trigger).await;
                *guard = match &result {
                    Err(TransmissionError::Delivery {
                        category, message, ..
                    }) => Some(DeliveryFailure {
                        category: *category,
                        message: message.clone(),
                    }),
                    _ => None,
                };
                drop(guard);
                result
            }
            Err(_) => {
                log::debug!(
                    "(attempt) id={} ya tiene un intento en curso, esperando su resultado",
                    id
                );
                let failure = flight.clone().lock_owned().await.clone();
                self.joined_outcome(id, failure).await
            }
        };

        self.release_flight_lock(id, &flight);
        result
    }

    /// Resultado para quien esperó el intento de otro llamador: el mismo
    /// `Delivery` si ese intento dejó el registro en FAILED.
    async fn joined_outcome(
        &self,
        id: &str,
        failure: Option<DeliveryFailure>,
    ) -> TransmissionResult<TransmissionRecord> {
        let record = self.inner.store.get(id).await?;
        match failure {
            Some(DeliveryFailure { category, message })
                if record.status == TransmissionStatus::Failed =>
            {
                Err(TransmissionError::Delivery {
                    record: Box::new(record),
                    category,
                    message,
                })
            }
            _ => Ok(record),
        }
    }

    async fn attempt_exclusive(
        &self,
        id: &str,
        trigger: Trigger,
    ) -> TransmissionResult<TransmissionRecord> {
        let current = self.inner.store.get(id).await?;

        match trigger {
            Trigger::Initial => {
                if current.status != TransmissionStatus::Pending {
                    return Ok(current);
                }
            }
            Trigger::Scheduled { expected_attempts } => {
                // El registro pudo confirmarse o reintentarse a mano mientras esperábamos
                if current.status != TransmissionStatus::Retrying
                    || current.attempts != expected_attempts
                {
                    log::info!(
                        "(attempt) Reintento obsoleto para id={} (status={}, attempts={}), se descarta",
                        id,
                        current.status,
                        current.attempts
                    );
                    return Ok(current);
                }
            }
            Trigger::Manual => {
                self.cancel_scheduled(id);
                if current.status != TransmissionStatus::Retrying {
                    self.inner
                        .store
                        .update(
                            id,
                            TransmissionPatch::new()
                                .status(TransmissionStatus::Retrying)
                                .require_status(&[
                                    TransmissionStatus::Pending,
                                    TransmissionStatus::Sent,
                                    TransmissionStatus::Failed,
                                ]),
                        )
                        .await?;
                }
            }
        }

        self.send(id).await
    }

    /// Un intento contra el transporte. Se asume el lock de vuelo tomado.
    async fn send(&self, id: &str) -> TransmissionResult<TransmissionRecord> {
        let record = self
            .inner
            .store
            .update(
                id,
                TransmissionPatch::new()
                    .begin_attempt(Utc::now())
                    .require_status(&ATTEMPTABLE),
            )
            .await?;
        let payload = TransmissionPayload::from(&record);

        log::info!(
            "(send) Enviando id={} ({} {}) a partner={}, intento #{}",
            id,
            record.operation,
            record.container_number,
            record.partner_code,
            record.attempts
        );

        let outcome = tokio::select! {
            res = self.inner.transport.send(&payload) => res,
            _ = self.inner.shutdown.cancelled() => {
                log::warn!("(send) Envío de id={} interrumpido por apagado", id);
                return self.record_interruption(id).await;
            }
        };

        match outcome {
            Ok(ack) => {
                let patch = TransmissionPatch::new()
                    .status(TransmissionStatus::Sent)
                    .clear_error()
                    .require_status(&ATTEMPTABLE);
                let updated = self.apply_outcome(id, patch).await?;
                log::info!(
                    "(send) id={} SENT (ref={:?}), esperando acuse",
                    id,
                    ack.reference
                );
                Ok(updated)
            }
            Err(err) => self.handle_failure(id, &record, err).await,
        }
    }

    async fn handle_failure(
        &self,
        id: &str,
        record: &TransmissionRecord,
        err: TransportError,
    ) -> TransmissionResult<TransmissionRecord> {
        let classification = self.inner.policy.classify(&err);
        let retry_index = record.attempts.saturating_sub(1);
        let message = err.to_string();

        if self
            .inner
            .policy
            .should_retry_for(&err, retry_index, SEND_CLASS)
        {
            let delay = self.inner.policy.next_delay(SEND_CLASS, retry_index);
            let patch = TransmissionPatch::new()
                .status(TransmissionStatus::Retrying)
                .error(message.clone())
                .require_status(&ATTEMPTABLE);
            let updated = self.apply_outcome(id, patch).await?;

            if updated.status == TransmissionStatus::Retrying {
                log::warn!(
                    "(send) id={} falló ({}), reintento en {:?} (intento {}/{})",
                    id,
                    message,
                    delay,
                    updated.attempts,
                    self.inner.policy.config(SEND_CLASS).max_retries + 1
                );
                self.schedule_retry(id.to_string(), updated.attempts, delay);
            }
            return Ok(updated);
        }

        let patch = TransmissionPatch::new()
            .status(TransmissionStatus::Failed)
            .error(message.clone())
            .require_status(&ATTEMPTABLE);
        let updated = self.apply_outcome(id, patch).await?;
        if updated.status != TransmissionStatus::Failed {
            return Ok(updated);
        }

        log::error!(
            "(send) id={} FAILED tras {} intento(s) [{:?}]: {}",
            id,
            updated.attempts,
            classification.category,
            message
        );
        let category = if classification.retryable {
            // Transitorio pero sin reintentos restantes
            ErrorCategory::Transient
        } else {
            classification.category
        };
        Err(TransmissionError::Delivery {
            record: Box::new(updated),
            category,
            message,
        })
    }

    /// Guarda el resultado de un intento. Si el registro se confirmó mientras
    /// el envío estaba en curso, se devuelve tal cual sin tocarlo.
    async fn apply_outcome(
        &self,
        id: &str,
        patch: TransmissionPatch,
    ) -> TransmissionResult<TransmissionRecord> {
        match self.inner.store.update(id, patch).await {
            Err(TransmissionError::InvalidState(msg)) => {
                log::info!("(apply_outcome) id={} cambió durante el envío: {}", id, msg);
                self.inner.store.get(id).await
            }
            other => other,
        }
    }

    async fn record_interruption(&self, id: &str) -> TransmissionResult<TransmissionRecord> {
        let patch = TransmissionPatch::new()
            .error("Envío interrumpido por apagado del coordinador")
            .require_status(&ATTEMPTABLE);
        self.apply_outcome(id, patch).await
    }

    // ======================================================
    // Reintentos programados
    // ======================================================

    fn schedule_retry(&self, id: String, expected_attempts: u32, delay: Duration) {
        let token = self.inner.shutdown.child_token();
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);

        if let Some(previous) = lock(&self.inner.scheduled).insert(
            id.clone(),
            ScheduledRetry {
                generation,
                token: token.clone(),
            },
        ) {
            previous.token.cancel();
        }

        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    log::debug!("(schedule_retry) Reintento de id={} cancelado", id);
                    this.forget_scheduled(&id, generation);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            this.forget_scheduled(&id, generation);
            // Los fallos quedan registrados en el propio registro
            if let Err(e) = this
                .attempt(&id, Trigger::Scheduled { expected_attempts })
                .await
            {
                log::error!("(schedule_retry) Reintento de id={} terminó en error: {}", id, e);
            }
        });
    }

    fn cancel_scheduled(&self, id: &str) {
        if let Some(scheduled) = lock(&self.inner.scheduled).remove(id) {
            scheduled.token.cancel();
            log::debug!("(cancel_scheduled) Reintento programado de id={} cancelado", id);
        }
    }

    fn forget_scheduled(&self, id: &str, generation: u64) {
        let mut scheduled = lock(&self.inner.scheduled);
        if scheduled.get(id).map(|s| s.generation) == Some(generation) {
            scheduled.remove(id);
        }
    }
}
