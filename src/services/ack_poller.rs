//! services/ack_poller.rs
//! Poller de acuses: concilia los registros SENT/RETRYING contra el transporte.

use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::transmission_config::PollerConfig;
use crate::errors::TransmissionError;
use crate::models::ack_model::{AckStatus, StaleTransmission, TickReport};
use crate::models::transmission_model::{
    TransmissionPatch, TransmissionRecord, TransmissionStatus,
};
use crate::services::retry_policy::{RetryPolicyEngine, SEND_CLASS};
use crate::services::transmission_store::TransmissionStore;
use crate::services::transport::Transport;

struct PollerTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct PollerInner {
    store: Arc<dyn TransmissionStore>,
    transport: Arc<dyn Transport>,
    policy: RetryPolicyEngine,
    config: PollerConfig,
    task: Mutex<Option<PollerTask>>,
    ticking: AtomicBool,
}

/// Libera el flag de pasada en curso aunque la pasada se cancele a mitad.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct AcknowledgmentPoller {
    inner: Arc<PollerInner>,
}

impl AcknowledgmentPoller {
    pub fn new(
        store: Arc<dyn TransmissionStore>,
        transport: Arc<dyn Transport>,
        policy: RetryPolicyEngine,
        config: PollerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                store,
                transport,
                policy,
                config,
                task: Mutex::new(None),
                ticking: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.lock_task()
            .as_ref()
            .map_or(false, |t| !t.handle.is_finished())
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<PollerTask>> {
        self.inner
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Arranca el loop periódico. Devuelve false si ya estaba corriendo.
    /// El loop también se detiene cuando se cancela `parent`; si ya está
    /// cancelado no arranca.
    pub fn start(&self, parent: &CancellationToken) -> bool {
        if parent.is_cancelled() {
            log::warn!("(AcknowledgmentPoller::start) El coordinador ya se apagó, no se arranca");
            return false;
        }

        let mut task = self.lock_task();
        if task.as_ref().map_or(false, |t| !t.handle.is_finished()) {
            return false;
        }

        let token = parent.child_token();
        let poller = self.clone();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move { poller.run(loop_token).await });

        *task = Some(PollerTask { token, handle });
        log::info!(
            "(AcknowledgmentPoller::start) Poller iniciado, intervalo={:?}",
            self.inner.config.interval
        );
        true
    }

    /// Detiene el loop y espera a que termine. Devuelve false si no estaba corriendo.
    pub async fn stop(&self) -> bool {
        let task = self.lock_task().take();
        let Some(task) = task else {
            return false;
        };

        task.token.cancel();
        if let Err(e) = task.handle.await {
            log::error!("(AcknowledgmentPoller::stop) La tarea del poller falló: {:?}", e);
        }
        log::info!("(AcknowledgmentPoller::stop) Poller detenido");
        true
    }

    async fn run(self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.inner.config.interval);
        // Si una pasada se alarga, las que vencieron mientras tanto se saltan
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            tokio::select! {
                _ = token.cancelled() => break,
                report = self.tick() => {
                    if !report.acknowledged.is_empty() || !report.stale.is_empty() {
                        log::info!(
                            "(AcknowledgmentPoller::run) checked={}, acknowledged={}, stale={}",
                            report.checked,
                            report.acknowledged.len(),
                            report.stale.len()
                        );
                    } else {
                        log::debug!("(AcknowledgmentPoller::run) checked={}", report.checked);
                    }
                }
            }
        }
    }

    /// Una pasada de conciliación. Si otra pasada sigue en curso, no hace nada
    /// y devuelve un reporte `skipped`.
    pub async fn tick(&self) -> TickReport {
        if self
            .inner
            .ticking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("(AcknowledgmentPoller::tick) Pasada anterior en curso, se omite");
            return TickReport::skipped();
        }
        let _guard = TickGuard(&self.inner.ticking);

        let pending = match self.inner.store.list_pending().await {
            Ok(records) => records,
            Err(e) => {
                log::error!("(AcknowledgmentPoller::tick) No se pudo listar pendientes: {}", e);
                return TickReport::default();
            }
        };

        let now = Utc::now();
        let mut report = TickReport {
            checked: pending.len(),
            ..Default::default()
        };

        let transport = self.inner.transport.clone();
        let lookups: Vec<_> = stream::iter(pending)
            .map(|record| {
                let transport = transport.clone();
                async move {
                    let status = transport.check_acknowledgment(&record.id).await;
                    (record, status)
                }
            })
            .buffered(self.inner.config.lookup_concurrency.max(1))
            .collect()
            .await;

        for (record, status) in lookups {
            match status {
                Ok(AckStatus::Acknowledged { received_at }) => {
                    if self.acknowledge(&record, received_at.unwrap_or(now)).await {
                        report.acknowledged.push(record.id.clone());
                    }
                }
                Ok(AckStatus::NotYet) => {
                    if self.is_stale(&record, now) {
                        log::warn!(
                            "(AcknowledgmentPoller::tick) Sin acuse desde {} para id={} ({} {}, partner={})",
                            record.pending_since(),
                            record.id,
                            record.operation,
                            record.container_number,
                            record.partner_code
                        );
                        report.stale.push(StaleTransmission::from_record(&record, now));
                    }
                }
                Err(e) => {
                    report.lookup_errors += 1;
                    log::warn!(
                        "(AcknowledgmentPoller::tick) Fallo consultando acuse de id={}: {}",
                        record.id,
                        e
                    );
                }
            }
        }

        report
    }

    async fn acknowledge(&self, record: &TransmissionRecord, at: DateTime<Utc>) -> bool {
        let patch = TransmissionPatch::new()
            .acknowledged_at(at)
            .require_status(&[TransmissionStatus::Sent, TransmissionStatus::Retrying]);

        match self.inner.store.update(&record.id, patch).await {
            Ok(_) => {
                log::info!(
                    "(AcknowledgmentPoller::acknowledge) id={} ACKNOWLEDGED ({} {})",
                    record.id,
                    record.operation,
                    record.container_number
                );
                true
            }
            // El registro cambió desde que se listó
            Err(TransmissionError::InvalidState(msg)) => {
                log::debug!("(AcknowledgmentPoller::acknowledge) {}", msg);
                false
            }
            Err(e) => {
                log::error!(
                    "(AcknowledgmentPoller::acknowledge) No se pudo marcar id={}: {}",
                    record.id,
                    e
                );
                false
            }
        }
    }

    /// Pendiente más allá del umbral y sin reintentos automáticos por delante.
    fn is_stale(&self, record: &TransmissionRecord, now: DateTime<Utc>) -> bool {
        let stale_after = chrono::Duration::from_std(self.inner.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        if now - record.pending_since() <= stale_after {
            return false;
        }

        match record.status {
            TransmissionStatus::Sent => true,
            TransmissionStatus::Retrying => self
                .inner
                .policy
                .retries_exhausted(SEND_CLASS, record.attempts),
            _ => false,
        }
    }
}
