//! tests/poller_tests.rs
//! Pruebas del poller de acuses.

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::transmission_config::PollerConfig;
    use crate::models::ack_model::TransportAck;
    use crate::models::transmission_model::{
        TransmissionPatch, TransmissionRecord, TransmissionStatus,
    };
    use crate::services::transmission_store::TransmissionStore;
    use crate::tests::support::{
        gate_in, harness, harness_with, network, quiet_poller, wait_for_status,
        ScriptedTransport,
    };

    fn stale_immediately() -> PollerConfig {
        PollerConfig {
            stale_after: Duration::ZERO,
            ..quiet_poller()
        }
    }

    #[actix_rt::test]
    async fn test_start_stop_are_idempotent() {
        let h = harness(ScriptedTransport::succeeding());

        assert!(!h.coordinator.poller().is_running());
        assert!(h.coordinator.start_poller());
        assert!(!h.coordinator.start_poller());
        assert!(h.coordinator.poller().is_running());

        assert!(h.coordinator.stop_poller().await);
        assert!(!h.coordinator.stop_poller().await);
        assert!(!h.coordinator.poller().is_running());

        // Se puede volver a arrancar
        assert!(h.coordinator.start_poller());
        h.coordinator.shutdown().await;
        assert!(!h.coordinator.poller().is_running());
    }

    #[actix_rt::test]
    async fn test_tick_acknowledges_sent_records() {
        let h = harness(ScriptedTransport::succeeding());
        let a = h.coordinator.submit(gate_in("AAAU1111111")).await.unwrap();
        let b = h.coordinator.submit(gate_in("BBBU2222222")).await.unwrap();
        h.transport.acknowledge(&b.id);

        let report = h.coordinator.poll_once().await;

        assert!(!report.skipped);
        assert_eq!(report.checked, 2);
        assert_eq!(report.acknowledged, vec![b.id.clone()]);
        assert!(report.stale.is_empty());
        assert_eq!(h.transport.ack_calls(), 2);

        let acked = h.store.get(&b.id).await.unwrap();
        assert_eq!(acked.status, TransmissionStatus::Acknowledged);
        assert!(acked.acknowledgment_received_at.is_some());
        assert_eq!(
            h.store.get(&a.id).await.unwrap().status,
            TransmissionStatus::Sent
        );

        // Los confirmados ya no se consultan
        let report = h.coordinator.poll_once().await;
        assert_eq!(report.checked, 1);
        assert!(report.acknowledged.is_empty());
    }

    #[actix_rt::test]
    async fn test_overlapping_tick_is_skipped() {
        let transport = ScriptedTransport::succeeding().ack_delay(Duration::from_millis(100));
        let h = harness(transport);
        h.coordinator.submit(gate_in("AAAU1111111")).await.unwrap();

        let (first, second) = futures::join!(h.coordinator.poll_once(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.coordinator.poll_once().await
        });

        assert!(!first.skipped);
        assert_eq!(first.checked, 1);
        assert!(second.skipped);
        assert_eq!(second.checked, 0);
        assert_eq!(h.transport.ack_calls(), 1);

        // El flag se libera al terminar la pasada
        assert!(!h.coordinator.poll_once().await.skipped);
    }

    #[actix_rt::test]
    async fn test_stale_sent_record_is_reported() {
        let h = harness_with(
            ScriptedTransport::succeeding(),
            Duration::from_millis(10),
            stale_immediately(),
        );
        let sent = h.coordinator.submit(gate_in("AAAU1111111")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let report = h.coordinator.poll_once().await;

        assert_eq!(report.stale.len(), 1);
        assert_eq!(report.stale[0].id, sent.id);
        assert_eq!(report.stale[0].status, TransmissionStatus::Sent);
        // Sólo se reporta: el estado no cambia
        assert_eq!(
            h.store.get(&sent.id).await.unwrap().status,
            TransmissionStatus::Sent
        );
    }

    #[actix_rt::test]
    async fn test_retrying_with_budget_is_not_stale() {
        let h = harness_with(
            ScriptedTransport::failing("NETWORK_ERROR"),
            Duration::from_secs(5),
            stale_immediately(),
        );
        let first = h.coordinator.submit(gate_in("AAAU1111111")).await.unwrap();
        assert_eq!(first.status, TransmissionStatus::Retrying);
        tokio::time::sleep(Duration::from_millis(5)).await;

        let report = h.coordinator.poll_once().await;

        assert_eq!(report.checked, 1);
        assert!(report.stale.is_empty());
        h.coordinator.shutdown().await;
    }

    #[actix_rt::test]
    async fn test_retrying_without_send_budget_is_stale() {
        let h = harness_with(
            ScriptedTransport::succeeding(),
            Duration::from_millis(10),
            stale_immediately(),
        );
        let record = TransmissionRecord::pending(gate_in("AAAU1111111").validate().unwrap());
        let id = h.store.create(record).await.unwrap();
        // Tres intentos consumen los 2 reintentos de la clase de envío
        for _ in 0..3 {
            h.store
                .update(
                    &id,
                    TransmissionPatch::new()
                        .begin_attempt(Utc::now())
                        .status(TransmissionStatus::Retrying)
                        .error("[TIMEOUT] simulated"),
                )
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;

        let report = h.coordinator.poll_once().await;

        assert_eq!(report.stale.len(), 1);
        assert_eq!(report.stale[0].id, id);
        assert_eq!(report.stale[0].attempts, 3);
        assert_eq!(report.stale[0].status, TransmissionStatus::Retrying);
    }

    #[actix_rt::test]
    async fn test_lookup_errors_are_counted_and_do_not_abort() {
        let h = harness(ScriptedTransport::succeeding());
        let a = h.coordinator.submit(gate_in("AAAU1111111")).await.unwrap();
        let b = h.coordinator.submit(gate_in("BBBU2222222")).await.unwrap();
        h.transport.fail_ack_lookup(&a.id, "TIMEOUT");
        h.transport.acknowledge(&b.id);

        let report = h.coordinator.poll_once().await;

        assert_eq!(report.lookup_errors, 1);
        assert_eq!(report.acknowledged, vec![b.id.clone()]);
        assert_eq!(
            h.store.get(&a.id).await.unwrap().status,
            TransmissionStatus::Sent
        );
    }

    #[actix_rt::test]
    async fn test_running_loop_acknowledges() {
        let poller = PollerConfig {
            interval: Duration::from_millis(20),
            ..quiet_poller()
        };
        let h = harness_with(
            ScriptedTransport::succeeding(),
            Duration::from_millis(10),
            poller,
        );
        let sent = h.coordinator.submit(gate_in("AAAU1111111")).await.unwrap();

        assert!(h.coordinator.start_poller());
        h.transport.acknowledge(&sent.id);

        let store: Arc<dyn TransmissionStore> = h.store.clone();
        let acked =
            wait_for_status(store.as_ref(), &sent.id, TransmissionStatus::Acknowledged).await;
        assert!(acked.acknowledgment_received_at.is_some());

        assert!(h.coordinator.stop_poller().await);
    }

    #[actix_rt::test]
    async fn test_ack_received_while_retrying_stops_retries() {
        let transport = ScriptedTransport::with_script(
            vec![Err(network("ECONNREFUSED"))],
            Ok(TransportAck::default()),
        );
        let h = harness_with(transport, Duration::from_millis(150), quiet_poller());
        let first = h.coordinator.submit(gate_in("AAAU1111111")).await.unwrap();
        h.transport.acknowledge(&first.id);

        let report = h.coordinator.poll_once().await;
        assert_eq!(report.acknowledged, vec![first.id.clone()]);

        // Aunque el transporte vuelva a fallar, el reintento programado se descarta
        h.transport.set_fallback(Err(network("ECONNREFUSED")));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(h.transport.send_calls(), 1);
        assert_eq!(h.coordinator.scheduled_retry_count(), 0);
    }
}
