//! tests/handler_tests.rs
//! Pruebas HTTP de los endpoints (actix test service + transporte guionado).

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test, web, App};
    use serde_json::{json, Value};

    use crate::app::init_app;
    use crate::config::transmission_config::{TransferConfig, TransferProtocol};
    use crate::errors::ErrorCategory;
    use crate::models::transmission_model::{EdiOperation, TransmissionPayload};
    use crate::services::retry_policy::RetryPolicyEngine;
    use crate::services::transport::{status_code_to_error_code, RelayTransport, Transport};
    use crate::tests::support::{harness, Harness, ScriptedTransport};

    fn body(container: &str) -> Value {
        json!({
            "container_number": container,
            "operation": "GATE_IN",
            "partner_code": "CIABJ31",
            "file_name": "CODECO.edi",
            "file_size": 1024
        })
    }

    macro_rules! service {
        ($h:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($h.coordinator.clone()))
                    .configure(init_app),
            )
            .await
        };
    }

    #[actix_rt::test]
    async fn test_submit_and_fetch() {
        let h: Harness = harness(ScriptedTransport::succeeding());
        let app = service!(h);

        let req = test::TestRequest::post()
            .uri("/api/transmissions")
            .set_json(body("MSCU1234567"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let created: Value = test::read_body_json(resp).await;
        assert_eq!(created["status"], "SENT");
        assert_eq!(created["attempts"], 1);
        let id = created["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri(&format!("/api/transmissions/{}", id))
            .to_request();
        let fetched: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(fetched["id"], id.as_str());
        assert_eq!(fetched["container_number"], "MSCU1234567");

        let req = test::TestRequest::get()
            .uri("/api/transmissions?status=SENT")
            .to_request();
        let list: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(list["total"], 1);

        let req = test::TestRequest::get()
            .uri("/api/transmissions?status=FAILED")
            .to_request();
        let list: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(list["total"], 0);
    }

    #[actix_rt::test]
    async fn test_history_filter_is_case_insensitive() {
        let h = harness(ScriptedTransport::succeeding());
        let app = service!(h);
        h.coordinator
            .submit(crate::tests::support::gate_in("MSCU1234567"))
            .await
            .unwrap();

        let req = test::TestRequest::get()
            .uri("/api/transmissions?status=sent&operation=gate_in")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let list: Value = test::read_body_json(resp).await;
        assert_eq!(list["total"], 1);

        let req = test::TestRequest::get()
            .uri("/api/transmissions?status=")
            .to_request();
        let list: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(list["total"], 1);

        let req = test::TestRequest::get()
            .uri("/api/transmissions?status=lost")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_rt::test]
    async fn test_error_statuses() {
        let h = harness(ScriptedTransport::failing("FORBIDDEN"));
        let app = service!(h);

        // Validación
        let req = test::TestRequest::post()
            .uri("/api/transmissions")
            .set_json(body("BAD"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        // Fallo de permisos: FAILED con el registro en el cuerpo
        let req = test::TestRequest::post()
            .uri("/api/transmissions")
            .set_json(body("MSCU1234567"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let err: Value = test::read_body_json(resp).await;
        assert_eq!(err["category"], "permission");
        assert_eq!(err["transmission"]["status"], "FAILED");

        // Inexistente
        let req = test::TestRequest::get()
            .uri("/api/transmissions/unknown-id")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri("/api/transmissions/unknown-id/retry")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_rt::test]
    async fn test_retry_of_acknowledged_conflicts() {
        let h = harness(ScriptedTransport::succeeding());
        let app = service!(h);

        let sent = h
            .coordinator
            .submit(crate::tests::support::gate_in("MSCU1234567"))
            .await
            .unwrap();
        h.transport.acknowledge(&sent.id);

        let req = test::TestRequest::post()
            .uri("/api/poller/tick")
            .to_request();
        let report: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(report["acknowledged"][0], sent.id.as_str());

        let req = test::TestRequest::post()
            .uri(&format!("/api/transmissions/{}/retry", sent.id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[actix_rt::test]
    async fn test_export_csv() {
        let h = harness(ScriptedTransport::succeeding());
        let app = service!(h);
        h.coordinator
            .submit(crate::tests::support::gate_in("MSCU1234567"))
            .await
            .unwrap();

        let req = test::TestRequest::get()
            .uri("/api/transmissions/export")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/csv"));

        let bytes = test::read_body(resp).await;
        let csv = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.contains("MSCU1234567"));
    }

    #[actix_rt::test]
    async fn test_poller_endpoints() {
        let h = harness(ScriptedTransport::succeeding());
        let app = service!(h);

        let req = test::TestRequest::post().uri("/api/poller/start").to_request();
        let started: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(started["running"], true);
        assert_eq!(started["changed"], true);

        let req = test::TestRequest::get().uri("/api/poller/status").to_request();
        let status: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status["running"], true);
        assert_eq!(status["scheduled_retries"], 0);

        let req = test::TestRequest::post().uri("/api/poller/stop").to_request();
        let stopped: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(stopped["running"], false);
        assert_eq!(stopped["changed"], true);

        let req = test::TestRequest::post().uri("/api/poller/stop").to_request();
        let again: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(again["changed"], false);

        // Tras el apagado el poller no vuelve a arrancar
        h.coordinator.shutdown().await;
        let req = test::TestRequest::post().uri("/api/poller/start").to_request();
        let after: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(after["changed"], false);
        assert_eq!(after["running"], false);
    }

    #[::core::prelude::v1::test]
    fn test_relay_switches_protocol_after_first_attempt() {
        let auto = RelayTransport::new(TransferConfig {
            port: 22,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(auto.target_protocol(1), "sftp");
        assert_eq!(auto.target_protocol(2), "ftp");
        assert_eq!(auto.target_protocol(3), "ftp");

        let auto_ftp = RelayTransport::new(TransferConfig {
            port: 21,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(auto_ftp.target_protocol(1), "ftp");
        assert_eq!(auto_ftp.target_protocol(2), "sftp");

        let fixed = RelayTransport::new(TransferConfig {
            port: 21,
            protocol: TransferProtocol::Sftp,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(fixed.target_protocol(1), "sftp");
        assert_eq!(fixed.target_protocol(2), "sftp");
    }

    #[::core::prelude::v1::test]
    fn test_relay_status_mapping_matches_policy() {
        let policy = RetryPolicyEngine::default();
        let category = |status: StatusCode| {
            let code = status_code_to_error_code(
                reqwest::StatusCode::from_u16(status.as_u16()).unwrap(),
            );
            policy
                .classify(&crate::errors::TransportError::new(code, ""))
                .category
        };

        assert_eq!(category(StatusCode::BAD_REQUEST), ErrorCategory::Validation);
        assert_eq!(category(StatusCode::UNAUTHORIZED), ErrorCategory::Permission);
        assert_eq!(category(StatusCode::CONFLICT), ErrorCategory::Conflict);
        assert_eq!(category(StatusCode::BAD_GATEWAY), ErrorCategory::Transient);
        assert_eq!(category(StatusCode::GATEWAY_TIMEOUT), ErrorCategory::Transient);
        assert_eq!(
            category(StatusCode::INTERNAL_SERVER_ERROR),
            ErrorCategory::Unknown
        );
    }

    #[actix_rt::test]
    async fn test_relay_missing_file_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = TransferConfig {
            relay_url: "http://127.0.0.1:9".to_string(),
            outbound_dir: dir.path().display().to_string(),
            ..Default::default()
        };
        let transport = RelayTransport::new(config).unwrap();
        let payload = TransmissionPayload {
            transmission_id: "tx-1".to_string(),
            container_number: "MSCU1234567".to_string(),
            operation: EdiOperation::GateIn,
            partner_code: "CIABJ31".to_string(),
            file_name: "missing.edi".to_string(),
            file_size: 10,
            attempt: 1,
        };

        let err = transport.send(&payload).await.unwrap_err();

        assert_eq!(err.code, "FILE_NOT_FOUND");
        assert_eq!(
            RetryPolicyEngine::default().classify(&err).category,
            ErrorCategory::Validation
        );
    }
}
