//! Driver behavior: bulk migration, cleanup sweep and webhook receiver.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{FIELDS, FakeAccess, FakeAuthenticator, GROUP, fresh_token, member};
use membersync::drivers::cleanup::{self, CleanupScope};
use membersync::drivers::webhook::{self, WebhookState};
use membersync::drivers::{Provisioning, migrate};
use membersync::engine::{Orchestrator, OrchestratorSettings, OutcomeStatus};
use membersync::error::{Error, Result};
use membersync::membership::MemberDirectory;
use membersync::model::Member;
use secrecy::SecretString;
use tower::ServiceExt;

struct FakeDirectory {
    members: Vec<Member>,
    fail: bool,
}

#[async_trait]
impl MemberDirectory for FakeDirectory {
    async fn list_members(&self) -> Result<Vec<Member>> {
        if self.fail {
            return Err(Error::Remote {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(self.members.clone())
    }
}

fn orchestrator(api: &Arc<FakeAccess>, auth: &Arc<FakeAuthenticator>) -> Orchestrator {
    Orchestrator::new(
        api.clone(),
        auth.clone(),
        fresh_token(),
        OrchestratorSettings {
            rate_limit: 4,
            max_requeues: 3,
            token_grace: chrono::Duration::zero(),
        },
    )
}

fn provisioning(facility_code: Option<&str>) -> Provisioning {
    Provisioning {
        group_id: GROUP,
        fields: FIELDS,
        facility_code: facility_code.map(str::to_string),
    }
}

fn report_path() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("membersync-{}.log", uuid::Uuid::new_v4()))
}

// ---------------------------------------------------------------------------
// Migration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn migration_filters_invalid_ids_and_writes_report() {
    let api = Arc::new(FakeAccess::new());
    let auth = Arc::new(FakeAuthenticator::new());
    let orch = orchestrator(&api, &auth);
    let directory = FakeDirectory {
        members: vec![member("ab0001"), member("not-hex"), member(""), member("cd0002")],
        fail: false,
    };
    let report = report_path();

    let summary = migrate::run(&orch, &directory, &provisioning(None), &report)
        .await
        .unwrap();

    assert_eq!(summary.success_count, 2);
    assert_eq!(orch.ledger().records().len(), 2);
    assert!(orch.ledger().status("not-hex").is_none());
    assert!(api.calls_for("not-hex").is_empty());

    let text = tokio::fs::read_to_string(&report).await.unwrap();
    assert!(text.starts_with("---------- OUTPUT LOG ----------"));
    assert!(text.contains("Users Processed Successfully: 2"));
    assert!(text.contains("Users Failed: 0"));
    let _ = tokio::fs::remove_file(&report).await;
}

#[tokio::test]
async fn migration_applies_facility_prefix() {
    let api = Arc::new(FakeAccess::new());
    let auth = Arc::new(FakeAuthenticator::new());
    let orch = orchestrator(&api, &auth);
    let directory = FakeDirectory {
        members: vec![member("AB0001"), member("cd0002")],
        fail: false,
    };
    let report = report_path();

    let summary = migrate::run(&orch, &directory, &provisioning(Some("ab")), &report)
        .await
        .unwrap();

    assert_eq!(summary.success_count, 1);
    assert_eq!(orch.ledger().status("AB0001"), Some(OutcomeStatus::Success));
    let _ = tokio::fs::remove_file(&report).await;
}

#[tokio::test]
async fn migration_aborts_when_fetch_fails() {
    let api = Arc::new(FakeAccess::new());
    let auth = Arc::new(FakeAuthenticator::new());
    let orch = orchestrator(&api, &auth);
    let directory = FakeDirectory {
        members: Vec::new(),
        fail: true,
    };
    let report = report_path();

    let result = migrate::run(&orch, &directory, &provisioning(None), &report).await;

    assert!(matches!(result, Err(Error::Remote { status: 503, .. })));
    assert!(api.calls().is_empty());
    assert!(!report.exists());
}

#[tokio::test]
async fn migration_reports_halt_as_error() {
    let api = Arc::new(FakeAccess::new());
    let auth = Arc::new(FakeAuthenticator::failing());
    let orch = Orchestrator::new(
        api.clone(),
        auth.clone(),
        common::expired_token(),
        OrchestratorSettings::default(),
    );
    let directory = FakeDirectory {
        members: vec![member("ab0001"), member("ab0002")],
        fail: false,
    };
    let report = report_path();

    let result = migrate::run(&orch, &directory, &provisioning(None), &report).await;

    assert!(matches!(result, Err(Error::Halted(_))));
    let text = tokio::fs::read_to_string(&report).await.unwrap();
    assert!(text.contains("Users Failed: 2"));
    let _ = tokio::fs::remove_file(&report).await;
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cleanup_deletes_member_group_and_harvested_credentials() {
    let api = Arc::new(FakeAccess::new());
    let auth = Arc::new(FakeAuthenticator::new());
    api.seed_user("aa01", Some("aa01"), Some(GROUP));
    api.seed_user("bb02", Some("bb02"), Some(GROUP));
    let staff = api.seed_user("staff", Some("cc03"), Some(7));
    api.seed_credential("aa01");
    api.seed_credential("bb02");
    api.seed_credential("cc03");
    let orch = orchestrator(&api, &auth);

    let summary = cleanup::run(
        &orch,
        CleanupScope {
            member_group_id: GROUP,
            barcode_field_id: FIELDS.barcode_field_id,
            all: false,
        },
        None,
    )
    .await
    .unwrap();

    assert_eq!(summary.success_count, 4);
    assert_eq!(api.user_count(), 1);
    assert!(api.user(staff).is_some());
    assert_eq!(api.credential_count(), 1);
    assert!(api.has_credential("cc03"));
}

#[tokio::test]
async fn cleanup_all_removes_everything_and_reports_missing_barcodes() {
    let api = Arc::new(FakeAccess::new());
    let auth = Arc::new(FakeAuthenticator::new());
    api.seed_user("aa01", Some("aa01"), Some(GROUP));
    let orphan = api.seed_user("nobarcode", None, None);
    api.seed_credential("aa01");
    api.seed_credential("unrelated");
    let orch = orchestrator(&api, &auth);
    let report = report_path();

    let summary = cleanup::run(
        &orch,
        CleanupScope {
            member_group_id: GROUP,
            barcode_field_id: FIELDS.barcode_field_id,
            all: true,
        },
        Some(&report),
    )
    .await
    .unwrap();

    assert_eq!(api.credential_count(), 0);
    // Users without a barcode are skipped, not deleted.
    assert!(api.user(orphan).is_some());
    assert_eq!(summary.failure_count(), 1);
    let reason = &summary.failures[&format!("user:{orphan}")];
    assert!(reason.starts_with("Read Barcode: "));
    assert!(tokio::fs::read_to_string(&report)
        .await
        .unwrap()
        .contains("Users Failed: 1"));
    let _ = tokio::fs::remove_file(&report).await;
}

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

const KEY: &str = "webhook-signing-key";

fn app(orch: &Orchestrator) -> axum::Router {
    webhook::router(WebhookState::new(
        orch.clone(),
        provisioning(None),
        SecretString::from(KEY.to_string()),
    ))
}

fn event(event_id: &str, client_id: &str) -> String {
    serde_json::json!({
        "messageId": "msg-1",
        "eventId": event_id,
        "eventSchemaVersion": 1,
        "eventInstanceOriginationDateTime": "2026-03-01T12:00:00Z",
        "eventData": {
            "siteId": -99,
            "clientId": client_id,
            "clientUniqueId": 100,
            "status": "Active",
            "firstName": "Carmela",
            "lastName": "Russo",
            "email": "carmela@example.org",
            "mobilePhone": "555-0111"
        }
    })
    .to_string()
}

fn signed(body: String) -> Request<Body> {
    let signature = webhook::sign(KEY.as_bytes(), body.as_bytes()).unwrap();
    Request::builder()
        .method("POST")
        .uri("/api/user")
        .header("content-type", "application/json")
        .header(webhook::SIGNATURE_HEADER, signature)
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn webhook_acknowledges_then_provisions() {
    let api = Arc::new(FakeAccess::new());
    let auth = Arc::new(FakeAuthenticator::new());
    let orch = orchestrator(&api, &auth);

    let response = app(&orch)
        .oneshot(signed(event("client.created", "ab0042")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Processing is asynchronous; wait for the ledger entry.
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while orch.ledger().status("ab0042").is_none() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    orch.wait_idle().await;

    assert_eq!(orch.ledger().status("ab0042"), Some(OutcomeStatus::Success));
    let id = api.user_id("ab0042").unwrap();
    assert!(!api.user(id).unwrap().suspended);
}

#[tokio::test]
async fn wait_idle_covers_acknowledged_events() {
    let api = Arc::new(FakeAccess::new());
    let auth = Arc::new(FakeAuthenticator::new());
    let orch = orchestrator(&api, &auth);

    let response = app(&orch)
        .oneshot(signed(event("client.updated", "ab0044")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // No polling: the acknowledged event is already counted as in flight.
    orch.wait_idle().await;

    assert_eq!(orch.ledger().status("ab0044"), Some(OutcomeStatus::Success));
    assert!(api.user_id("ab0044").is_some());
}

#[tokio::test]
async fn webhook_deactivation_suspends_user() {
    let api = Arc::new(FakeAccess::new());
    let auth = Arc::new(FakeAuthenticator::new());
    let existing = api.seed_user("ab0043", Some("ab0043"), Some(GROUP));
    let orch = orchestrator(&api, &auth);

    let response = app(&orch)
        .oneshot(signed(event("client.deactivated", "ab0043")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while orch.ledger().status("ab0043").is_none() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert!(api.user(existing).unwrap().suspended);
}

#[tokio::test]
async fn webhook_rejects_bad_signature() {
    let api = Arc::new(FakeAccess::new());
    let auth = Arc::new(FakeAuthenticator::new());
    let orch = orchestrator(&api, &auth);

    let request = Request::builder()
        .method("POST")
        .uri("/api/user")
        .header(webhook::SIGNATURE_HEADER, "sha256=AAAA")
        .body(Body::from(event("client.created", "ab0044")))
        .unwrap();
    let response = app(&orch).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    orch.wait_idle().await;
    assert!(orch.ledger().records().is_empty());
}

#[tokio::test]
async fn webhook_rejects_malformed_json() {
    let api = Arc::new(FakeAccess::new());
    let auth = Arc::new(FakeAuthenticator::new());
    let orch = orchestrator(&api, &auth);

    let response = app(&orch)
        .oneshot(signed("{not json".to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_ignores_unknown_events_and_invalid_ids() {
    let api = Arc::new(FakeAccess::new());
    let auth = Arc::new(FakeAuthenticator::new());
    let orch = orchestrator(&api, &auth);

    for body in [event("client.merged", "ab0045"), event("client.created", "zz-bad")] {
        let response = app(&orch).oneshot(signed(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
    orch.wait_idle().await;

    assert!(orch.ledger().records().is_empty());
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn webhook_answers_head_handshake() {
    let api = Arc::new(FakeAccess::new());
    let auth = Arc::new(FakeAuthenticator::new());
    let orch = orchestrator(&api, &auth);

    let request = Request::builder()
        .method("HEAD")
        .uri("/api/user")
        .body(Body::empty())
        .unwrap();
    let response = app(&orch).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn webhook_is_unavailable_after_halt() {
    let api = Arc::new(FakeAccess::new());
    let auth = Arc::new(FakeAuthenticator::failing());
    let orch = Orchestrator::new(
        api.clone(),
        auth.clone(),
        common::expired_token(),
        OrchestratorSettings::default(),
    );
    orch.submit(membersync::model::WorkItem::provision(common::user("ab0046"), GROUP))
        .await;
    orch.wait_idle().await;
    assert!(orch.is_halted());

    let response = app(&orch)
        .oneshot(signed(event("client.created", "ab0047")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
