//! Webhook receiver: one MINDBODY client event per request.
//!
//! The signature is verified against the raw body before anything is parsed.
//! Accepted events are acknowledged with 204 and processed in the background.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use opentelemetry::KeyValue;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};

use super::Provisioning;
use crate::engine::Orchestrator;
use crate::error::{Error, Result};
use crate::model::{Member, WorkItem};
use crate::telemetry::metrics;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-mindbody-signature";
const SIGNATURE_PREFIX: &str = "sha256=";

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// `sha256=<base64 HMAC-SHA256(body)>`.
pub fn sign(key: &[u8], body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Other(format!("invalid signing key: {e}")))?;
    mac.update(body);
    Ok(format!(
        "{SIGNATURE_PREFIX}{}",
        BASE64.encode(mac.finalize().into_bytes())
    ))
}

/// Check `header` against the body in constant time.
pub fn verify_signature(key: &[u8], body: &[u8], header: Option<&str>) -> Result<()> {
    let encoded = header
        .and_then(|h| h.trim().strip_prefix(SIGNATURE_PREFIX))
        .ok_or(Error::Signature)?;
    let provided = BASE64.decode(encoded).map_err(|_| Error::Signature)?;

    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| Error::Signature)?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    if bool::from(expected.as_slice().ct_eq(&provided)) {
        Ok(())
    } else {
        Err(Error::Signature)
    }
}

// ---------------------------------------------------------------------------
// Event model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub message_id: String,
    pub event_id: String,
    #[serde(default)]
    pub event_schema_version: i64,
    #[serde(default)]
    pub event_instance_origination_date_time: Option<DateTime<Utc>>,
    pub event_data: ClientData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientData {
    pub site_id: i64,
    pub client_id: String,
    pub client_unique_id: i64,
    pub creation_date_time: Option<DateTime<Utc>>,
    pub status: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub mobile_phone: String,
    pub home_phone: String,
    pub work_phone: String,
}

impl ClientData {
    fn to_member(&self, active: bool) -> Member {
        Member {
            id: self.client_id.clone(),
            unique_id: self.client_unique_id,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            mobile_phone: self.mobile_phone.clone(),
            home_phone: self.home_phone.clone(),
            work_phone: self.work_phone.clone(),
            active,
            status: self.status.clone(),
            ..Default::default()
        }
    }
}

/// What an event asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    /// Create or update the member's user.
    Provision,
    /// Provision the member's user suspended.
    Deactivate,
    Ignore,
}

impl Event {
    pub fn action(&self) -> Action {
        match self.event_id.as_str() {
            "client.created" | "client.updated" => Action::Provision,
            "client.deactivated" => Action::Deactivate,
            _ => Action::Ignore,
        }
    }

    /// The work item for this event, if it carries one.
    pub fn work_item(&self, provisioning: &Provisioning) -> Option<WorkItem> {
        let member = match self.action() {
            Action::Provision => self.event_data.to_member(true),
            Action::Deactivate => self.event_data.to_member(false),
            Action::Ignore => return None,
        };
        provisioning.work_item(&member, "webhook")
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct WebhookState {
    orchestrator: Orchestrator,
    provisioning: Arc<Provisioning>,
    signing_key: SecretString,
}

impl WebhookState {
    pub fn new(
        orchestrator: Orchestrator,
        provisioning: Provisioning,
        signing_key: SecretString,
    ) -> Self {
        Self {
            orchestrator,
            provisioning: Arc::new(provisioning),
            signing_key,
        }
    }
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/api/user", post(receive).head(handshake))
        .with_state(state)
}

/// Subscription validation.
async fn handshake() -> StatusCode {
    StatusCode::OK
}

fn count(event: &str, result: &'static str) {
    metrics::webhook_events().add(
        1,
        &[
            KeyValue::new("event", event.to_string()),
            KeyValue::new("result", result),
        ],
    );
}

async fn receive(State(state): State<WebhookState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    if state.orchestrator.is_halted() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    if verify_signature(
        state.signing_key.expose_secret().as_bytes(),
        &body,
        signature,
    )
    .is_err()
    {
        warn!("rejected webhook with invalid signature");
        count("unknown", "rejected");
        return StatusCode::UNAUTHORIZED;
    }

    let event: Event = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "rejected malformed webhook payload");
            count("unknown", "rejected");
            return StatusCode::BAD_REQUEST;
        }
    };

    match event.work_item(&state.provisioning) {
        Some(item) => {
            info!(
                event = %event.event_id,
                message_id = %event.message_id,
                key = %item.key,
                "accepted webhook event"
            );
            count(&event.event_id, "accepted");
            state.orchestrator.submit_detached(item);
        }
        None => {
            debug!(event = %event.event_id, message_id = %event.message_id, "ignored webhook event");
            count(&event.event_id, "ignored");
        }
    }
    StatusCode::NO_CONTENT
}

/// Serve until the orchestrator halts.
///
/// Returns [`Error::Halted`] once a refresh failure stops the run, after
/// in-flight work has drained.
pub async fn serve(state: WebhookState, port: u16) -> Result<()> {
    let orchestrator = state.orchestrator.clone();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening for webhook events");

    let shutdown = {
        let orchestrator = orchestrator.clone();
        async move {
            tokio::select! {
                reason = orchestrator.wait_halted() => {
                    error!(%reason, "shutting down webhook receiver");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, shutting down webhook receiver");
                }
            }
        }
    };
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    orchestrator.wait_idle().await;
    match orchestrator.halt_reason() {
        Some(reason) => Err(Error::Halted(reason)),
        None => Ok(()),
    }
}
