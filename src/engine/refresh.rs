//! Single-flight token refresh.
//!
//! Concurrent pipelines discover expiry independently. Only the caller that
//! wins the refresh lock performs the exchange; the rest wait on the lock,
//! re-check, and find the token already replaced.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::gate::ConcurrencyGate;
use crate::telemetry::metrics;
use crate::token::{Authenticator, TokenHolder};

/// What `ensure_fresh` found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The token was already valid.
    Valid,
    /// This caller performed a refresh; the token is now at `generation`.
    Refreshed { generation: u64 },
}

pub struct RefreshCoordinator {
    holder: Arc<TokenHolder>,
    authenticator: Arc<dyn Authenticator>,
    gate: ConcurrencyGate,
    lock: Mutex<()>,
    refreshing: AtomicBool,
    /// First refresh failure. Once set the run is halted.
    failure: OnceLock<String>,
    refreshes: AtomicUsize,
}

impl RefreshCoordinator {
    pub fn new(
        holder: Arc<TokenHolder>,
        authenticator: Arc<dyn Authenticator>,
        gate: ConcurrencyGate,
    ) -> Self {
        Self {
            holder,
            authenticator,
            gate,
            lock: Mutex::new(()),
            refreshing: AtomicBool::new(false),
            failure: OnceLock::new(),
            refreshes: AtomicUsize::new(0),
        }
    }

    /// Make sure the held token is usable, refreshing it at most once across
    /// all concurrent callers.
    ///
    /// A refresh failure is fatal: it is remembered and every later call
    /// returns [`Error::Halted`] without retrying the exchange.
    pub async fn ensure_fresh(&self) -> Result<Freshness> {
        if let Some(reason) = self.failure.get() {
            return Err(Error::Halted(reason.clone()));
        }
        if !self.holder.is_expired().await {
            return Ok(Freshness::Valid);
        }

        let _guard = self.lock.lock().await;

        // Another caller may have refreshed (or failed) while we waited.
        if let Some(reason) = self.failure.get() {
            return Err(Error::Halted(reason.clone()));
        }
        if !self.holder.is_expired().await {
            return Ok(Freshness::Valid);
        }

        self.refreshing.store(true, Ordering::SeqCst);
        let result = async {
            let _permit = self.gate.acquire().await?;
            let current = self.holder.current().await;
            self.authenticator.refresh(&current).await
        }
        .await
        .and_then(|token| {
            if token.expires_at <= chrono::Utc::now() {
                Err(Error::Refresh(format!(
                    "issued token already expired at {}",
                    token.expires_at
                )))
            } else {
                Ok(token)
            }
        });
        // Cleared before the new generation is visible: a submitter that still
        // sees the flag set read its generation before the bump.
        self.refreshing.store(false, Ordering::SeqCst);

        match result {
            Ok(token) => {
                let expires_at = token.expires_at;
                let generation = self.holder.replace(token).await;
                self.refreshes.fetch_add(1, Ordering::SeqCst);
                metrics::token_refreshes().add(1, &[opentelemetry::KeyValue::new("result", "ok")]);
                info!(generation, %expires_at, "refreshed access token");
                Ok(Freshness::Refreshed { generation })
            }
            Err(e) => {
                let reason = e.to_string();
                let _ = self.failure.set(reason.clone());
                metrics::token_refreshes()
                    .add(1, &[opentelemetry::KeyValue::new("result", "error")]);
                error!(error = %reason, "access token refresh failed, halting run");
                Err(Error::Refresh(reason))
            }
        }
    }

    /// True while a refresh exchange is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    /// Reason the run halted, if a refresh has failed.
    pub fn failure(&self) -> Option<&str> {
        self.failure.get().map(String::as_str)
    }

    /// Number of successful refresh exchanges.
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn holder(&self) -> &Arc<TokenHolder> {
        &self.holder
    }
}
