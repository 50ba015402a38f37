//! Orchestrator: one run's worth of shared coordination state.
//!
//! Owns the concurrency gate, token holder, refresh coordinator, requeue
//! buffer and outcome ledger. Drivers submit work items; each item runs as
//! its own task through the pipeline.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use super::ledger::{OutcomeLedger, OutcomeStatus, Summary};
use super::pipeline::{self, StepFailure};
use super::refresh::{Freshness, RefreshCoordinator};
use super::requeue::RequeueBuffer;
use crate::access::AccessControl;
use crate::config::Config;
use crate::error::Result;
use crate::gate::{ConcurrencyGate, GatePermit};
use crate::model::{RemoteCredential, RemoteUser, WorkItem};
use crate::telemetry::metrics;
use crate::telemetry::work::start_entity_span;
use crate::token::{AccessToken, Authenticator, TokenHolder, TokenLease};

/// Future returned by a run-level read against the access-control seam.
pub type Pending<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Tuning for one orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Capacity of the concurrency gate.
    pub rate_limit: usize,
    /// Transient-auth requeues allowed per item before it is failed.
    pub max_requeues: u32,
    /// Treat the token as expired this long before its expiry instant.
    pub token_grace: chrono::Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            rate_limit: 20,
            max_requeues: 3,
            token_grace: chrono::Duration::seconds(30),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            rate_limit: config.brivo.rate_limit,
            max_requeues: config.max_requeues,
            token_grace: chrono::Duration::seconds(config.token_grace_secs),
        }
    }
}

/// One outbound call in progress: a gate permit plus the token lease used.
///
/// The permit is released when the call is finished.
pub(crate) struct Call {
    operation: &'static str,
    lease: TokenLease,
    started: Instant,
    _permit: GatePermit,
}

impl Call {
    pub(crate) fn bearer(&self) -> &str {
        self.lease.bearer()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.lease.generation
    }

    /// Release the permit and record call metrics.
    pub(crate) fn finish<T>(self, result: Result<T>) -> Result<T> {
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) if e.is_auth_expired() => "auth_expired",
            Err(e) if e.is_conflict() => "conflict",
            Err(_) => "error",
        };
        let elapsed = self.started.elapsed().as_secs_f64() * 1000.0;
        metrics::outbound_calls().add(
            1,
            &[
                KeyValue::new("operation", self.operation),
                KeyValue::new("result", outcome),
            ],
        );
        metrics::call_duration_ms().record(elapsed, &[KeyValue::new("operation", self.operation)]);
        result
    }
}

pub(crate) struct Inner {
    run_id: Uuid,
    pub(crate) api: Arc<dyn AccessControl>,
    gate: ConcurrencyGate,
    refresh: RefreshCoordinator,
    buffer: RequeueBuffer,
    ledger: OutcomeLedger,
    max_requeues: u32,
    /// Pipeline tasks spawned and not yet finished.
    live: AtomicUsize,
    idle: Notify,
    halted: AtomicBool,
    halt_signal: Notify,
}

impl Inner {
    /// Prepare one outbound call: fresh token, then a gate permit, then the lease.
    ///
    /// Freshness is checked before the gate so a waiting caller never holds a
    /// permit the refresh exchange itself needs.
    pub(crate) async fn begin(self: &Arc<Self>, operation: &'static str) -> Result<Call> {
        loop {
            match self.refresh.ensure_fresh().await {
                Ok(Freshness::Refreshed { generation }) => self.drain(generation),
                Ok(Freshness::Valid) => {}
                Err(e) => {
                    self.halt();
                    return Err(e);
                }
            }
            let permit = self.gate.acquire().await?;
            // The token may have lapsed while waiting for the permit.
            if self.refresh.holder().is_expired().await {
                drop(permit);
                continue;
            }
            let lease = self.refresh.holder().lease().await;
            return Ok(Call {
                operation,
                lease,
                started: Instant::now(),
                _permit: permit,
            });
        }
    }

    fn is_halted(&self) -> bool {
        self.refresh.failure().is_some()
    }

    fn halt_reason(&self) -> String {
        self.refresh.failure().unwrap_or("unknown").to_string()
    }

    async fn submit(self: &Arc<Self>, item: WorkItem) {
        if self.is_halted() {
            let reason = format!("refresh: {}", self.halt_reason());
            self.retire(&item, OutcomeStatus::Failed(reason));
            return;
        }
        // Generation is read before the refreshing flag; see RefreshCoordinator.
        let generation = self.refresh.holder().generation().await;
        if self.refresh.is_refreshing() {
            self.buffer.push(item, generation);
            let current = self.refresh.holder().generation().await;
            self.drain(current);
        } else {
            self.spawn(item);
        }
    }

    fn spawn(self: &Arc<Self>, item: WorkItem) {
        self.live.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.run_item(item).await;
        });
    }

    async fn run_item(self: Arc<Self>, item: WorkItem) {
        let span = start_entity_span(&self.run_id, item.job.kind(), &item.key);
        let result = pipeline::execute(&self, &item, &span)
            .instrument(span.clone())
            .await;

        match result {
            Ok(()) => self.retire(&item, OutcomeStatus::Success),
            Err(failure) if failure.error.is_auth_expired() => {
                self.requeue(item, failure).instrument(span).await;
            }
            Err(failure) => {
                if failure.error.is_fatal() {
                    self.halt();
                }
                self.retire(&item, OutcomeStatus::Failed(failure.reason()));
            }
        }

        self.settle();
    }

    /// One spawned task or detached submission has finished.
    fn settle(&self) {
        if self.live.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Defer `item` until the rejected token is replaced, then join the refresh.
    async fn requeue(self: &Arc<Self>, mut item: WorkItem, failure: StepFailure) {
        if item.requeues >= self.max_requeues {
            warn!(
                key = %item.key,
                requeues = item.requeues,
                "token still rejected after refresh, giving up"
            );
            let reason = format!("{} after {} requeues", failure.reason(), item.requeues);
            self.retire(&item, OutcomeStatus::Failed(reason));
            return;
        }

        item.requeues += 1;
        metrics::requeues().add(1, &[KeyValue::new("job", item.job.kind())]);
        info!(
            key = %item.key,
            step = %failure.step,
            generation = failure.generation,
            "access token rejected, requeueing"
        );
        self.buffer.push(item, failure.generation);
        // A refresh failure has already halted the run and failed the buffer.
        let _ = self.recover(failure.generation).await;
    }

    /// Invalidate the token of `generation`, refresh or join the refresh in
    /// flight, then release whatever that refresh was holding back.
    async fn recover(self: &Arc<Self>, generation: u64) -> Result<()> {
        let holder = self.refresh.holder();
        holder.reject(generation).await;
        if let Err(e) = self.refresh.ensure_fresh().await {
            self.halt();
            return Err(e);
        }
        let current = holder.generation().await;
        self.drain(current);
        Ok(())
    }

    /// Resubmit every buffered item whose refresh has completed.
    ///
    /// Never waits for new items.
    fn drain(self: &Arc<Self>, generation: u64) {
        if self.is_halted() {
            self.fail_buffered();
            return;
        }
        for item in self.buffer.drain_ready(generation) {
            self.spawn(item);
        }
    }

    fn halt(&self) {
        if !self.halted.swap(true, Ordering::SeqCst) {
            error!(reason = %self.halt_reason(), "run halted");
            self.halt_signal.notify_waiters();
        }
        self.fail_buffered();
    }

    fn fail_buffered(&self) {
        let items = self.buffer.drain_all();
        if items.is_empty() {
            return;
        }
        let reason = format!("refresh: {}", self.halt_reason());
        for item in items {
            self.retire(&item, OutcomeStatus::Failed(reason.clone()));
        }
    }

    fn retire(&self, item: &WorkItem, status: OutcomeStatus) {
        let kind = item.job.kind();
        match &status {
            OutcomeStatus::Success => info!(key = %item.key, job = kind, "entity processed"),
            OutcomeStatus::Failed(reason) => {
                error!(key = %item.key, job = kind, %reason, "entity failed")
            }
        }
        let label = if status.is_success() { "success" } else { "failed" };
        metrics::entity_outcomes().add(
            1,
            &[KeyValue::new("job", kind), KeyValue::new("status", label)],
        );
        self.ledger.record(item.key.clone(), status);
    }
}

/// Per-run orchestration engine. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Authenticate, then build an orchestrator around the issued token.
    pub async fn connect(
        api: Arc<dyn AccessControl>,
        authenticator: Arc<dyn Authenticator>,
        settings: OrchestratorSettings,
    ) -> Result<Self> {
        let token = authenticator.authenticate().await?;
        info!(expires_at = %token.expires_at, "authenticated with access-control system");
        Ok(Self::new(api, authenticator, token, settings))
    }

    pub fn new(
        api: Arc<dyn AccessControl>,
        authenticator: Arc<dyn Authenticator>,
        token: AccessToken,
        settings: OrchestratorSettings,
    ) -> Self {
        let gate = ConcurrencyGate::new(settings.rate_limit);
        let holder = Arc::new(TokenHolder::new(token, settings.token_grace));
        let refresh = RefreshCoordinator::new(holder, authenticator, gate.clone());
        let run_id = Uuid::new_v4();
        info!(%run_id, rate_limit = gate.capacity(), "orchestrator ready");
        Self {
            inner: Arc::new(Inner {
                run_id,
                api,
                gate,
                refresh,
                buffer: RequeueBuffer::new(),
                ledger: OutcomeLedger::new(),
                max_requeues: settings.max_requeues,
                live: AtomicUsize::new(0),
                idle: Notify::new(),
                halted: AtomicBool::new(false),
                halt_signal: Notify::new(),
            }),
        }
    }

    /// Route one item: into the pipeline, or into the requeue buffer while a
    /// refresh is in flight. After a halt the item is failed immediately.
    pub async fn submit(&self, item: WorkItem) {
        self.inner.submit(item).await;
    }

    /// Submit without waiting for routing to complete.
    ///
    /// The item counts as in flight before this returns, so a `wait_idle`
    /// that starts afterwards also waits for it.
    pub fn submit_detached(&self, item: WorkItem) {
        self.inner.live.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.submit(item).await;
            inner.settle();
        });
    }

    /// Wait until every submitted item has reached a terminal status.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.live.load(Ordering::SeqCst) == 0 {
                if self.inner.buffer.is_empty() {
                    return;
                }
                let generation = self.inner.refresh.holder().generation().await;
                self.inner.drain(generation);
                if self.inner.live.load(Ordering::SeqCst) == 0 {
                    tokio::task::yield_now().await;
                }
                continue;
            }
            notified.await;
        }
    }

    /// Resolves once a refresh failure has halted the run.
    pub async fn wait_halted(&self) -> String {
        loop {
            let notified = self.inner.halt_signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.halted.load(Ordering::SeqCst) {
                return self.inner.halt_reason();
            }
            notified.await;
        }
    }

    pub fn is_halted(&self) -> bool {
        self.inner.is_halted()
    }

    pub fn halt_reason(&self) -> Option<String> {
        self.inner.refresh.failure().map(str::to_string)
    }

    /// A read made by the driver itself rather than a pipeline, such as a
    /// listing. Gated like every other call; retried once after a refresh if
    /// the token is rejected.
    pub async fn read<T, F>(&self, operation: &'static str, request: F) -> Result<T>
    where
        F: for<'a> Fn(&'a dyn AccessControl, &'a str) -> Pending<'a, T>,
    {
        let mut retried = false;
        loop {
            let call = self.inner.begin(operation).await?;
            let generation = call.generation();
            let response = request(self.inner.api.as_ref(), call.bearer()).await;
            match call.finish(response) {
                Err(e) if e.is_auth_expired() && !retried => {
                    warn!(operation, "access token rejected, refreshing before retry");
                    retried = true;
                    self.inner.recover(generation).await?;
                }
                other => return other,
            }
        }
    }

    pub async fn list_users(&self, group_id: Option<i64>) -> Result<Vec<RemoteUser>> {
        self.read("list_users", move |api, bearer| api.list_users(bearer, group_id))
            .await
    }

    pub async fn list_credentials(&self) -> Result<Vec<RemoteCredential>> {
        self.read("list_credentials", |api, bearer| api.list_credentials(bearer))
            .await
    }

    /// Identifies this run in logs and spans.
    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }

    pub fn ledger(&self) -> &OutcomeLedger {
        &self.inner.ledger
    }

    pub fn summary(&self) -> Summary {
        self.inner.ledger.summarize()
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.inner.gate
    }

    /// Successful refresh exchanges so far.
    pub fn refresh_count(&self) -> usize {
        self.inner.refresh.refresh_count()
    }

    /// Items waiting in the requeue buffer.
    pub fn pending(&self) -> usize {
        self.inner.buffer.len()
    }
}
