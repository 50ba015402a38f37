//! Orchestration engine: gated calls, single-flight refresh, requeue, ledger.

pub mod ledger;
pub mod orchestrator;
pub mod pipeline;
pub mod refresh;
pub mod requeue;

pub use ledger::{OutcomeLedger, OutcomeRecord, OutcomeStatus, Summary};
pub use orchestrator::{Orchestrator, OrchestratorSettings, Pending};
pub use pipeline::{Step, StepFailure};
pub use refresh::{Freshness, RefreshCoordinator};
pub use requeue::RequeueBuffer;
