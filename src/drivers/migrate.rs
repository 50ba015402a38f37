//! Bulk driver: mirror every membership record.

use std::path::Path;
use tracing::{info, warn};

use super::Provisioning;
use crate::engine::{Orchestrator, Summary};
use crate::error::{Error, Result};
use crate::membership::MemberDirectory;

/// Default location of the run report.
pub const DEFAULT_REPORT: &str = "migrate_output.log";

/// Fetch all members, submit the valid ones, wait for every outcome and
/// write the report.
///
/// A fetch failure aborts before anything is submitted. A refresh failure
/// stops submission; the report is still written and the run returns
/// [`Error::Halted`].
pub async fn run(
    orchestrator: &Orchestrator,
    directory: &dyn MemberDirectory,
    provisioning: &Provisioning,
    report: &Path,
) -> Result<Summary> {
    let members = directory.list_members().await?;
    info!(count = members.len(), "starting migration");

    let mut submitted = 0usize;
    for member in &members {
        if orchestrator.is_halted() {
            warn!(submitted, "run halted, stopping submission");
            break;
        }
        if let Some(item) = provisioning.work_item(member, "migrate") {
            orchestrator.submit(item).await;
            submitted += 1;
        }
    }

    orchestrator.wait_idle().await;
    let summary = orchestrator.summary();
    summary.write_report(report).await?;
    info!(
        submitted,
        succeeded = summary.success_count,
        failed = summary.failure_count(),
        report = %report.display(),
        "migration complete"
    );

    match orchestrator.halt_reason() {
        Some(reason) => Err(Error::Halted(reason)),
        None => Ok(summary),
    }
}
