//! Deletion sweep.
//!
//! Phase one purges users, collecting each user's barcode into a shared
//! harvest. Phase two starts only after phase one has fully retired and
//! deletes the credentials whose reference id was harvested.

use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::engine::{Orchestrator, Summary};
use crate::error::{Error, Result};
use crate::model::{Harvest, WorkItem};

#[derive(Debug, Clone, Copy)]
pub struct CleanupScope {
    pub member_group_id: i64,
    pub barcode_field_id: i64,
    /// Every user and credential, not just the member group.
    pub all: bool,
}

pub async fn run(
    orchestrator: &Orchestrator,
    scope: CleanupScope,
    report: Option<&Path>,
) -> Result<Summary> {
    let group = (!scope.all).then_some(scope.member_group_id);
    let users = orchestrator.list_users(group).await?;
    let credentials = orchestrator.list_credentials().await?;
    info!(
        users = users.len(),
        credentials = credentials.len(),
        all = scope.all,
        "starting cleanup"
    );

    let harvest = Arc::new(Harvest::default());
    for user in &users {
        if orchestrator.is_halted() {
            warn!("run halted, stopping user purge");
            break;
        }
        let item = WorkItem::purge_user(user.id, scope.barcode_field_id, Arc::clone(&harvest));
        orchestrator.submit(item).await;
    }
    orchestrator.wait_idle().await;
    info!(harvested = harvest.len(), "user purge complete");

    for credential in &credentials {
        if orchestrator.is_halted() {
            warn!("run halted, stopping credential purge");
            break;
        }
        if scope.all || harvest.contains(&credential.reference_id) {
            orchestrator
                .submit(WorkItem::purge_credential(credential.id))
                .await;
        }
    }
    orchestrator.wait_idle().await;

    let summary = orchestrator.summary();
    if let Some(path) = report {
        summary.write_report(path).await?;
    }
    info!(
        succeeded = summary.success_count,
        failed = summary.failure_count(),
        "cleanup complete"
    );

    match orchestrator.halt_reason() {
        Some(reason) => Err(Error::Halted(reason)),
        None => Ok(summary),
    }
}
