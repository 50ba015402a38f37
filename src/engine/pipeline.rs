//! Per-entity pipeline.
//!
//! A linear state machine of dependent remote calls. Every call goes through
//! [`Inner::begin`], which makes sure the token is fresh and takes one gate
//! permit for the call's duration. A failure stops the pipeline where it is;
//! completed steps are never rolled back.

use std::fmt;
use std::sync::Arc;
use tracing::{Span, debug};

use super::orchestrator::{Call, Inner};
use crate::access::AccessControl;
use crate::error::{Error, Result};
use crate::model::{AccessUser, Harvest, Job, NewCredential, WorkItem, field_value};
use crate::telemetry::work::record_step_transition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Start,
    EnsureUserExists,
    SetAttributes,
    EnsureCredentialExists,
    BindCredential,
    BindGroup,
    ReadBarcode,
    DeleteUser,
    DeleteCredential,
    Done,
}

impl Step {
    /// Name used in failure reasons and the run report.
    pub fn name(self) -> &'static str {
        match self {
            Step::Start => "Start",
            Step::EnsureUserExists => "Create User",
            Step::SetAttributes => "Update Custom Field",
            Step::EnsureCredentialExists => "Create Credential",
            Step::BindCredential => "Assign Credential",
            Step::BindGroup => "Assign Group",
            Step::ReadBarcode => "Read Barcode",
            Step::DeleteUser => "Delete User",
            Step::DeleteCredential => "Delete Credential",
            Step::Done => "Done",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where and why a pipeline invocation stopped.
#[derive(Debug)]
pub struct StepFailure {
    pub step: Step,
    pub error: Error,
    /// Token generation of the lease used by the failing call.
    pub generation: u64,
}

impl StepFailure {
    /// `"<step>: <error detail>"`, as recorded in the ledger.
    pub fn reason(&self) -> String {
        format!("{}: {}", self.step, self.error)
    }
}

/// Run `item` from [`Step::Start`] to [`Step::Done`].
pub(crate) async fn execute(
    inner: &Arc<Inner>,
    item: &WorkItem,
    span: &Span,
) -> std::result::Result<(), StepFailure> {
    let mut pipeline = Pipeline {
        inner,
        span,
        step: Step::Start,
        generation: 0,
    };
    let result = match &item.job {
        Job::Provision { user, group_id } => pipeline.provision(user, *group_id).await,
        Job::PurgeUser {
            user_id,
            barcode_field_id,
            harvest,
        } => {
            pipeline
                .purge_user(*user_id, *barcode_field_id, harvest)
                .await
        }
        Job::PurgeCredential { credential_id } => pipeline.purge_credential(*credential_id).await,
    };
    match result {
        Ok(()) => {
            pipeline.enter(Step::Done);
            Ok(())
        }
        Err(error) => Err(StepFailure {
            step: pipeline.step,
            error,
            generation: pipeline.generation,
        }),
    }
}

/// A conflict on a binding means the binding already exists.
fn tolerate_conflict(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_conflict() => Ok(()),
        other => other,
    }
}

struct Pipeline<'a> {
    inner: &'a Arc<Inner>,
    span: &'a Span,
    step: Step,
    generation: u64,
}

impl<'a> Pipeline<'a> {
    fn api(&self) -> &'a dyn AccessControl {
        let inner: &'a Arc<Inner> = self.inner;
        inner.api.as_ref()
    }

    fn enter(&mut self, step: Step) {
        record_step_transition(self.span, self.step.name(), step.name());
        self.step = step;
    }

    async fn call(&mut self, operation: &'static str) -> Result<Call> {
        let call = self.inner.begin(operation).await?;
        self.generation = call.generation();
        Ok(call)
    }

    async fn provision(&mut self, user: &AccessUser, group_id: i64) -> Result<()> {
        let api = self.api();

        self.enter(Step::EnsureUserExists);
        let call = self.call("create_user").await?;
        let created = api.create_user(call.bearer(), user).await;
        let user_id = match call.finish(created) {
            Ok(id) => id,
            Err(e) if e.is_conflict() => {
                debug!(external_id = %user.external_id, "user already exists, updating");
                let call = self.call("find_user").await?;
                let found = api
                    .find_user_by_external_id(call.bearer(), &user.external_id)
                    .await;
                let id = call.finish(found)?.ok_or(e)?;

                let call = self.call("update_user").await?;
                let updated = api.update_user(call.bearer(), id, user).await;
                call.finish(updated)?;
                id
            }
            Err(e) => return Err(e),
        };

        self.enter(Step::SetAttributes);
        for field in &user.custom_fields {
            let call = self.call("set_custom_field").await?;
            let set = api.set_custom_field(call.bearer(), user_id, field).await;
            call.finish(set)?;
        }

        self.enter(Step::EnsureCredentialExists);
        let credential = NewCredential::for_barcode(&user.external_id);
        let call = self.call("create_credential").await?;
        let created = api.create_credential(call.bearer(), &credential).await;
        let credential_id = match call.finish(created) {
            Ok(id) => id,
            Err(e) if e.is_conflict() => {
                debug!(reference_id = %credential.reference_id, "credential already exists");
                let call = self.call("find_credential").await?;
                let found = api
                    .find_credential_by_reference(call.bearer(), &credential.reference_id)
                    .await;
                call.finish(found)?.ok_or(e)?
            }
            Err(e) => return Err(e),
        };

        self.enter(Step::BindCredential);
        let call = self.call("assign_credential").await?;
        let assigned = api
            .assign_credential(call.bearer(), user_id, credential_id)
            .await;
        tolerate_conflict(call.finish(assigned))?;

        self.enter(Step::BindGroup);
        let call = self.call("assign_group").await?;
        let assigned = api.assign_group(call.bearer(), group_id, user_id).await;
        tolerate_conflict(call.finish(assigned))
    }

    async fn purge_user(
        &mut self,
        user_id: i64,
        barcode_field_id: i64,
        harvest: &Harvest,
    ) -> Result<()> {
        let api = self.api();

        self.enter(Step::ReadBarcode);
        let call = self.call("custom_fields").await?;
        let fields = api.custom_fields(call.bearer(), user_id).await;
        let fields = call.finish(fields)?;
        let barcode = field_value(&fields, barcode_field_id)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| Error::Other(format!("user {user_id} has no barcode field")))?;
        harvest.insert(barcode);

        self.enter(Step::DeleteUser);
        let call = self.call("delete_user").await?;
        let deleted = api.delete_user(call.bearer(), user_id).await;
        call.finish(deleted)
    }

    async fn purge_credential(&mut self, credential_id: i64) -> Result<()> {
        let api = self.api();

        self.enter(Step::DeleteCredential);
        let call = self.call("delete_credential").await?;
        let deleted = api.delete_credential(call.bearer(), credential_id).await;
        call.finish(deleted)
    }
}
