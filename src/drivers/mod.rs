//! Drivers: front ends that feed work items into the orchestrator.
//!
//! - [`migrate`]: every membership record, submitted concurrently.
//! - [`webhook`]: one event per inbound request.
//! - [`cleanup`]: a two-phase deletion sweep.

pub mod cleanup;
pub mod migrate;
pub mod webhook;

use opentelemetry::KeyValue;
use tracing::warn;

use crate::config::Config;
use crate::model::{AccessUser, FieldMapping, Member, WorkItem, is_valid_id};
use crate::telemetry::metrics;

/// How membership records become provisioning work.
#[derive(Debug, Clone)]
pub struct Provisioning {
    pub group_id: i64,
    pub fields: FieldMapping,
    pub facility_code: Option<String>,
}

impl Provisioning {
    pub fn from_config(config: &Config) -> Self {
        Self {
            group_id: config.brivo.member_group_id,
            fields: FieldMapping {
                barcode_field_id: config.brivo.barcode_field_id,
                user_type_field_id: config.brivo.user_type_field_id,
            },
            facility_code: config.brivo.facility_code.clone(),
        }
    }

    /// Build the provisioning item for `member`, or `None` if its identifier
    /// fails the validity predicate.
    pub fn work_item(&self, member: &Member, driver: &'static str) -> Option<WorkItem> {
        if !is_valid_id(self.facility_code.as_deref(), &member.id) {
            warn!(id = %member.id, driver, "skipping member with invalid barcode id");
            metrics::entities_filtered().add(1, &[KeyValue::new("driver", driver)]);
            return None;
        }
        let user = AccessUser::from_member(member, self.fields);
        Some(WorkItem::provision(user, self.group_id))
    }
}
