//! Outcome ledger and run report.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

use crate::error::Result;

/// Terminal status of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    /// Carries `"<step>: <error detail>"`.
    Failed(String),
}

impl OutcomeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeStatus::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeRecord {
    pub key: String,
    pub status: OutcomeStatus,
}

/// Append-only record of per-entity outcomes.
#[derive(Debug, Default)]
pub struct OutcomeLedger {
    records: Mutex<Vec<OutcomeRecord>>,
}

impl OutcomeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: impl Into<String>, status: OutcomeStatus) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push(OutcomeRecord {
            key: key.into(),
            status,
        });
    }

    /// Every write, in order.
    pub fn records(&self) -> Vec<OutcomeRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Latest status for `key`.
    pub fn status(&self, key: &str) -> Option<OutcomeStatus> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .iter()
            .rev()
            .find(|r| r.key == key)
            .map(|r| r.status.clone())
    }

    /// Collapse the ledger, last write per key wins.
    pub fn summarize(&self) -> Summary {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut latest: BTreeMap<&str, &OutcomeStatus> = BTreeMap::new();
        for record in records.iter() {
            latest.insert(record.key.as_str(), &record.status);
        }

        let mut summary = Summary::default();
        for (key, status) in latest {
            match status {
                OutcomeStatus::Success => summary.success_count += 1,
                OutcomeStatus::Failed(reason) => {
                    summary.failures.insert(key.to_string(), reason.clone());
                }
            }
        }
        summary
    }
}

/// Final tally of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub success_count: usize,
    pub failures: BTreeMap<String, String>,
}

impl Summary {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Plain-text report body.
    pub fn render(&self) -> String {
        let mut out = String::from("---------- OUTPUT LOG ----------\n");
        let _ = writeln!(out, "Users Processed Successfully: {}", self.success_count);
        let _ = writeln!(out, "Users Failed: {}", self.failures.len());
        for (key, reason) in &self.failures {
            let _ = writeln!(out, "External ID: {key} Reason: {reason}");
        }
        out
    }

    /// Write the report once at the end of a run.
    pub async fn write_report(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, self.render()).await?;
        Ok(())
    }
}
