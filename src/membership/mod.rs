//! Membership system of record.

pub mod mindbody;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::Member;

pub use mindbody::MindbodyClient;

/// Source of membership records for the bulk driver.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// Every membership record. A failure aborts the run.
    async fn list_members(&self) -> Result<Vec<Member>>;
}
