//! Access-control system seam.
//!
//! Every method performs exactly one remote call using the bearer token it
//! is handed. Implementations classify responses into the crate error kinds:
//! an expired token is [`Error::AuthExpired`](crate::error::Error::AuthExpired),
//! an existing entity is [`Error::Conflict`](crate::error::Error::Conflict).

pub mod brivo;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{AccessUser, CustomFieldValue, NewCredential, RemoteCredential, RemoteUser};

pub use brivo::{BrivoAuthenticator, BrivoClient};

#[async_trait]
pub trait AccessControl: Send + Sync {
    /// Returns the new user id.
    async fn create_user(&self, bearer: &str, user: &AccessUser) -> Result<i64>;

    async fn find_user_by_external_id(&self, bearer: &str, external_id: &str)
    -> Result<Option<i64>>;

    async fn update_user(&self, bearer: &str, user_id: i64, user: &AccessUser) -> Result<()>;

    async fn set_custom_field(
        &self,
        bearer: &str,
        user_id: i64,
        field: &CustomFieldValue,
    ) -> Result<()>;

    async fn custom_fields(&self, bearer: &str, user_id: i64) -> Result<Vec<CustomFieldValue>>;

    /// Returns the new credential id.
    async fn create_credential(&self, bearer: &str, credential: &NewCredential) -> Result<i64>;

    async fn find_credential_by_reference(
        &self,
        bearer: &str,
        reference_id: &str,
    ) -> Result<Option<i64>>;

    async fn assign_credential(&self, bearer: &str, user_id: i64, credential_id: i64)
    -> Result<()>;

    async fn assign_group(&self, bearer: &str, group_id: i64, user_id: i64) -> Result<()>;

    /// All users, or only the members of `group_id`.
    async fn list_users(&self, bearer: &str, group_id: Option<i64>) -> Result<Vec<RemoteUser>>;

    async fn list_credentials(&self, bearer: &str) -> Result<Vec<RemoteCredential>>;

    async fn delete_user(&self, bearer: &str, user_id: i64) -> Result<()>;

    async fn delete_credential(&self, bearer: &str, credential_id: i64) -> Result<()>;
}
