//! In-memory fakes of the access-control and authenticator seams.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use membersync::access::AccessControl;
use membersync::error::{Error, Result};
use membersync::model::{
    AccessUser, CustomFieldValue, FieldMapping, Member, NewCredential, RemoteCredential,
    RemoteUser,
};
use membersync::token::{AccessToken, Authenticator};

pub const FIELDS: FieldMapping = FieldMapping {
    barcode_field_id: 7,
    user_type_field_id: 9,
};
pub const GROUP: i64 = 42;

pub fn member(id: &str) -> Member {
    Member {
        id: id.to_string(),
        first_name: "Vito".into(),
        last_name: "Fontana".into(),
        email: format!("{id}@example.org"),
        mobile_phone: "555-0100".into(),
        active: true,
        status: "Active".into(),
        ..Default::default()
    }
}

pub fn user(id: &str) -> AccessUser {
    AccessUser::from_member(&member(id), FIELDS)
}

/// A token that stays valid for an hour.
pub fn fresh_token() -> AccessToken {
    AccessToken::new("token-0", Utc::now() + chrono::Duration::hours(1))
}

/// A token that is already past its expiry instant.
pub fn expired_token() -> AccessToken {
    AccessToken::new("token-0", Utc::now() - chrono::Duration::seconds(5))
}

// ---------------------------------------------------------------------------
// Authenticator
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FakeAuthenticator {
    refreshes: AtomicUsize,
    authentications: AtomicUsize,
    delay: Duration,
    fail: AtomicBool,
    /// Lifetime of issued tokens. One hour when unset.
    lifetime: Option<chrono::Duration>,
}

impl FakeAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each exchange takes `delay`.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Issued tokens expire `lifetime` after the exchange.
    pub fn with_lifetime(lifetime: chrono::Duration) -> Self {
        Self {
            lifetime: Some(lifetime),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        let auth = Self::default();
        auth.fail.store(true, Ordering::SeqCst);
        auth
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn authentications(&self) -> usize {
        self.authentications.load(Ordering::SeqCst)
    }

    async fn issue(&self, n: usize) -> Result<AccessToken> {
        tokio::time::sleep(self.delay).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Refresh("token request failed with status 400".into()));
        }
        Ok(AccessToken::new(
            format!("token-{n}"),
            Utc::now() + self.lifetime.unwrap_or(chrono::Duration::hours(1)),
        ))
    }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn authenticate(&self) -> Result<AccessToken> {
        self.authentications.fetch_add(1, Ordering::SeqCst);
        self.issue(0).await
    }

    async fn refresh(&self, _current: &AccessToken) -> Result<AccessToken> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        self.issue(n).await
    }
}

// ---------------------------------------------------------------------------
// Access-control system
// ---------------------------------------------------------------------------

/// One logged remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub operation: &'static str,
    pub key: String,
    pub bearer: String,
}

#[derive(Debug, Clone, Default)]
pub struct FakeUser {
    pub external_id: String,
    pub fields: Vec<CustomFieldValue>,
    pub suspended: bool,
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    users: HashMap<i64, FakeUser>,
    credentials: HashMap<i64, String>,
    user_credentials: HashSet<(i64, i64)>,
    groups: HashSet<(i64, i64)>,
    calls: Vec<CallRecord>,
    /// (operation, key) -> error to return, consumed on use.
    faults: HashMap<(&'static str, String), Vec<Error>>,
    /// Operations that answer 401 on every call.
    always_unauthorized: HashSet<&'static str>,
}

impl State {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn external_id(&self, user_id: i64) -> String {
        self.users
            .get(&user_id)
            .map(|u| u.external_id.clone())
            .unwrap_or_else(|| format!("user:{user_id}"))
    }
}

/// In-memory access-control system, instrumented for concurrency.
#[derive(Debug)]
pub struct FakeAccess {
    state: Mutex<State>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    latency: Duration,
}

impl Default for FakeAccess {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAccess {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1000,
                ..State::default()
            }),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            latency: Duration::from_millis(2),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Make the next `operation` call for `key` fail with `error`.
    pub fn fail_once(&self, operation: &'static str, key: &str, error: Error) {
        self.lock()
            .faults
            .entry((operation, key.to_string()))
            .or_default()
            .push(error);
    }

    pub fn always_unauthorized(&self, operation: &'static str) {
        self.lock().always_unauthorized.insert(operation);
    }

    /// Seed an existing user. Returns its id.
    pub fn seed_user(&self, external_id: &str, barcode: Option<&str>, group: Option<i64>) -> i64 {
        let mut state = self.lock();
        let id = state.id();
        let fields = barcode
            .map(|b| {
                vec![CustomFieldValue {
                    id: FIELDS.barcode_field_id,
                    value: b.to_string(),
                }]
            })
            .unwrap_or_default();
        state.users.insert(
            id,
            FakeUser {
                external_id: external_id.to_string(),
                fields,
                suspended: false,
            },
        );
        if let Some(group) = group {
            state.groups.insert((group, id));
        }
        id
    }

    /// Seed an existing credential. Returns its id.
    pub fn seed_credential(&self, reference_id: &str) -> i64 {
        let mut state = self.lock();
        let id = state.id();
        state.credentials.insert(id, reference_id.to_string());
        id
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, key: &str) -> Vec<&'static str> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.key == key)
            .map(|c| c.operation)
            .collect()
    }

    pub fn user_count(&self) -> usize {
        self.lock().users.len()
    }

    pub fn user_id(&self, external_id: &str) -> Option<i64> {
        self.lock()
            .users
            .iter()
            .find(|(_, u)| u.external_id == external_id)
            .map(|(id, _)| *id)
    }

    pub fn user(&self, user_id: i64) -> Option<FakeUser> {
        self.lock().users.get(&user_id).cloned()
    }

    pub fn credential_count(&self) -> usize {
        self.lock().credentials.len()
    }

    pub fn has_credential(&self, reference_id: &str) -> bool {
        self.lock().credentials.values().any(|r| r == reference_id)
    }

    pub fn in_group(&self, group_id: i64, user_id: i64) -> bool {
        self.lock().groups.contains(&(group_id, user_id))
    }

    pub fn binding_count(&self) -> usize {
        self.lock().user_credentials.len()
    }

    /// Most simultaneous calls observed.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Record the call, simulate latency, then apply any injected fault.
    async fn enter(&self, operation: &'static str, key: String, bearer: &str) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.lock();
        state.calls.push(CallRecord {
            operation,
            key: key.clone(),
            bearer: bearer.to_string(),
        });
        if state.always_unauthorized.contains(operation) {
            return Err(Error::AuthExpired);
        }
        if let Some(queue) = state.faults.get_mut(&(operation, key)) {
            if !queue.is_empty() {
                return Err(queue.remove(0));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AccessControl for FakeAccess {
    async fn create_user(&self, bearer: &str, user: &AccessUser) -> Result<i64> {
        self.enter("create_user", user.external_id.clone(), bearer)
            .await?;
        let mut state = self.lock();
        if state
            .users
            .values()
            .any(|u| u.external_id == user.external_id)
        {
            return Err(Error::Conflict("user with external id exists".into()));
        }
        let id = state.id();
        state.users.insert(
            id,
            FakeUser {
                external_id: user.external_id.clone(),
                fields: Vec::new(),
                suspended: user.suspended,
            },
        );
        Ok(id)
    }

    async fn find_user_by_external_id(
        &self,
        bearer: &str,
        external_id: &str,
    ) -> Result<Option<i64>> {
        self.enter("find_user", external_id.to_string(), bearer)
            .await?;
        Ok(self.user_id(external_id))
    }

    async fn update_user(&self, bearer: &str, user_id: i64, user: &AccessUser) -> Result<()> {
        let key = self.lock().external_id(user_id);
        self.enter("update_user", key, bearer).await?;
        let mut state = self.lock();
        let existing = state
            .users
            .get_mut(&user_id)
            .ok_or(Error::Remote {
                status: 404,
                body: "no such user".into(),
            })?;
        existing.suspended = user.suspended;
        Ok(())
    }

    async fn set_custom_field(
        &self,
        bearer: &str,
        user_id: i64,
        field: &CustomFieldValue,
    ) -> Result<()> {
        let key = self.lock().external_id(user_id);
        self.enter("set_custom_field", key, bearer).await?;
        let mut state = self.lock();
        let user = state.users.get_mut(&user_id).ok_or(Error::Remote {
            status: 404,
            body: "no such user".into(),
        })?;
        user.fields.retain(|f| f.id != field.id);
        user.fields.push(field.clone());
        Ok(())
    }

    async fn custom_fields(&self, bearer: &str, user_id: i64) -> Result<Vec<CustomFieldValue>> {
        let key = self.lock().external_id(user_id);
        self.enter("custom_fields", key, bearer).await?;
        Ok(self
            .lock()
            .users
            .get(&user_id)
            .map(|u| u.fields.clone())
            .unwrap_or_default())
    }

    async fn create_credential(&self, bearer: &str, credential: &NewCredential) -> Result<i64> {
        self.enter("create_credential", credential.reference_id.clone(), bearer)
            .await?;
        let mut state = self.lock();
        if state
            .credentials
            .values()
            .any(|r| *r == credential.reference_id)
        {
            return Err(Error::Conflict("Duplicate Credential Found".into()));
        }
        let id = state.id();
        state
            .credentials
            .insert(id, credential.reference_id.clone());
        Ok(id)
    }

    async fn find_credential_by_reference(
        &self,
        bearer: &str,
        reference_id: &str,
    ) -> Result<Option<i64>> {
        self.enter("find_credential", reference_id.to_string(), bearer)
            .await?;
        Ok(self
            .lock()
            .credentials
            .iter()
            .find(|(_, r)| *r == reference_id)
            .map(|(id, _)| *id))
    }

    async fn assign_credential(
        &self,
        bearer: &str,
        user_id: i64,
        credential_id: i64,
    ) -> Result<()> {
        let key = self.lock().external_id(user_id);
        self.enter("assign_credential", key, bearer).await?;
        self.lock().user_credentials.insert((user_id, credential_id));
        Ok(())
    }

    async fn assign_group(&self, bearer: &str, group_id: i64, user_id: i64) -> Result<()> {
        let key = self.lock().external_id(user_id);
        self.enter("assign_group", key, bearer).await?;
        self.lock().groups.insert((group_id, user_id));
        Ok(())
    }

    async fn list_users(&self, bearer: &str, group_id: Option<i64>) -> Result<Vec<RemoteUser>> {
        self.enter("list_users", String::new(), bearer).await?;
        let state = self.lock();
        let mut users: Vec<RemoteUser> = state
            .users
            .iter()
            .filter(|(id, _)| match group_id {
                Some(group) => state.groups.contains(&(group, **id)),
                None => true,
            })
            .map(|(id, u)| RemoteUser {
                id: *id,
                external_id: Some(u.external_id.clone()),
                first_name: String::new(),
                last_name: String::new(),
                suspended: u.suspended,
            })
            .collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn list_credentials(&self, bearer: &str) -> Result<Vec<RemoteCredential>> {
        self.enter("list_credentials", String::new(), bearer)
            .await?;
        let mut credentials: Vec<RemoteCredential> = self
            .lock()
            .credentials
            .iter()
            .map(|(id, r)| RemoteCredential {
                id: *id,
                reference_id: r.clone(),
            })
            .collect();
        credentials.sort_by_key(|c| c.id);
        Ok(credentials)
    }

    async fn delete_user(&self, bearer: &str, user_id: i64) -> Result<()> {
        let key = self.lock().external_id(user_id);
        self.enter("delete_user", key, bearer).await?;
        let mut state = self.lock();
        state.users.remove(&user_id).ok_or(Error::Remote {
            status: 404,
            body: "no such user".into(),
        })?;
        state.groups.retain(|(_, u)| *u != user_id);
        Ok(())
    }

    async fn delete_credential(&self, bearer: &str, credential_id: i64) -> Result<()> {
        let key = format!("credential:{credential_id}");
        self.enter("delete_credential", key, bearer).await?;
        self.lock()
            .credentials
            .remove(&credential_id)
            .map(|_| ())
            .ok_or(Error::Remote {
                status: 404,
                body: "no such credential".into(),
            })
    }
}
