//! Access token holder for the access-control system.
//!
//! The holder is the only owner of the current bearer token. Every refresh
//! bumps a generation counter so a caller that was rejected can tell whether
//! the token it used has already been replaced.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;

use crate::error::Result;

/// A bearer token and the instant it stops being accepted.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: SecretString,
    pub expires_at: DateTime<Utc>,
    /// Present when the auth exchange issued one (password grant).
    pub refresh_token: Option<SecretString>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: SecretString::from(value.into()),
            expires_at,
            refresh_token: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(SecretString::from(refresh_token.into()));
        self
    }
}

/// Performs the authentication exchange with an external system.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Initial exchange: credentials in, token out.
    async fn authenticate(&self) -> Result<AccessToken>;

    /// Replace `current` with a fresh token.
    async fn refresh(&self, current: &AccessToken) -> Result<AccessToken>;
}

/// A token value paired with the generation it was read at.
#[derive(Debug, Clone)]
pub struct TokenLease {
    value: SecretString,
    pub generation: u64,
}

impl TokenLease {
    pub fn bearer(&self) -> &str {
        self.value.expose_secret()
    }
}

#[derive(Debug)]
struct TokenState {
    token: AccessToken,
    generation: u64,
    /// Set when a remote call rejected this token before its expiry instant.
    rejected: bool,
    /// Grace applied to this token, capped at half its remaining lifetime.
    grace: Duration,
}

/// A short-lived token must not be born inside its own grace window.
fn effective_grace(configured: Duration, expires_at: DateTime<Utc>) -> Duration {
    let half_life = (expires_at - Utc::now()) / 2;
    configured.min(half_life).max(Duration::zero())
}

/// Holds the current token and its expiry for one external system.
#[derive(Debug)]
pub struct TokenHolder {
    state: RwLock<TokenState>,
    /// Treat the token as expired this long before `expires_at`.
    grace: Duration,
}

impl TokenHolder {
    pub fn new(token: AccessToken, grace: Duration) -> Self {
        Self {
            state: RwLock::new(TokenState {
                grace: effective_grace(grace, token.expires_at),
                token,
                generation: 0,
                rejected: false,
            }),
            grace,
        }
    }

    /// Compares wall-clock UTC now against the expiry instant.
    pub async fn is_expired(&self) -> bool {
        let state = self.state.read().await;
        state.rejected || Utc::now() + state.grace >= state.token.expires_at
    }

    pub async fn lease(&self) -> TokenLease {
        let state = self.state.read().await;
        TokenLease {
            value: state.token.value.clone(),
            generation: state.generation,
        }
    }

    pub async fn current(&self) -> AccessToken {
        self.state.read().await.token.clone()
    }

    /// Grace in effect for the current token.
    pub async fn grace(&self) -> Duration {
        self.state.read().await.grace
    }

    pub async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }

    /// Mark the token of `generation` as rejected.
    ///
    /// No-op if the token was already replaced since that lease was taken.
    pub async fn reject(&self, generation: u64) -> bool {
        let mut state = self.state.write().await;
        if state.generation == generation {
            state.rejected = true;
            true
        } else {
            false
        }
    }

    /// Atomically install a refreshed token. Returns the new generation.
    pub async fn replace(&self, token: AccessToken) -> u64 {
        let mut state = self.state.write().await;
        state.grace = effective_grace(self.grace, token.expires_at);
        state.token = token;
        state.generation += 1;
        state.rejected = false;
        state.generation
    }
}
