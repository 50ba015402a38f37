//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Credentials are wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::str::FromStr;

pub const DEFAULT_BRIVO_API_URL: &str = "https://api.brivo.com/v1/api";
pub const DEFAULT_BRIVO_AUTH_URL: &str = "https://auth.brivo.com/oauth/token";
pub const DEFAULT_MINDBODY_API_URL: &str = "https://api.mindbodyonline.com/public/v6";

/// Access-control system (Brivo) settings.
#[derive(Debug, Clone)]
pub struct BrivoConfig {
    pub username: String,
    pub password: SecretString,
    pub client_id: String,
    pub client_secret: SecretString,
    pub api_key: SecretString,
    pub api_url: String,
    pub auth_url: String,
    pub member_group_id: i64,
    pub barcode_field_id: i64,
    pub user_type_field_id: i64,
    /// Identifier prefix required by the validity predicate.
    pub facility_code: Option<String>,
    /// Maximum simultaneous outbound calls.
    pub rate_limit: usize,
}

/// Membership system (MINDBODY) settings.
#[derive(Debug, Clone)]
pub struct MindbodyConfig {
    pub api_key: SecretString,
    pub username: String,
    pub password: SecretString,
    pub site: String,
    pub api_url: String,
    pub webhook_key: Option<SecretString>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub brivo: BrivoConfig,
    pub mindbody: MindbodyConfig,
    pub port: u16,
    /// Fetch only one page of membership records.
    pub debug: bool,
    pub max_requeues: u32,
    pub token_grace_secs: i64,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let brivo = BrivoConfig {
            username: required_var("BRIVO_USERNAME")?,
            password: SecretString::from(required_var("BRIVO_PASSWORD")?),
            client_id: required_var("BRIVO_CLIENT_ID")?,
            client_secret: SecretString::from(required_var("BRIVO_CLIENT_SECRET")?),
            api_key: SecretString::from(required_var("BRIVO_API_KEY")?),
            api_url: var_or("BRIVO_API_URL", DEFAULT_BRIVO_API_URL),
            auth_url: var_or("BRIVO_AUTH_URL", DEFAULT_BRIVO_AUTH_URL),
            member_group_id: required_parsed("BRIVO_MEMBER_GROUP_ID")?,
            barcode_field_id: required_parsed("BRIVO_BARCODE_FIELD_ID")?,
            user_type_field_id: required_parsed("BRIVO_USER_TYPE_FIELD_ID")?,
            facility_code: std::env::var("BRIVO_FACILITY_CODE")
                .ok()
                .filter(|code| !code.trim().is_empty()),
            rate_limit: parsed_or("BRIVO_RATE_LIMIT", 20)?,
        };
        if brivo.rate_limit == 0 {
            return Err(Error::Config("BRIVO_RATE_LIMIT must be at least 1".into()));
        }

        let mindbody = MindbodyConfig {
            api_key: SecretString::from(required_var("MINDBODY_API_KEY")?),
            username: required_var("MINDBODY_USERNAME")?,
            password: SecretString::from(required_var("MINDBODY_PASSWORD")?),
            site: var_or("MINDBODY_SITE", "-99"),
            api_url: var_or("MINDBODY_API_URL", DEFAULT_MINDBODY_API_URL),
            webhook_key: std::env::var("MINDBODY_WEBHOOK_KEY")
                .ok()
                .map(SecretString::from),
        };

        Ok(Self {
            brivo,
            mindbody,
            port: parsed_or("PORT", 3002)?,
            debug: parsed_or("DEBUG", false)?,
            max_requeues: parsed_or("MAX_REQUEUES", 3)?,
            token_grace_secs: parsed_or("TOKEN_GRACE_SECS", 30)?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: var_or("LOG_LEVEL", "info"),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn required_parsed<T: FromStr>(name: &str) -> Result<T> {
    let raw = required_var(name)?;
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("environment variable {name} has invalid value {raw:?}")))
}

fn parsed_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            Error::Config(format!("environment variable {name} has invalid value {raw:?}"))
        }),
        Err(_) => Ok(default),
    }
}
