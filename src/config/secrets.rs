//! Secret handling utilities.
//!
//! Re-exports secrecy types and builds the Basic authorization value the
//! access-control auth endpoint expects.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// `base64(client_id:client_secret)` for a Basic authorization header.
pub fn basic_credentials(client_id: &str, client_secret: &SecretString) -> SecretString {
    let raw = format!("{client_id}:{}", client_secret.expose_secret());
    SecretString::from(BASE64.encode(raw))
}
