//! Brivo OnAir REST client and OAuth2 authenticator.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::AccessControl;
use crate::config::BrivoConfig;
use crate::config::secrets::basic_credentials;
use crate::error::{Error, Result};
use crate::model::{AccessUser, CustomFieldValue, NewCredential, RemoteCredential, RemoteUser};
use crate::token::{AccessToken, Authenticator};

const PAGE_SIZE: usize = 100;
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Map a non-2xx response to the error taxonomy.
pub(crate) fn classify(status: u16, body: String) -> Error {
    match status {
        401 => Error::AuthExpired,
        409 => Error::Conflict(body),
        400 if body.contains("Duplicate") => Error::Conflict(body),
        _ => Error::Remote { status, body },
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify(status.as_u16(), body))
}

#[derive(Debug, Deserialize)]
struct Created {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    count: usize,
}

/// REST client for the access-control API.
#[derive(Debug, Clone)]
pub struct BrivoClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl BrivoClient {
    pub fn new(config: &BrivoConfig) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, method: Method, path: &str, bearer: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(bearer)
            .header("api-key", self.api_key.expose_secret())
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<()> {
        check(request.send().await?).await?;
        Ok(())
    }

    async fn paginate<T: DeserializeOwned>(&self, path: &str, bearer: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut offset = 0usize;
        loop {
            let page: Page<T> = self
                .send_json(
                    self.request(Method::GET, path, bearer)
                        .query(&[("offset", offset), ("pageSize", PAGE_SIZE)]),
                )
                .await?;
            let fetched = page.data.len();
            items.extend(page.data);
            offset += fetched;
            debug!(path, offset, count = page.count, "fetched page");
            if fetched == 0 || offset >= page.count {
                break;
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl AccessControl for BrivoClient {
    #[instrument(skip_all, fields(external_id = %user.external_id))]
    async fn create_user(&self, bearer: &str, user: &AccessUser) -> Result<i64> {
        let created: Created = self
            .send_json(self.request(Method::POST, "/users", bearer).json(user))
            .await?;
        Ok(created.id)
    }

    async fn find_user_by_external_id(
        &self,
        bearer: &str,
        external_id: &str,
    ) -> Result<Option<i64>> {
        let path = format!("/users/{external_id}/external");
        let response = self.request(Method::GET, &path, bearer).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let found: Created = check(response).await?.json().await?;
        Ok(Some(found.id))
    }

    async fn update_user(&self, bearer: &str, user_id: i64, user: &AccessUser) -> Result<()> {
        let path = format!("/users/{user_id}");
        self.send_empty(self.request(Method::PUT, &path, bearer).json(user))
            .await
    }

    async fn set_custom_field(
        &self,
        bearer: &str,
        user_id: i64,
        field: &CustomFieldValue,
    ) -> Result<()> {
        let path = format!("/users/{user_id}/custom-fields/{}", field.id);
        self.send_empty(
            self.request(Method::PUT, &path, bearer)
                .json(&serde_json::json!({ "value": field.value })),
        )
        .await
    }

    async fn custom_fields(&self, bearer: &str, user_id: i64) -> Result<Vec<CustomFieldValue>> {
        let path = format!("/users/{user_id}/custom-fields");
        let page: Page<CustomFieldValue> = self
            .send_json(self.request(Method::GET, &path, bearer))
            .await?;
        Ok(page.data)
    }

    #[instrument(skip_all, fields(reference_id = %credential.reference_id))]
    async fn create_credential(&self, bearer: &str, credential: &NewCredential) -> Result<i64> {
        let created: Created = self
            .send_json(
                self.request(Method::POST, "/credentials", bearer)
                    .json(credential),
            )
            .await?;
        Ok(created.id)
    }

    async fn find_credential_by_reference(
        &self,
        bearer: &str,
        reference_id: &str,
    ) -> Result<Option<i64>> {
        let page: Page<RemoteCredential> = self
            .send_json(
                self.request(Method::GET, "/credentials", bearer)
                    .query(&[("filter", format!("reference_id__eq:{reference_id}"))]),
            )
            .await?;
        Ok(page
            .data
            .into_iter()
            .find(|c| c.reference_id == reference_id)
            .map(|c| c.id))
    }

    async fn assign_credential(
        &self,
        bearer: &str,
        user_id: i64,
        credential_id: i64,
    ) -> Result<()> {
        let path = format!("/users/{user_id}/credentials/{credential_id}");
        self.send_empty(self.request(Method::PUT, &path, bearer))
            .await
    }

    async fn assign_group(&self, bearer: &str, group_id: i64, user_id: i64) -> Result<()> {
        let path = format!("/groups/{group_id}/users/{user_id}");
        self.send_empty(self.request(Method::PUT, &path, bearer))
            .await
    }

    async fn list_users(&self, bearer: &str, group_id: Option<i64>) -> Result<Vec<RemoteUser>> {
        match group_id {
            Some(id) => self.paginate(&format!("/groups/{id}/users"), bearer).await,
            None => self.paginate("/users", bearer).await,
        }
    }

    async fn list_credentials(&self, bearer: &str) -> Result<Vec<RemoteCredential>> {
        self.paginate("/credentials", bearer).await
    }

    async fn delete_user(&self, bearer: &str, user_id: i64) -> Result<()> {
        let path = format!("/users/{user_id}");
        self.send_empty(self.request(Method::DELETE, &path, bearer))
            .await
    }

    async fn delete_credential(&self, bearer: &str, credential_id: i64) -> Result<()> {
        let path = format!("/credentials/{credential_id}");
        self.send_empty(self.request(Method::DELETE, &path, bearer))
            .await
    }
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

/// OAuth2 exchange against the access-control auth endpoint.
#[derive(Debug, Clone)]
pub struct BrivoAuthenticator {
    http: reqwest::Client,
    auth_url: String,
    username: String,
    password: SecretString,
    client_credentials: SecretString,
    api_key: SecretString,
}

impl BrivoAuthenticator {
    pub fn new(config: &BrivoConfig) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            auth_url: config.auth_url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            client_credentials: basic_credentials(&config.client_id, &config.client_secret),
            api_key: config.api_key.clone(),
        })
    }

    async fn exchange(&self, params: &[(&str, &str)]) -> Result<AccessToken> {
        let response = self
            .http
            .post(&self.auth_url)
            .query(params)
            .header(
                "Authorization",
                format!("Basic {}", self.client_credentials.expose_secret()),
            )
            .header("api-key", self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| Error::Refresh(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Refresh(format!(
                "token request failed with status {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Refresh(format!("failed to parse token response: {e}")))?;

        let mut access = AccessToken::new(
            token.access_token,
            Utc::now() + Duration::seconds(token.expires_in),
        );
        if let Some(refresh_token) = token.refresh_token {
            access = access.with_refresh_token(refresh_token);
        }
        debug!(expires_at = %access.expires_at, "acquired access token");
        Ok(access)
    }
}

#[async_trait]
impl Authenticator for BrivoAuthenticator {
    async fn authenticate(&self) -> Result<AccessToken> {
        self.exchange(&[
            ("grant_type", "password"),
            ("username", self.username.as_str()),
            ("password", self.password.expose_secret()),
        ])
        .await
    }

    async fn refresh(&self, current: &AccessToken) -> Result<AccessToken> {
        match current.refresh_token {
            Some(ref refresh_token) => {
                self.exchange(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token.expose_secret()),
                ])
                .await
            }
            None => self.authenticate().await,
        }
    }
}
