//! MINDBODY public API client.

use async_trait::async_trait;
use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::MemberDirectory;
use crate::config::MindbodyConfig;
use crate::error::{Error, Result};
use crate::model::Member;

/// Server-side maximum page size.
const PAGE_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserToken {
    access_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Pagination {
    #[serde(default)]
    page_size: usize,
    #[serde(default)]
    total_results: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ClientPage {
    #[serde(default)]
    pagination_response: Pagination,
    #[serde(default)]
    clients: Vec<Member>,
}

#[derive(Debug, Clone)]
pub struct MindbodyClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    site: String,
    username: String,
    password: SecretString,
    /// Stop after the first page.
    single_page: bool,
}

impl MindbodyClient {
    pub fn new(config: &MindbodyConfig, single_page: bool) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()?,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            site: config.site.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            single_page,
        })
    }

    fn with_site(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("SiteId", &self.site)
            .header("Api-Key", self.api_key.expose_secret())
    }

    /// Issue a staff user token.
    pub async fn issue_token(&self) -> Result<SecretString> {
        let body = serde_json::json!({
            "Username": self.username,
            "Password": self.password.expose_secret(),
        });
        let response = self
            .with_site(
                self.http
                    .post(format!("{}/usertoken/issue", self.base_url))
                    .json(&body),
            )
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Remote { status, body });
        }
        let token: UserToken = response.json().await?;
        Ok(SecretString::from(token.access_token))
    }

    async fn client_page(&self, token: &SecretString, offset: usize) -> Result<ClientPage> {
        let response = self
            .with_site(
                self.http
                    .get(format!("{}/client/clients", self.base_url))
                    .query(&[("limit", PAGE_LIMIT), ("offset", offset)]),
            )
            .header("Authorization", token.expose_secret())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Remote { status, body });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl MemberDirectory for MindbodyClient {
    #[instrument(skip(self))]
    async fn list_members(&self) -> Result<Vec<Member>> {
        let token = self.issue_token().await?;
        let mut members = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.client_page(&token, offset).await?;
            let fetched = page.clients.len();
            members.extend(page.clients);
            offset += page.pagination_response.page_size.max(fetched);
            debug!(offset, total = page.pagination_response.total_results, "fetched clients");

            if self.single_page
                || fetched == 0
                || offset >= page.pagination_response.total_results
            {
                break;
            }
        }
        info!(count = members.len(), "fetched membership records");
        Ok(members)
    }
}
