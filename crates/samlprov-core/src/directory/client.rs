use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::endpoints::Endpoints;
use crate::error::ProvisionError;
use crate::governor::{Fetched, Governor, RateLimitQuota, EMBEDDED_RATE_LIMIT_MARKER};
use crate::models::Application;

use super::DirectoryApi;

/// HTTP request timeout in seconds, independent of the retry budget.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Directory API client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct DirectoryClient {
    client: Client,
    endpoints: Endpoints,
    api_key: SecretString,
    governor: Governor,
}

impl DirectoryClient {
    pub fn new(
        endpoints: Endpoints,
        api_key: SecretString,
        governor: Governor,
    ) -> Result<Self, ProvisionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProvisionError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoints,
            api_key,
            governor,
        })
    }

    fn auth_headers(&self, accept: &'static str) -> Result<header::HeaderMap, ProvisionError> {
        let mut headers = header::HeaderMap::new();
        let mut authorization =
            header::HeaderValue::from_str(&format!("SSWS {}", self.api_key.expose_secret()))
                .map_err(|_| ProvisionError::Config("API key is not a valid header value".into()))?;
        authorization.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, authorization);
        headers.insert(header::ACCEPT, header::HeaderValue::from_static(accept));
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        Ok(headers)
    }

    async fn get(
        &self,
        label: &str,
        url: &url::Url,
        accept: &'static str,
    ) -> Result<Fetched, ProvisionError> {
        let headers = self.auth_headers(accept)?;
        self.governor
            .send(label, || {
                self.client.get(url.clone()).headers(headers.clone())
            })
            .await
    }

    /// Fetch an application, `None` when the directory answers 404.
    pub async fn application(&self, app_id: &str) -> Result<Option<Application>, ProvisionError> {
        let url = self.endpoints.application(app_id)?;
        let Some(page) = self.get("get application", &url, "application/json").await?.into_page()
        else {
            return Ok(None);
        };

        let app: Application =
            serde_json::from_str(&page.body).map_err(|e| ProvisionError::InvalidResponse {
                url: page.url.clone(),
                reason: format!("failed to parse application: {}", e),
            })?;
        debug!(app_id = %app.id, features = ?app.features, "Fetched application");
        Ok(Some(app))
    }

    /// Lightweight read used only for its rate limit headers.
    pub async fn quota(&self, app_id: &str) -> Result<Option<RateLimitQuota>, ProvisionError> {
        let url = self.endpoints.application(app_id)?;
        let fetched = self.get("rate limit quota", &url, "application/json").await?;
        Ok(fetched
            .into_page()
            .and_then(|page| RateLimitQuota::from_headers(&page.headers)))
    }

    /// SAML metadata document for the application's signing key.
    ///
    /// The directory sometimes answers a throttled metadata request with a
    /// 2xx body carrying its rate limit error code, so this read watches for it.
    pub async fn saml_metadata(
        &self,
        app_id: &str,
        key_id: &str,
    ) -> Result<Option<String>, ProvisionError> {
        let url = self.endpoints.saml_metadata(app_id, key_id)?;
        let headers = self.auth_headers("application/xml")?;
        let fetched = self
            .governor
            .send_watching("get saml metadata", EMBEDDED_RATE_LIMIT_MARKER, || {
                self.client.get(url.clone()).headers(headers.clone())
            })
            .await?;
        Ok(fetched.into_page().map(|page| page.body))
    }
}

impl DirectoryApi for DirectoryClient {
    fn get_application<'a>(
        &'a self,
        app_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Application>, ProvisionError>> {
        Box::pin(self.application(app_id))
    }

    fn rate_limit_quota<'a>(
        &'a self,
        app_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<RateLimitQuota>, ProvisionError>> {
        Box::pin(self.quota(app_id))
    }
}
