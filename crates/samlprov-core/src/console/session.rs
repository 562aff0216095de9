//! Browser-equivalent session against the admin console.
//!
//! A [`ConsoleSession`] owns its own cookie jar and is created fresh for each
//! workflow attempt; dropping it discards every cookie the console handed out.
//! No step here retries. Failures surface as [`ProvisionError`]s and the
//! orchestrator restarts the whole sequence from authentication.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info};

use crate::auth::Credentials;
use crate::directory::client::REQUEST_TIMEOUT_SECS;
use crate::endpoints::Endpoints;
use crate::error::ProvisionError;

use super::extract::SsoToken;

/// Maximum redirects followed while trading tokens for cookies.
const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Deserialize)]
struct AuthnResponse {
    #[serde(rename = "sessionToken")]
    session_token: Option<String>,
    status: Option<String>,
    #[serde(rename = "expiresAt")]
    expires_at: Option<DateTime<Utc>>,
}

/// Short-lived token returned by the authentication endpoint.
#[derive(Debug)]
pub struct SessionToken {
    token: SecretString,
    expires_at: Option<DateTime<Utc>>,
}

impl SessionToken {
    fn expose(&self) -> &str {
        self.token.expose_secret()
    }
}

pub struct ConsoleSession {
    client: Client,
    endpoints: Endpoints,
}

impl ConsoleSession {
    /// Create a session with an empty cookie jar.
    pub fn open(endpoints: &Endpoints) -> Result<Self, ProvisionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| ProvisionError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoints: endpoints.clone(),
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// Check if response is successful, returning an error with body if not.
    pub(crate) async fn check_response(response: Response) -> Result<Response, ProvisionError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let url = response.url().to_string();
            let body = response.text().await.unwrap_or_default();
            Err(ProvisionError::from_status(status, &url, &body))
        }
    }

    /// Trade username and password for a session token.
    pub async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<SessionToken, ProvisionError> {
        let url = self.endpoints.authn()?;

        let response = self
            .client
            .post(url.clone())
            .header(header::ACCEPT, "application/json")
            .json(&credentials.authn_request())
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProvisionError::RateLimited {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ProvisionError::AuthenticationFailure(format!(
                "{} answered {}",
                url, status
            )));
        }

        let body = response.text().await?;
        let authn: AuthnResponse = serde_json::from_str(&body).map_err(|e| {
            ProvisionError::AuthenticationFailure(format!("unparsable authn response: {}", e))
        })?;

        let token = authn
            .session_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ProvisionError::AuthenticationFailure(format!(
                    "no session token issued (status {})",
                    authn.status.as_deref().unwrap_or("unknown")
                ))
            })?;

        let token = SessionToken {
            token: SecretString::from(token),
            expires_at: authn.expires_at,
        };
        info!(expires_at = ?token.expires_at, "Authenticated against directory");

        Ok(token)
    }

    /// Redeem the session token for console cookies, then load the user home
    /// page so the console finishes setting up the browser session.
    pub async fn establish_browser_session(
        &self,
        token: &SessionToken,
    ) -> Result<(), ProvisionError> {
        let redirect = self.endpoints.session_cookie_redirect(token.expose())?;
        let response = self
            .client
            .get(redirect)
            .header(header::ACCEPT, "text/html,application/json")
            .send()
            .await?;
        Self::check_response(response).await?;
        debug!("Session cookie redirect completed");

        let response = self
            .client
            .get(self.endpoints.user_home()?)
            .header(header::ACCEPT, "text/html,application/json")
            .send()
            .await?;
        Self::check_response(response).await?;
        debug!("User home loaded");

        Ok(())
    }

    /// Org landing page; its inline script carries the SSO exchange token.
    pub async fn fetch_org_sso_context(&self, org_id: &str) -> Result<String, ProvisionError> {
        let response = self
            .client
            .get(self.endpoints.org_landing(org_id)?)
            .header(header::ACCEPT, "text/html")
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        Ok(response.text().await?)
    }

    /// Post the SSO token to the admin domain. The answer is the admin
    /// dashboard, which carries the xsrf token.
    pub async fn exchange_admin_sso(&self, sso: &SsoToken) -> Result<String, ProvisionError> {
        let response = self
            .client
            .post(self.endpoints.admin_sso_request()?)
            .header(header::ACCEPT, "text/html")
            .form(&[("token", sso.as_str())])
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        debug!("Admin session established");
        Ok(response.text().await?)
    }
}
