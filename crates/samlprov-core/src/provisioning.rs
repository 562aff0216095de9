//! Provisioning orchestrator.
//!
//! Sequences one run: throttle check, fresh console session, authenticate,
//! establish browser session, fetch SSO context, admin exchange (xsrf),
//! submit settings, verify through the directory. Any failure drops the
//! session and the workflow governor decides whether to start over from
//! authentication. Nothing from a failed attempt is reused.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::auth::Credentials;
use crate::config::ProviderSettings;
use crate::console::{ConsoleSession, MarkupTokenLocator, TokenLocator};
use crate::directory::{DirectoryApi, DirectoryClient};
use crate::endpoints::Endpoints;
use crate::error::{ProvisionError, TokenKind};
use crate::governor::{Governor, RetryPolicy};
use crate::models::{Application, FeatureState, ProvisioningRequest, PUSH_NEW_USERS};

pub struct Provisioner {
    directory: Arc<dyn DirectoryApi>,
    locator: Arc<dyn TokenLocator>,
    endpoints: Endpoints,
    credentials: Credentials,
    org_id: String,
    request_governor: Governor,
    workflow_governor: Governor,
}

impl Provisioner {
    /// Build a provisioner talking to the real directory.
    pub fn new(settings: &ProviderSettings, cancel: CancellationToken) -> Result<Self, ProvisionError> {
        Self::with_policies(
            settings,
            settings.request_policy(),
            settings.workflow_policy(),
            cancel,
        )
    }

    pub fn with_policies(
        settings: &ProviderSettings,
        request_policy: RetryPolicy,
        workflow_policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Result<Self, ProvisionError> {
        let request_governor = Governor::with_cancellation(request_policy, cancel.clone());
        let directory = DirectoryClient::new(
            settings.endpoints.clone(),
            settings.api_key.clone(),
            request_governor.clone(),
        )?;

        Ok(Self {
            directory: Arc::new(directory),
            locator: Arc::new(MarkupTokenLocator),
            endpoints: settings.endpoints.clone(),
            credentials: settings.credentials.clone(),
            org_id: settings.org_id.clone(),
            request_governor,
            workflow_governor: Governor::with_cancellation(workflow_policy, cancel),
        })
    }

    /// Substitute the directory client.
    pub fn with_directory(mut self, directory: Arc<dyn DirectoryApi>) -> Self {
        self.directory = directory;
        self
    }

    /// Substitute the token extraction strategy.
    pub fn with_locator(mut self, locator: Arc<dyn TokenLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        self.workflow_governor.cancellation_token()
    }

    /// Enable push provisioning with the given key pair.
    pub async fn set(
        &self,
        app_id: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Application, ProvisionError> {
        self.apply(&ProvisioningRequest::set(app_id, access_key, secret_key))
            .await
    }

    /// Disable push provisioning and clear the stored keys.
    pub async fn revoke(&self, app_id: &str) -> Result<Application, ProvisionError> {
        self.apply(&ProvisioningRequest::revoke(app_id)).await
    }

    /// Current state of the provisioning capability flag.
    pub async fn status(&self, app_id: &str) -> Result<FeatureState, ProvisionError> {
        let app = self.require_application(app_id).await?;
        Ok(app.feature_state(PUSH_NEW_USERS))
    }

    /// Run the workflow until the directory reports the expected state.
    pub async fn apply(&self, request: &ProvisioningRequest) -> Result<Application, ProvisionError> {
        self.workflow_governor.checkpoint()?;
        let app = self.require_application(&request.app_id).await?;
        info!(
            app_id = %app.id,
            label = %app.label,
            enable = request.enabled(),
            "Starting provisioning workflow"
        );

        let app = self
            .workflow_governor
            .retry("provisioning workflow", |attempt| self.attempt(request, attempt))
            .await?;

        info!(
            app_id = %app.id,
            state = %app.feature_state(PUSH_NEW_USERS),
            "Provisioning workflow verified"
        );
        Ok(app)
    }

    /// Run [`apply`](Self::apply) on its own task.
    pub fn spawn(
        self: Arc<Self>,
        request: ProvisioningRequest,
    ) -> JoinHandle<Result<Application, ProvisionError>> {
        tokio::spawn(async move { self.apply(&request).await })
    }

    async fn require_application(&self, app_id: &str) -> Result<Application, ProvisionError> {
        self.directory
            .get_application(app_id)
            .await?
            .ok_or_else(|| ProvisionError::NotFound(format!("application {}", app_id)))
    }

    async fn attempt(
        &self,
        request: &ProvisioningRequest,
        attempt: u32,
    ) -> Result<Application, ProvisionError> {
        debug!(app_id = %request.app_id, attempt = attempt, "Workflow attempt");
        let governor = &self.workflow_governor;

        self.request_governor
            .throttle(self.directory.as_ref(), &request.app_id)
            .await?;
        governor.checkpoint()?;

        let session = ConsoleSession::open(&self.endpoints)?;
        let token = session.authenticate(&self.credentials).await?;
        governor.checkpoint()?;

        session.establish_browser_session(&token).await?;
        governor.checkpoint()?;

        let landing = session.fetch_org_sso_context(&self.org_id).await?;
        let sso = match self.locator.sso_token(&landing) {
            Some(sso) => sso,
            None => {
                return Err(ProvisionError::ExtractionFailure {
                    token: TokenKind::Sso,
                    url: self.endpoints.org_landing(&self.org_id)?.to_string(),
                })
            }
        };
        governor.checkpoint()?;

        let dashboard = session.exchange_admin_sso(&sso).await?;
        let xsrf = match self.locator.xsrf_token(&dashboard) {
            Some(xsrf) => xsrf,
            None => {
                return Err(ProvisionError::ExtractionFailure {
                    token: TokenKind::Xsrf,
                    url: self.endpoints.admin_sso_request()?.to_string(),
                })
            }
        };
        governor.checkpoint()?;

        session.submit_provisioning(&xsrf, request).await?;
        drop(session);

        self.verify(request).await
    }

    async fn verify(&self, request: &ProvisioningRequest) -> Result<Application, ProvisionError> {
        let app = self.require_application(&request.app_id).await?;
        let expected = request.expected_state();
        let observed = app.feature_state(PUSH_NEW_USERS);

        if observed == expected {
            Ok(app)
        } else {
            debug!(
                app_id = %request.app_id,
                expected = %expected,
                observed = %observed,
                "Capability flag not yet in expected state"
            );
            Err(ProvisionError::VerificationPending {
                app_id: request.app_id.clone(),
                feature: PUSH_NEW_USERS.to_string(),
                expected,
            })
        }
    }
}
