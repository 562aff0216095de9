//! Push-provisioning automation for SAML application integrations.
//!
//! The directory's REST API cannot switch on credential push provisioning
//! for an application, so this crate drives the admin console the way a
//! browser would and confirms the result through the REST API. The whole
//! multi-step sequence runs under a retry and rate-limit [`Governor`].
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use samlprov_core::{Config, Provisioner, Secrets};
//! use tokio_util::sync::CancellationToken;
//!
//! let mut config = Config::load()?;
//! config.apply_env()?;
//! let settings = config.resolve(Secrets::gather(config.username.as_deref()))?;
//!
//! let provisioner = Provisioner::new(&settings, CancellationToken::new())?;
//! provisioner.set("0oa1", "AKIA...", "wJal...").await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod console;
pub mod directory;
pub mod endpoints;
pub mod error;
pub mod governor;
pub mod models;
pub mod provisioning;

pub use auth::{CredentialStore, Credentials};
pub use config::{Config, ProviderSettings, Secrets};
pub use directory::{DirectoryApi, DirectoryClient};
pub use endpoints::Endpoints;
pub use error::{Disposition, ProvisionError, TokenKind};
pub use governor::{Fetched, Governor, Page, RateLimitQuota, RetryPolicy};
pub use models::{Application, FeatureState, ProvisioningRequest, PUSH_NEW_USERS};
pub use provisioning::Provisioner;
