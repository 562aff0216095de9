//! Read-only client for the directory's JSON REST API.
//!
//! The console workflow only needs the directory to confirm that settings
//! took effect and to read the rate limit quota before a run. Requests are
//! authorized with the org API key (`SSWS` scheme) and go through the
//! request-level [`Governor`](crate::governor::Governor).

pub mod client;

use futures::future::BoxFuture;

use crate::error::ProvisionError;
use crate::governor::RateLimitQuota;
use crate::models::Application;

pub use client::DirectoryClient;

/// Directory operations the provisioning workflow depends on.
pub trait DirectoryApi: Send + Sync {
    /// `Ok(None)` when the application does not exist.
    fn get_application<'a>(
        &'a self,
        app_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Application>, ProvisionError>>;

    /// `Ok(None)` when the directory did not report a usable quota.
    fn rate_limit_quota<'a>(
        &'a self,
        app_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<RateLimitQuota>, ProvisionError>>;
}
