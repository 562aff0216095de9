//! Provider configuration.
//!
//! Non-secret settings (URLs, org id, admin username, retry maximum) are read
//! from `~/.config/samlprov/config.json` and can be overridden from the
//! environment. Secrets come from the environment or the OS keychain and are
//! never written to the config file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::credentials::API_KEY_ACCOUNT;
use crate::auth::{CredentialStore, Credentials};
use crate::endpoints::Endpoints;
use crate::governor::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};

/// Application name used for config directory paths
const APP_NAME: &str = "samlprov";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_BASE_URL: &str = "OKTA_URL";
pub const ENV_ADMIN_URL: &str = "OKTA_ADMIN_URL";
pub const ENV_ORG_ID: &str = "OKTA_ORGID";
pub const ENV_USERNAME: &str = "OKTA_USERNAME";
pub const ENV_RETRY_MAXIMUM: &str = "OKTA_RETRY_MAXIMUM";
pub const ENV_APP_SLUG: &str = "OKTA_APP_SLUG";
pub const ENV_API_KEY: &str = "OKTA_API_KEY";
pub const ENV_PASSWORD: &str = "OKTA_PASSWORD";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    pub base_url: Option<String>,
    pub admin_url: Option<String>,
    pub org_id: Option<String>,
    pub username: Option<String>,
    pub retry_maximum: Option<u32>,
    pub app_slug: Option<String>,
}

impl Config {
    /// Load the config file, or defaults when it does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`; empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_BASE_URL) {
            self.base_url = Some(v);
        }
        if let Some(v) = get(ENV_ADMIN_URL) {
            self.admin_url = Some(v);
        }
        if let Some(v) = get(ENV_ORG_ID) {
            self.org_id = Some(v);
        }
        if let Some(v) = get(ENV_USERNAME) {
            self.username = Some(v);
        }
        if let Some(v) = get(ENV_APP_SLUG) {
            self.app_slug = Some(v);
        }
        if let Some(v) = get(ENV_RETRY_MAXIMUM) {
            let parsed = v
                .trim()
                .parse()
                .with_context(|| format!("{} must be a positive integer, got {:?}", ENV_RETRY_MAXIMUM, v))?;
            self.retry_maximum = Some(parsed);
        }
        Ok(())
    }

    /// Validate the config and combine it with secrets.
    pub fn resolve(&self, secrets: Secrets) -> Result<ProviderSettings> {
        let base_url = required(&self.base_url, "base_url", ENV_BASE_URL)?;
        let admin_url = required(&self.admin_url, "admin_url", ENV_ADMIN_URL)?;
        let org_id = required(&self.org_id, "org_id", ENV_ORG_ID)?;
        let username = required(&self.username, "username", ENV_USERNAME)?;

        let api_key = secrets
            .api_key
            .ok_or_else(|| anyhow::anyhow!("Missing API key (set {})", ENV_API_KEY))?;
        let password = secrets
            .password
            .ok_or_else(|| anyhow::anyhow!("Missing admin password (set {})", ENV_PASSWORD))?;

        let mut endpoints = Endpoints::new(base_url, admin_url)?;
        if let Some(ref slug) = self.app_slug {
            endpoints = endpoints.with_app_slug(slug.clone());
        }

        let retry_maximum = self.retry_maximum.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if retry_maximum == 0 {
            anyhow::bail!("retry_maximum must be at least 1");
        }

        Ok(ProviderSettings {
            endpoints,
            org_id: org_id.to_string(),
            credentials: Credentials::new(username, password),
            api_key,
            retry_maximum,
        })
    }
}

fn required<'a>(value: &'a Option<String>, field: &str, env: &str) -> Result<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Missing {} (set {} or add it to the config file)", field, env))
}

/// Secrets gathered outside the config file.
#[derive(Debug, Default)]
pub struct Secrets {
    pub api_key: Option<SecretString>,
    pub password: Option<SecretString>,
}

impl Secrets {
    /// Environment first, then the OS keychain.
    pub fn gather(username: Option<&str>) -> Self {
        Self::gather_with(
            |key| std::env::var(key).ok(),
            |account| CredentialStore::get_password(account).ok(),
            username,
        )
    }

    pub fn gather_with<E, K>(env: E, keychain: K, username: Option<&str>) -> Self
    where
        E: Fn(&str) -> Option<String>,
        K: Fn(&str) -> Option<SecretString>,
    {
        let from_env = |key: &str| env(key).filter(|v| !v.is_empty()).map(SecretString::from);

        let api_key = from_env(ENV_API_KEY).or_else(|| keychain(API_KEY_ACCOUNT));
        let password = from_env(ENV_PASSWORD).or_else(|| username.and_then(|u| keychain(u)));

        Self { api_key, password }
    }
}

/// Everything a provisioning run needs, validated.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub endpoints: Endpoints,
    pub org_id: String,
    pub credentials: Credentials,
    pub api_key: SecretString,
    pub retry_maximum: u32,
}

impl ProviderSettings {
    pub fn request_policy(&self) -> RetryPolicy {
        RetryPolicy::request(self.retry_maximum)
    }

    pub fn workflow_policy(&self) -> RetryPolicy {
        RetryPolicy::workflow(self.retry_maximum)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn full_secrets() -> Secrets {
        Secrets {
            api_key: Some(SecretString::from("00key")),
            password: Some(SecretString::from("pw")),
        }
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config {
            base_url: Some("https://old.okta.com".into()),
            retry_maximum: Some(3),
            ..Config::default()
        };
        let vars = env(&[
            (ENV_BASE_URL, "https://acme.okta.com"),
            (ENV_ADMIN_URL, "https://acme-admin.okta.com"),
            (ENV_ORG_ID, "00o1"),
            (ENV_USERNAME, "admin@acme.test"),
            (ENV_RETRY_MAXIMUM, "7"),
            (ENV_APP_SLUG, ""),
        ]);
        config.apply_overrides(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(config.base_url.as_deref(), Some("https://acme.okta.com"));
        assert_eq!(config.org_id.as_deref(), Some("00o1"));
        assert_eq!(config.retry_maximum, Some(7));
        assert_eq!(config.app_slug, None);
    }

    #[test]
    fn test_invalid_retry_maximum() {
        let mut config = Config::default();
        let vars = env(&[(ENV_RETRY_MAXIMUM, "lots")]);
        assert!(config.apply_overrides(|k| vars.get(k).cloned()).is_err());
    }

    #[test]
    fn test_resolve_reports_missing_field() {
        let config = Config {
            base_url: Some("https://acme.okta.com".into()),
            ..Config::default()
        };
        let err = config.resolve(full_secrets()).unwrap_err();
        assert!(err.to_string().contains("admin_url"));
    }

    #[test]
    fn test_resolve_defaults_retry_maximum() {
        let config = Config {
            base_url: Some("https://acme.okta.com".into()),
            admin_url: Some("https://acme-admin.okta.com".into()),
            org_id: Some("00o1".into()),
            username: Some("admin@acme.test".into()),
            ..Config::default()
        };
        let settings = config.resolve(full_secrets()).unwrap();
        assert_eq!(settings.retry_maximum, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(settings.request_policy().max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(settings.credentials.username, "admin@acme.test");
        assert_eq!(settings.api_key.expose_secret(), "00key");

        let err = config.resolve(Secrets::default()).unwrap_err();
        assert!(err.to_string().contains(ENV_API_KEY));
    }

    #[test]
    fn test_secrets_prefer_env_then_keychain() {
        let vars = env(&[(ENV_API_KEY, "env-key")]);
        let secrets = Secrets::gather_with(
            |k| vars.get(k).cloned(),
            |account| match account {
                "admin@acme.test" => Some(SecretString::from("kc-pw")),
                API_KEY_ACCOUNT => Some(SecretString::from("kc-key")),
                _ => None,
            },
            Some("admin@acme.test"),
        );
        assert_eq!(secrets.api_key.unwrap().expose_secret(), "env-key");
        assert_eq!(secrets.password.unwrap().expose_secret(), "kc-pw");
    }

    #[test]
    fn test_keychain_read_once_per_account() {
        let lookups = std::cell::RefCell::new(Vec::new());
        let secrets = Secrets::gather_with(
            |_| None,
            |account| {
                lookups.borrow_mut().push(account.to_string());
                None
            },
            Some("admin@acme.test"),
        );
        assert!(secrets.api_key.is_none());
        assert!(secrets.password.is_none());
        assert_eq!(
            lookups.into_inner(),
            vec![API_KEY_ACCOUNT.to_string(), "admin@acme.test".to_string()]
        );
    }

    #[test]
    fn test_load_from_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("samlprov-test-missing").join(CONFIG_FILE);
        assert_eq!(Config::load_from(&path).unwrap(), Config::default());
    }
}
