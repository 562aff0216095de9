use anyhow::{Context, Result};
use keyring::Entry;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

const SERVICE_NAME: &str = "samlprov";

/// Keychain account under which the directory API key is kept.
pub const API_KEY_ACCOUNT: &str = "api-key";

/// Admin username and password. `Debug` redacts the password.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    password: SecretString,
}

/// JSON body of the authentication request.
#[derive(Serialize)]
pub(crate) struct AuthnRequest<'a> {
    username: &'a str,
    password: &'a str,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    pub(crate) fn authn_request(&self) -> AuthnRequest<'_> {
        AuthnRequest {
            username: &self.username,
            password: self.password.expose_secret(),
        }
    }
}

pub struct CredentialStore;

impl CredentialStore {
    /// Retrieve a secret for an account from the OS keychain
    pub fn get_password(account: &str) -> Result<SecretString> {
        let entry = Entry::new(SERVICE_NAME, account)
            .context("Failed to create keyring entry")?;
        let password = entry
            .get_password()
            .context("Failed to retrieve password from keychain")?;
        Ok(SecretString::from(password))
    }
}
