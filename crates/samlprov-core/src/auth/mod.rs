//! Admin credentials for the console workflow.
//!
//! This module provides:
//! - `Credentials`: username plus password held as a secret
//! - `CredentialStore`: read access to secrets kept in the OS keychain
//!
//! Credentials live only as long as one provisioning run needs them and are
//! never written to disk by this crate.

pub mod credentials;

pub use credentials::{CredentialStore, Credentials};
