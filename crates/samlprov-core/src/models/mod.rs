//! Data models shared by the directory client and the console workflow.
//!
//! - `Application`: read-only view of a directory application, used to
//!   verify that console settings took effect
//! - `ProvisioningRequest`: the key pair to push (or empty keys to revoke)
//! - `FeatureState`: whether a capability flag is expected present or absent

pub mod application;
pub mod provisioning;

pub use application::{Application, FeatureState, SigningCredentials, PUSH_NEW_USERS};
pub use provisioning::ProvisioningRequest;
