use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Capability flag the directory reports once push provisioning is enabled.
pub const PUSH_NEW_USERS: &str = "PUSH_NEW_USERS";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Application {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "signOnMode", default)]
    pub sign_on_mode: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(rename = "lastUpdated", default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub credentials: AppCredentials,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppCredentials {
    #[serde(default)]
    pub signing: SigningCredentials,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SigningCredentials {
    #[serde(rename = "kid", default)]
    pub key_id: Option<String>,
}

impl Application {
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    pub fn feature_state(&self, feature: &str) -> FeatureState {
        if self.has_feature(feature) {
            FeatureState::Present
        } else {
            FeatureState::Absent
        }
    }

    pub fn signing_key_id(&self) -> Option<&str> {
        self.credentials.signing.key_id.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureState {
    Present,
    Absent,
}

impl fmt::Display for FeatureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureState::Present => f.write_str("present"),
            FeatureState::Absent => f.write_str("absent"),
        }
    }
}
