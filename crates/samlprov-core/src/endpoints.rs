//! URL construction for the directory API and the admin console.

use url::Url;

use crate::error::ProvisionError;

/// Console path segment for the AWS SAML application type.
pub const DEFAULT_APP_SLUG: &str = "amazon_aws";

#[derive(Debug, Clone)]
pub struct Endpoints {
    base_url: Url,
    admin_url: Url,
    app_slug: String,
}

impl Endpoints {
    pub fn new(base_url: &str, admin_url: &str) -> Result<Self, ProvisionError> {
        Ok(Self {
            base_url: parse_base(base_url)?,
            admin_url: parse_base(admin_url)?,
            app_slug: DEFAULT_APP_SLUG.to_string(),
        })
    }

    pub fn with_app_slug(mut self, slug: impl Into<String>) -> Self {
        self.app_slug = slug.into();
        self
    }

    // ===== Directory API =====

    pub fn authn(&self) -> Result<Url, ProvisionError> {
        with_segments(&self.base_url, &["api", "v1", "authn"])
    }

    pub fn application(&self, app_id: &str) -> Result<Url, ProvisionError> {
        with_segments(&self.base_url, &["api", "v1", "apps", id_segment(app_id)?])
    }

    pub fn saml_metadata(&self, app_id: &str, key_id: &str) -> Result<Url, ProvisionError> {
        let mut url = with_segments(
            &self.base_url,
            &["api", "v1", "apps", id_segment(app_id)?, "sso", "saml", "metadata"],
        )?;
        url.query_pairs_mut().append_pair("kid", key_id);
        Ok(url)
    }

    // ===== Admin console =====

    /// Redirect that trades a session token for browser cookies.
    pub fn session_cookie_redirect(&self, session_token: &str) -> Result<Url, ProvisionError> {
        let redirect = with_segments(&self.base_url, &["user", "notifications"])?;
        let mut url = with_segments(&self.base_url, &["login", "sessionCookieRedirect"])?;
        url.query_pairs_mut()
            .append_pair("checkAccountSetupComplete", "true")
            .append_pair("token", session_token)
            .append_pair("redirectUrl", redirect.as_str());
        Ok(url)
    }

    pub fn user_home(&self) -> Result<Url, ProvisionError> {
        with_segments(&self.base_url, &["app", "UserHome"])
    }

    /// Org landing page whose inline script carries the SSO exchange token.
    pub fn org_landing(&self, org_id: &str) -> Result<Url, ProvisionError> {
        with_segments(&self.base_url, &["home", "saasure", id_segment(org_id)?])
    }

    pub fn admin_sso_request(&self) -> Result<Url, ProvisionError> {
        with_segments(&self.admin_url, &["admin", "sso", "request"])
    }

    pub fn app_settings(&self, app_id: &str) -> Result<Url, ProvisionError> {
        with_segments(
            &self.admin_url,
            &[
                "admin",
                "app",
                id_segment(&self.app_slug)?,
                "instance",
                id_segment(app_id)?,
                "settings",
                "user-mgmt",
            ],
        )
    }
}

fn parse_base(raw: &str) -> Result<Url, ProvisionError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ProvisionError::Config(format!("invalid URL {:?}: {}", raw, e)))?;
    if url.cannot_be_a_base() {
        return Err(ProvisionError::Config(format!("URL {:?} cannot be a base", raw)));
    }
    Ok(url)
}

/// Ids travel as a single path segment; `.` and `..` would be dropped or
/// resolved, so they are refused outright.
fn id_segment(id: &str) -> Result<&str, ProvisionError> {
    match id {
        "" | "." | ".." => Err(ProvisionError::Config(format!(
            "{:?} is not a valid identifier",
            id
        ))),
        _ => Ok(id),
    }
}

/// Append percent-encoded segments beneath the base path.
fn with_segments(base: &Url, segments: &[&str]) -> Result<Url, ProvisionError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ProvisionError::Config(format!("URL {} cannot be a base", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
