//! Shared fixtures for samlprov-core integration tests.
//!
//! A single `MockServer` plays both the directory API and the admin console.

#![allow(dead_code)]

use samlprov_core::{Credentials, Endpoints, ProviderSettings, RetryPolicy};
use secrecy::SecretString;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ORG_ID: &str = "00o1";
pub const APP_ID: &str = "0oa1";
pub const USERNAME: &str = "admin@acme.test";
pub const PASSWORD: &str = "correct horse";
pub const API_KEY: &str = "00test-key";
pub const SESSION_TOKEN: &str = "st-1";
pub const SESSION_COOKIE: &str = "sid=s1";

pub fn settings(server: &MockServer, retry_maximum: u32) -> ProviderSettings {
    ProviderSettings {
        endpoints: Endpoints::new(&server.uri(), &server.uri()).unwrap(),
        org_id: ORG_ID.to_string(),
        credentials: Credentials::new(USERNAME, SecretString::from(PASSWORD)),
        api_key: SecretString::from(API_KEY),
        retry_maximum,
    }
}

pub fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::for_testing(max_attempts)
}

/// Application resource as the directory returns it.
pub fn application(id: &str, features: &[&str]) -> Value {
    json!({
        "id": id,
        "name": "amazon_aws",
        "label": "AWS Production",
        "status": "ACTIVE",
        "signOnMode": "SAML_2_0",
        "features": features,
        "credentials": { "signing": { "kid": "kid-1" } }
    })
}

pub fn landing_page(sso_token: &str) -> String {
    format!(
        r#"<!DOCTYPE html><html><head>
<script type="text/javascript" src="/assets/app.js"></script>
<script type="text/javascript">
    var repostParams = {{ "token": ["{}"], "fromURI": ["/app/UserHome"] }};
</script></head><body><div id="landing"></div></body></html>"#,
        sso_token
    )
}

pub fn dashboard_page(xsrf: &str) -> String {
    format!(
        r#"<html><body><div class="dashboard">
<span id="_xsrfToken" style="display:none">{}</span>
<h1>Dashboard</h1></div></body></html>"#,
        xsrf
    )
}

/// Directory application endpoint with healthy rate limit headers.
pub async fn mount_application(server: &MockServer, features: &[&str]) {
    mount_application_with_quota(server, features, 600, 599).await;
}

pub async fn mount_application_with_quota(
    server: &MockServer,
    features: &[&str],
    limit: u32,
    remaining: u32,
) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/apps/{}", APP_ID)))
        .and(header("authorization", format!("SSWS {}", API_KEY).as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Rate-Limit-Limit", limit.to_string().as_str())
                .insert_header("X-Rate-Limit-Remaining", remaining.to_string().as_str())
                .set_body_json(application(APP_ID, features)),
        )
        .mount(server)
        .await;
}

/// Successful authentication response body.
pub fn authn_success() -> Value {
    json!({
        "expiresAt": "2026-10-17T10:15:57.000Z",
        "status": "SUCCESS",
        "sessionToken": SESSION_TOKEN
    })
}

pub async fn mount_authn(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/authn"))
        .and(body_json(json!({ "username": USERNAME, "password": PASSWORD })))
        .respond_with(ResponseTemplate::new(200).set_body_json(authn_success()))
        .mount(server)
        .await;
}

/// Cookie redirect and user home; user home only answers with the cookie.
pub async fn mount_browser_session(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/login/sessionCookieRedirect"))
        .and(query_param("token", SESSION_TOKEN))
        .and(query_param("checkAccountSetupComplete", "true"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("set-cookie", format!("{}; Path=/", SESSION_COOKIE).as_str()),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/app/UserHome"))
        .and(header("cookie", SESSION_COOKIE))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>home</html>"))
        .mount(server)
        .await;
}

pub async fn mount_landing(server: &MockServer, sso_token: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/home/saasure/{}", ORG_ID)))
        .and(header("cookie", SESSION_COOKIE))
        .respond_with(ResponseTemplate::new(200).set_body_string(landing_page(sso_token)))
        .mount(server)
        .await;
}

pub async fn mount_admin_exchange(server: &MockServer, sso_token: &str, xsrf: &str) {
    Mock::given(method("POST"))
        .and(path("/admin/sso/request"))
        .and(body_string(format!("token={}", sso_token)))
        .respond_with(ResponseTemplate::new(200).set_body_string(dashboard_page(xsrf)))
        .mount(server)
        .await;
}

/// Everything up to (not including) the settings post.
pub async fn mount_console(server: &MockServer, sso_token: &str, xsrf: &str) {
    mount_authn(server).await;
    mount_browser_session(server).await;
    mount_landing(server, sso_token).await;
    mount_admin_exchange(server, sso_token, xsrf).await;
}

pub fn settings_path() -> String {
    format!("/admin/app/amazon_aws/instance/{}/settings/user-mgmt", APP_ID)
}
