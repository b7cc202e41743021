//! OpenID Connect discovery

use crate::error::{Result, TinytokenError};
use serde::Deserialize;

/// Endpoints resolved from a provider's discovery document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPair {
    /// Where the browser is sent to sign in
    pub authorization_endpoint: String,
    /// Where codes and refresh tokens are redeemed
    pub token_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    #[serde(default)]
    authorization_endpoint: Option<String>,
    #[serde(default)]
    token_endpoint: Option<String>,
}

/// Fetch `url` and extract the authorization and token endpoints
///
/// No retries: any failure is reported immediately.
///
/// # Errors
///
/// Returns `DiscoveryFailed` on network errors, non-2xx responses, bodies
/// that are not JSON, or documents missing either endpoint.
pub async fn discover(http: &reqwest::Client, url: &str) -> Result<EndpointPair> {
    tracing::debug!(%url, "Fetching discovery document");

    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| TinytokenError::discovery(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TinytokenError::discovery(format!(
            "{url} returned {status}"
        )));
    }

    let body = response
        .text()
        .await
        .map_err(|e| TinytokenError::discovery(e.to_string()))?;

    let document: DiscoveryDocument = serde_json::from_str(&body)
        .map_err(|e| TinytokenError::discovery(format!("invalid discovery document: {e}")))?;

    let authorization_endpoint = document
        .authorization_endpoint
        .ok_or_else(|| TinytokenError::discovery("document has no authorization_endpoint"))?;
    let token_endpoint = document
        .token_endpoint
        .ok_or_else(|| TinytokenError::discovery("document has no token_endpoint"))?;

    tracing::debug!(%authorization_endpoint, %token_endpoint, "Resolved provider endpoints");

    Ok(EndpointPair {
        authorization_endpoint,
        token_endpoint,
    })
}
