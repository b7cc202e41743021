//! PKCE and authorization request construction

use crate::error::{Result, TinytokenError};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};
use url::Url;

/// Scope requested in every authorization request
pub const DEFAULT_SCOPE: &str = "openid";

/// Bytes of randomness behind the verifier and the state (256 bits each)
const RANDOM_BYTES: usize = 32;

/// PKCE verifier/challenge pair plus the anti-CSRF state of one sign-in attempt
///
/// Held in memory only and consumed by the code exchange.
#[derive(Clone)]
pub struct PkceSession {
    /// Code verifier (random string, sent only with the code exchange)
    pub code_verifier: String,
    /// Code challenge (SHA-256 hash of verifier, base64url encoded)
    pub code_challenge: String,
    /// State round-tripped through the browser redirect
    pub state: String,
}

impl PkceSession {
    /// Generate a fresh verifier, challenge and state from the OS-seeded RNG
    #[must_use]
    pub fn generate() -> Self {
        let code_verifier = random_urlsafe(RANDOM_BYTES);
        let code_challenge = code_challenge(&code_verifier);
        let state = random_urlsafe(RANDOM_BYTES);

        Self {
            code_verifier,
            code_challenge,
            state,
        }
    }
}

impl std::fmt::Debug for PkceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceSession")
            .field("code_verifier", &"<redacted>")
            .field("code_challenge", &self.code_challenge)
            .field("state", &self.state)
            .finish()
    }
}

/// Derive the S256 challenge: `BASE64URL-NOPAD(SHA256(verifier))`
#[must_use]
pub fn code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0_u8; len];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Authorization request ready to hand to a browser
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// URL the user agent must visit
    pub url: Url,
    /// Verifier to present at the token endpoint
    pub code_verifier: String,
    /// State expected back on the callback
    pub state: String,
}

/// Build the authorization URL for a fresh PKCE session
///
/// The URL is not fetched here; it is meant for an external user agent.
///
/// # Errors
///
/// Returns `InvalidEndpoint` if `authorization_endpoint` is not an absolute
/// URL that can carry a query string.
pub fn authorization_request(
    client_id: &str,
    redirect_uri: &str,
    authorization_endpoint: &str,
) -> Result<AuthorizationRequest> {
    let mut url = Url::parse(authorization_endpoint)
        .map_err(|e| TinytokenError::invalid_endpoint(authorization_endpoint, e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(TinytokenError::invalid_endpoint(
            authorization_endpoint,
            "not a hierarchical URL",
        ));
    }

    let pkce = PkceSession::generate();
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", DEFAULT_SCOPE)
        .append_pair("response_type", "code")
        .append_pair("state", &pkce.state)
        .append_pair("code_challenge_method", "S256")
        .append_pair("code_challenge", &pkce.code_challenge);

    tracing::debug!(
        endpoint = %authorization_endpoint,
        client_id,
        redirect_uri,
        "Built authorization request"
    );

    Ok(AuthorizationRequest {
        url,
        code_verifier: pkce.code_verifier,
        state: pkce.state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn is_urlsafe(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn test_pkce_session_generation() {
        let pkce = PkceSession::generate();
        // 32 bytes base64url encoded
        assert_eq!(pkce.code_verifier.len(), 43);
        assert_eq!(pkce.code_challenge.len(), 43);
        assert!(pkce.state.len() >= 43);
        assert!(is_urlsafe(&pkce.code_verifier));
        assert!(is_urlsafe(&pkce.code_challenge));
        assert!(is_urlsafe(&pkce.state));
    }

    #[test]
    fn test_sessions_are_independent() {
        let a = PkceSession::generate();
        let b = PkceSession::generate();
        assert_ne!(a.code_verifier, b.code_verifier);
        assert_ne!(a.state, b.state);
        assert_ne!(a.code_verifier, a.state);
    }

    #[test]
    fn test_code_challenge_rfc7636_vector() {
        // RFC 7636 Appendix B
        assert_eq!(
            code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_challenge_matches_verifier() {
        let pkce = PkceSession::generate();
        assert_eq!(pkce.code_challenge, code_challenge(&pkce.code_verifier));
    }

    #[test]
    fn test_authorization_url_parameters() {
        let request = authorization_request(
            "my-client",
            "http://localhost:9999/",
            "https://idp.example.com/oauth2/authorize",
        )
        .unwrap();

        assert_eq!(request.url.host_str(), Some("idp.example.com"));
        assert_eq!(request.url.path(), "/oauth2/authorize");

        let params: HashMap<_, _> = request.url.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "my-client");
        assert_eq!(params["redirect_uri"], "http://localhost:9999/");
        assert_eq!(params["scope"], "openid");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["state"], request.state);
        assert_eq!(
            params["code_challenge"],
            code_challenge(&request.code_verifier)
        );
        assert!(!params.contains_key("code_verifier"));
    }

    #[test]
    fn test_existing_query_is_preserved() {
        let request = authorization_request(
            "c",
            "http://127.0.0.1:1/",
            "https://idp.example.com/authorize?tenant=acme",
        )
        .unwrap();
        let params: HashMap<_, _> = request.url.query_pairs().into_owned().collect();
        assert_eq!(params["tenant"], "acme");
        assert_eq!(params["client_id"], "c");
    }

    #[test]
    fn test_relative_endpoint_is_rejected() {
        let result = authorization_request("c", "http://localhost/", "/authorize");
        assert!(matches!(result, Err(TinytokenError::InvalidEndpoint { .. })));
    }

    #[test]
    fn test_opaque_endpoint_is_rejected() {
        let result = authorization_request("c", "http://localhost/", "mailto:idp@example.com");
        assert!(matches!(result, Err(TinytokenError::InvalidEndpoint { .. })));
    }

    #[test]
    fn test_debug_redacts_verifier() {
        let pkce = PkceSession::generate();
        assert!(!format!("{pkce:?}").contains(&pkce.code_verifier));
    }
}
