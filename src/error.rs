//! Error types for tinytoken

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for tinytoken
///
/// Every failure the broker can hit is one of these kinds. Only
/// [`TinytokenError::RefreshTokenExpired`] is recovered automatically (by
/// falling back to a fresh sign-in); everything else propagates to the caller.
#[derive(Error, Debug)]
pub enum TinytokenError {
    /// Discovery document could not be fetched or lacked the required endpoints
    #[error("Fetching discovery info failed: {0}")]
    DiscoveryFailed(String),

    /// Authorization endpoint is not a usable absolute URL
    #[error("Invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        /// Endpoint as received
        endpoint: String,
        /// Why it was rejected
        reason: String,
    },

    /// Redirect URI cannot be used to bind a loopback listener
    #[error("Invalid redirect URI {uri:?}: {reason}")]
    InvalidRedirectUri {
        /// Redirect URI as configured
        uri: String,
        /// Why it was rejected
        reason: String,
    },

    /// Loopback callback listener could not bind its address
    #[error("Unable to listen on {address}: {source}")]
    ListenerBindFailed {
        /// Address the listener tried to bind
        address: String,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// No callback arrived from the browser in time
    #[error("Timed out waiting for user's action ({timeout_secs}s)")]
    CallbackTimeout {
        /// Timeout that elapsed, in seconds
        timeout_secs: u64,
    },

    /// Callback `state` differs from the one sent in the authorization request
    #[error("CSRF check failed: callback state does not match the authorization request")]
    CsrfStateMismatch,

    /// Provider redirected back with an `error` parameter
    #[error("Authorization denied by provider: {error}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    AuthorizationDenied {
        /// OAuth error code
        error: String,
        /// Optional human readable description
        description: Option<String>,
    },

    /// Callback carried no authorization code
    #[error("Code was not provided in callback")]
    MissingAuthorizationCode,

    /// Sign-in was interrupted by the user
    #[error("Aborted by user")]
    Aborted,

    /// Authorization code could not be redeemed
    #[error("Code to token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// Token endpoint answered with something other than a token set
    #[error("Unexpected response from token endpoint: {0}")]
    UnexpectedTokenResponse(String),

    /// Refresh grant was rejected; a fresh sign-in is required
    #[error("Refresh token expired or was rejected")]
    RefreshTokenExpired,

    /// Token is not a three segment JWT with a JSON payload
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// JWT payload has no `exp` claim
    #[error("Token contains no \"exp\" claim")]
    MissingExpiryClaim,

    /// No cache entry for the client id
    #[error("No cached tokens for client {client_id:?}")]
    CacheMiss {
        /// Client id that was looked up
        client_id: String,
    },

    /// Cache entry exists but cannot be parsed
    #[error("Cache file {} is corrupt: {reason}", .path.display())]
    CacheCorrupt {
        /// Path of the unreadable entry
        path: PathBuf,
        /// Parse failure
        reason: String,
    },

    /// Browser or other user agent could not be started
    #[error("User agent error: {0}")]
    UserAgent(String),

    /// Profile or credentials file problem
    #[error("Profile error: {0}")]
    Profile(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for tinytoken operations
pub type Result<T> = std::result::Result<T, TinytokenError>;

impl TinytokenError {
    /// Whether the session orchestrator recovers from this error on its own
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RefreshTokenExpired)
    }

    /// Create a discovery error
    pub fn discovery(msg: impl Into<String>) -> Self {
        Self::DiscoveryFailed(msg.into())
    }

    /// Create an invalid endpoint error
    pub fn invalid_endpoint(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid redirect URI error
    pub fn invalid_redirect_uri(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRedirectUri {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Create a callback timeout error
    #[must_use]
    pub fn callback_timeout(timeout: Duration) -> Self {
        Self::CallbackTimeout {
            timeout_secs: timeout.as_secs(),
        }
    }

    /// Create a token exchange error
    pub fn token_exchange(msg: impl Into<String>) -> Self {
        Self::TokenExchangeFailed(msg.into())
    }

    /// Create an unexpected token response error
    pub fn unexpected_response(msg: impl Into<String>) -> Self {
        Self::UnexpectedTokenResponse(msg.into())
    }

    /// Create a malformed token error
    pub fn malformed_token(msg: impl Into<String>) -> Self {
        Self::MalformedToken(msg.into())
    }

    /// Create a cache corruption error
    pub fn cache_corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CacheCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a user agent error
    pub fn user_agent(msg: impl Into<String>) -> Self {
        Self::UserAgent(msg.into())
    }

    /// Create a profile error
    pub fn profile(msg: impl Into<String>) -> Self {
        Self::Profile(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_refresh_expiry_is_recoverable() {
        assert!(TinytokenError::RefreshTokenExpired.is_recoverable());
        assert!(!TinytokenError::CsrfStateMismatch.is_recoverable());
        assert!(!TinytokenError::token_exchange("boom").is_recoverable());
        assert!(!TinytokenError::callback_timeout(Duration::from_secs(30)).is_recoverable());
    }

    #[test]
    fn test_messages_are_single_line() {
        let errors = [
            TinytokenError::callback_timeout(Duration::from_secs(30)),
            TinytokenError::AuthorizationDenied {
                error: "access_denied".to_string(),
                description: Some("user said no".to_string()),
            },
            TinytokenError::cache_corrupt("/tmp/x_cache.json", "EOF while parsing"),
        ];
        for error in errors {
            assert!(!error.to_string().contains('\n'), "{error}");
        }
    }

    #[test]
    fn test_timeout_message() {
        let error = TinytokenError::callback_timeout(Duration::from_secs(30));
        assert_eq!(error.to_string(), "Timed out waiting for user's action (30s)");
    }

    #[test]
    fn test_denied_message_without_description() {
        let error = TinytokenError::AuthorizationDenied {
            error: "access_denied".to_string(),
            description: None,
        };
        assert_eq!(
            error.to_string(),
            "Authorization denied by provider: access_denied"
        );
    }
}
