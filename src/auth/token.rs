//! Token set returned by the provider

use serde::{Deserialize, Serialize};

/// Tokens obtained from the authorization code or refresh grant
///
/// `access_token` and `id_token` always travel together. `refresh_token` is
/// only present when the provider issued one and is omitted from serialized
/// output otherwise.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Access token for resource servers
    pub access_token: String,

    /// OpenID Connect identity token
    pub id_token: String,

    /// Refresh token for obtaining new access tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenSet {
    /// Create a new token set
    pub fn new(
        access_token: impl Into<String>,
        id_token: impl Into<String>,
        refresh_token: Option<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            id_token: id_token.into(),
            refresh_token,
        }
    }

    /// Keep `previous` as the refresh token unless this set carries its own
    #[must_use]
    pub fn or_refresh_token(mut self, previous: Option<String>) -> Self {
        if self.refresh_token.is_none() {
            self.refresh_token = previous;
        }
        self
    }
}

// Tokens are bearer credentials; keep them out of logs and panic messages.
impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("id_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}
