//! Authorization code and refresh token grants

use super::token::TokenSet;
use crate::error::{Result, TinytokenError};
use serde::Deserialize;

/// Successful response from the token endpoint
///
/// Every field is optional here so that a missing token is reported as
/// `UnexpectedTokenResponse` instead of a generic parse error.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl TokenResponse {
    fn parse(body: &str) -> Result<Self> {
        serde_json::from_str(body)
            .map_err(|e| TinytokenError::unexpected_response(format!("body is not JSON: {e}")))
    }

    fn into_token_set(self) -> Result<TokenSet> {
        let access_token = self
            .access_token
            .ok_or_else(|| TinytokenError::unexpected_response("missing access_token"))?;
        let id_token = self
            .id_token
            .ok_or_else(|| TinytokenError::unexpected_response("missing id_token"))?;

        Ok(TokenSet::new(access_token, id_token, self.refresh_token))
    }
}

/// Error response from token endpoint
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

fn describe_failure(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(error) => match error.error_description {
            Some(description) => format!("{status}: {} ({description})", error.error),
            None => format!("{status}: {}", error.error),
        },
        Err(_) => status.to_string(),
    }
}

/// Parameters of an authorization code redemption
#[derive(Debug, Clone, Copy)]
pub struct CodeExchange<'a> {
    /// Token endpoint URL
    pub token_endpoint: &'a str,
    /// OAuth client id
    pub client_id: &'a str,
    /// Code received on the callback
    pub code: &'a str,
    /// PKCE verifier matching the challenge sent with the authorization request
    pub code_verifier: &'a str,
    /// Redirect URI used in the authorization request
    pub redirect_uri: &'a str,
}

/// Client for the provider's token endpoint
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
}

impl TokenClient {
    /// Create a token client on top of an existing HTTP client
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Redeem an authorization code for tokens
    ///
    /// # Errors
    ///
    /// Returns `TokenExchangeFailed` on network errors or non-2xx responses,
    /// and `UnexpectedTokenResponse` if the body lacks `access_token` or
    /// `id_token`.
    pub async fn exchange(&self, request: &CodeExchange<'_>) -> Result<TokenSet> {
        let form = [
            ("client_id", request.client_id),
            ("grant_type", "authorization_code"),
            ("code", request.code),
            ("redirect_uri", request.redirect_uri),
            ("code_verifier", request.code_verifier),
        ];

        tracing::debug!(
            endpoint = %request.token_endpoint,
            client_id = %request.client_id,
            "Exchanging authorization code"
        );

        let response = self
            .http
            .post(request.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| TinytokenError::token_exchange(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TinytokenError::token_exchange(e.to_string()))?;

        if !status.is_success() {
            return Err(TinytokenError::token_exchange(describe_failure(status, &body)));
        }

        TokenResponse::parse(&body)?.into_token_set()
    }

    /// Redeem a refresh token for a new access/ID token pair
    ///
    /// The previous refresh token is kept unless the provider rotates it.
    ///
    /// # Errors
    ///
    /// Any transport failure or non-2xx status is reported as
    /// `RefreshTokenExpired`; a 2xx body without the required tokens is
    /// `UnexpectedTokenResponse`.
    pub async fn refresh(
        &self,
        token_endpoint: &str,
        client_id: &str,
        refresh_token: &str,
    ) -> Result<TokenSet> {
        let form = [
            ("client_id", client_id),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        tracing::debug!(endpoint = %token_endpoint, client_id, "Refreshing tokens");

        let response = match self.http.post(token_endpoint).form(&form).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("Refresh request failed: {e}");
                return Err(TinytokenError::RefreshTokenExpired);
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!("Reading refresh response failed: {e}");
                return Err(TinytokenError::RefreshTokenExpired);
            }
        };

        if !status.is_success() {
            tracing::debug!("Refresh rejected: {}", describe_failure(status, &body));
            return Err(TinytokenError::RefreshTokenExpired);
        }

        let tokens = TokenResponse::parse(&body)?.into_token_set()?;
        Ok(tokens.or_refresh_token(Some(refresh_token.to_string())))
    }
}
