//! Session orchestration: cache reuse, refresh and sign-in
//!
//! ```text
//! START ──skip cache / miss──▶ SIGN_IN ─────────────┐
//!   │                                                ▼
//!   └──hit──▶ CACHE_HIT ──▶ evaluate expiry ──valid──▶ DONE
//!                                 │
//!                              expired
//!                                 ▼
//!                              EXPIRED ──refresh ok──▶ DONE
//!                                 │
//!                         refresh token expired
//!                                 ▼
//!                         SIGN_IN (final) ──────────▶ DONE
//! ```
//!
//! A cache entry that cannot be parsed, or whose access token has no readable
//! `exp`, counts as a miss. Any other error ends the run without touching the
//! cache.

use crate::auth::{
    AuthorizationResponse, CallbackListener, CodeExchange, EndpointPair, TokenClient, TokenSet,
    discover, jwt, pkce,
};
use crate::cache::TokenCache;
use crate::error::{Result, TinytokenError};
use crate::user_agent::UserAgent;
use std::time::Duration;
use tokio::sync::mpsc;
use typed_builder::TypedBuilder;
use url::Url;

/// Default redirect URI for the loopback listener
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:9999/";

/// Default time to wait for the browser callback
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for discovery and token endpoint requests
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for one credential acquisition
#[derive(Debug, Clone, TypedBuilder)]
#[builder(
    builder_method(doc = "Create a new builder for SessionOptions"),
    builder_type(doc = "Builder for SessionOptions", vis = "pub"),
    build_method(doc = "Build the SessionOptions")
)]
pub struct SessionOptions {
    /// OAuth client id
    #[builder(setter(into))]
    pub client_id: String,

    /// URL of the provider's discovery document
    #[builder(setter(into))]
    pub discovery_url: String,

    /// Redirect URI registered with the provider; a port of 0 binds an ephemeral port
    #[builder(default = DEFAULT_REDIRECT_URI.to_string(), setter(into))]
    pub redirect_uri: String,

    /// Do not read the cache (fresh tokens are still written if a refresh was needed)
    #[builder(default)]
    pub skip_cache: bool,

    /// How long to wait for the browser callback
    #[builder(default = DEFAULT_CALLBACK_TIMEOUT)]
    pub callback_timeout: Duration,

    /// Compare the callback state with the request state (CSRF protection)
    #[builder(default = true)]
    pub verify_state: bool,
}

/// Where the returned tokens came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// Reused unchanged from the cache
    Cache,
    /// Obtained with the refresh grant
    Refreshed,
    /// Obtained through an interactive sign-in
    SignedIn,
}

/// Result of [`Session::acquire`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    /// Tokens ready for use
    pub tokens: TokenSet,
    /// How they were obtained
    pub source: TokenSource,
    /// Whether the cache entry was written during this run
    pub persisted: bool,
}

/// Drives discovery, sign-in, refresh and caching for one client id
pub struct Session {
    options: SessionOptions,
    cache: TokenCache,
    user_agent: Box<dyn UserAgent>,
    http: reqwest::Client,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("options", &self.options)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session with a default HTTP client
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the HTTP client cannot be constructed.
    pub fn new(
        options: SessionOptions,
        cache: TokenCache,
        user_agent: impl UserAgent + 'static,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TinytokenError::invalid_config(format!("HTTP client: {e}")))?;

        Ok(Self {
            options,
            cache,
            user_agent: Box::new(user_agent),
            http,
        })
    }

    /// Replace the HTTP client used for discovery and token requests
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Session options
    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Obtain valid tokens, reusing, refreshing or signing in as needed
    ///
    /// Ctrl+C at any point of the run ends it with `Aborted`.
    ///
    /// # Errors
    ///
    /// Any failure other than a rejected refresh token ends the run; the
    /// cache is only written after a fully successful acquisition.
    pub async fn acquire(&self) -> Result<Acquisition> {
        interruptible(self.run(), ctrl_c()).await
    }

    async fn run(&self) -> Result<Acquisition> {
        let client_id = self.options.client_id.as_str();
        let mut endpoints: Option<EndpointPair> = None;

        // START and CACHE_HIT
        let cached = if self.options.skip_cache {
            tracing::info!("Skipping cache");
            None
        } else {
            self.cached()?
        };

        let (tokens, source, expired) = match cached {
            // VALID
            Some((tokens, false)) => (tokens, TokenSource::Cache, false),
            // EXPIRED
            Some((tokens, true)) => {
                tracing::info!("Access token expired, attempting to refresh");
                let (tokens, source) = self.renew(&mut endpoints, &tokens).await?;
                (tokens, source, true)
            }
            // SIGN_IN
            None => {
                let tokens = self.sign_in(&mut endpoints).await?;
                if jwt::is_expired(&tokens.access_token)? {
                    tracing::info!("Issued access token is already expired, attempting to refresh");
                    let (tokens, source) = self.renew(&mut endpoints, &tokens).await?;
                    (tokens, source, true)
                } else {
                    (tokens, TokenSource::SignedIn, false)
                }
            }
        };

        let persisted = if self.options.skip_cache {
            expired
        } else {
            source != TokenSource::Cache
        };

        if persisted {
            tracing::info!("Caching tokens");
            self.cache.store(client_id, &tokens)?;
        }

        Ok(Acquisition {
            tokens,
            source,
            persisted,
        })
    }

    /// Cached tokens and whether their access token has expired
    ///
    /// Entries that cannot be parsed, or whose access token carries no
    /// readable expiry, count as a miss.
    fn cached(&self) -> Result<Option<(TokenSet, bool)>> {
        let client_id = self.options.client_id.as_str();
        if !self.cache.exists(client_id) {
            tracing::info!("Token is not cached");
            return Ok(None);
        }

        let tokens = match self.cache.retrieve(client_id) {
            Ok(tokens) => tokens,
            Err(e @ TinytokenError::CacheCorrupt { .. }) => {
                tracing::warn!("Ignoring unreadable cache entry: {e}");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match jwt::is_expired(&tokens.access_token) {
            Ok(expired) => {
                tracing::info!("Retrieving tokens from cache");
                Ok(Some((tokens, expired)))
            }
            Err(e @ (TinytokenError::MalformedToken(_) | TinytokenError::MissingExpiryClaim)) => {
                tracing::warn!("Ignoring cache entry with unusable access token: {e}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Refresh expired tokens, falling back to one final sign-in
    async fn renew(
        &self,
        endpoints: &mut Option<EndpointPair>,
        tokens: &TokenSet,
    ) -> Result<(TokenSet, TokenSource)> {
        match self.refresh(endpoints, tokens).await {
            Ok(refreshed) => Ok((refreshed, TokenSource::Refreshed)),
            Err(TinytokenError::RefreshTokenExpired) => {
                tracing::info!("Refresh token expired, attempting to authenticate");
                let tokens = self.sign_in(endpoints).await?;
                jwt::expiry(&tokens.access_token)?;
                Ok((tokens, TokenSource::SignedIn))
            }
            Err(e) => Err(e),
        }
    }

    async fn endpoints<'a>(&self, resolved: &'a mut Option<EndpointPair>) -> Result<&'a EndpointPair> {
        if resolved.is_none() {
            *resolved = Some(discover(&self.http, &self.options.discovery_url).await?);
        }
        resolved
            .as_ref()
            .ok_or_else(|| TinytokenError::discovery("endpoints unavailable"))
    }

    async fn refresh(
        &self,
        endpoints: &mut Option<EndpointPair>,
        tokens: &TokenSet,
    ) -> Result<TokenSet> {
        let Some(refresh_token) = tokens.refresh_token.as_deref() else {
            tracing::debug!("No refresh token available");
            return Err(TinytokenError::RefreshTokenExpired);
        };

        let token_endpoint = self.endpoints(endpoints).await?.token_endpoint.clone();
        let refreshed = TokenClient::new(self.http.clone())
            .refresh(&token_endpoint, &self.options.client_id, refresh_token)
            .await?;

        // Never cache an access token whose expiry cannot be read back
        if let Err(e) = jwt::expiry(&refreshed.access_token) {
            tracing::warn!("Refreshed access token is unusable: {e}");
            return Err(TinytokenError::RefreshTokenExpired);
        }
        Ok(refreshed)
    }

    /// Full interactive sign-in: listener, browser, callback, code exchange
    async fn sign_in(&self, endpoints: &mut Option<EndpointPair>) -> Result<TokenSet> {
        let endpoints = self.endpoints(endpoints).await?.clone();

        let (handoff, mut callback) = mpsc::channel(1);
        let mut listener = CallbackListener::bind(&self.options.redirect_uri, handoff).await?;

        // Providers compare redirect URIs byte for byte; only rewrite an ephemeral port
        let configured_port = Url::parse(&self.options.redirect_uri)
            .ok()
            .and_then(|uri| uri.port());
        let redirect_uri = if configured_port == Some(0) {
            listener.redirect_uri().to_string()
        } else {
            self.options.redirect_uri.clone()
        };

        let outcome = self
            .authorize(&endpoints, &redirect_uri, &mut callback)
            .await;
        listener.stop().await;
        let (response, request) = outcome?;

        if self.options.verify_state {
            if response.state != request.state {
                return Err(TinytokenError::CsrfStateMismatch);
            }
        } else {
            tracing::warn!("CSRF state verification is disabled");
        }

        if let Some(error) = response.error {
            return Err(TinytokenError::AuthorizationDenied {
                error,
                description: response.error_description,
            });
        }

        if response.code.is_empty() {
            return Err(TinytokenError::MissingAuthorizationCode);
        }

        TokenClient::new(self.http.clone())
            .exchange(&CodeExchange {
                token_endpoint: &endpoints.token_endpoint,
                client_id: &self.options.client_id,
                code: &response.code,
                code_verifier: &request.code_verifier,
                redirect_uri: &redirect_uri,
            })
            .await
    }

    /// Build the authorization request, launch the user agent and wait for the callback
    async fn authorize(
        &self,
        endpoints: &EndpointPair,
        redirect_uri: &str,
        callback: &mut mpsc::Receiver<AuthorizationResponse>,
    ) -> Result<(AuthorizationResponse, pkce::AuthorizationRequest)> {
        let request = pkce::authorization_request(
            &self.options.client_id,
            redirect_uri,
            &endpoints.authorization_endpoint,
        )?;

        self.user_agent.open(request.url.as_str()).await?;

        let response = wait_for_callback(callback, self.options.callback_timeout).await?;
        Ok((response, request))
    }
}

/// Wait for the listener's handoff, bounded by `timeout`
async fn wait_for_callback(
    callback: &mut mpsc::Receiver<AuthorizationResponse>,
    timeout: Duration,
) -> Result<AuthorizationResponse> {
    tokio::select! {
        received = callback.recv() => {
            received.ok_or(TinytokenError::Aborted)
        }
        () = tokio::time::sleep(timeout) => Err(TinytokenError::callback_timeout(timeout)),
    }
}

/// Resolves on Ctrl+C; never resolves where signals are unavailable
async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Run `work` until it finishes or `interrupt` resolves
///
/// Dropping `work` early tears down whatever it owns (listener included).
async fn interruptible<T>(
    work: impl Future<Output = Result<T>>,
    interrupt: impl Future<Output = ()>,
) -> Result<T> {
    tokio::select! {
        result = work => result,
        () = interrupt => {
            tracing::info!("Interrupted");
            Err(TinytokenError::Aborted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let options = SessionOptions::builder()
            .client_id("client")
            .discovery_url("https://idp.example.com/.well-known/openid-configuration")
            .build();

        assert_eq!(options.redirect_uri, DEFAULT_REDIRECT_URI);
        assert_eq!(options.callback_timeout, DEFAULT_CALLBACK_TIMEOUT);
        assert!(!options.skip_cache);
        assert!(options.verify_state);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let (_tx, mut rx) = mpsc::channel::<AuthorizationResponse>(1);
        let result = wait_for_callback(&mut rx, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(TinytokenError::CallbackTimeout { .. })));
    }

    #[tokio::test]
    async fn test_wait_returns_handoff() {
        let (tx, mut rx) = mpsc::channel(1);
        tx.send(AuthorizationResponse {
            code: "c".to_string(),
            state: "s".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        let response = wait_for_callback(&mut rx, Duration::from_secs(5)).await.unwrap();
        assert_eq!(response.code, "c");
    }

    #[tokio::test]
    async fn test_interrupt_aborts_pending_work() {
        let work = std::future::pending::<Result<()>>();
        let result = interruptible(work, async {}).await;
        assert!(matches!(result, Err(TinytokenError::Aborted)));
    }

    #[tokio::test]
    async fn test_interrupt_stops_slow_exchange() {
        // A token request that outlives the interrupt is abandoned, not awaited
        let slow_exchange = async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(TokenSet::new("a", "i", None))
        };
        let started = std::time::Instant::now();
        let result = interruptible(slow_exchange, tokio::time::sleep(Duration::from_millis(50))).await;

        assert!(matches!(result, Err(TinytokenError::Aborted)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_finished_work_wins_over_pending_interrupt() {
        let result = interruptible(async { Ok(7) }, std::future::pending()).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_closed_handoff_aborts() {
        let (tx, mut rx) = mpsc::channel::<AuthorizationResponse>(1);
        drop(tx);
        let result = wait_for_callback(&mut rx, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(TinytokenError::Aborted)));
    }
}
