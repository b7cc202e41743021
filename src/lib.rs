//! # tinytoken
//!
//! Local OpenID Connect credential broker. Signs in through the browser with
//! the authorization code flow and PKCE, caches the resulting tokens on disk
//! and refreshes or re-authenticates transparently when they expire.
//!
//! ## Quick Start
//!
//! ```no_run
//! use tinytoken::{CommandUserAgent, Session, SessionOptions, TokenCache};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = SessionOptions::builder()
//!         .client_id("0oa1b2c3d4")
//!         .discovery_url("https://idp.example.com/.well-known/openid-configuration")
//!         .build();
//!
//!     let session = Session::new(
//!         options,
//!         TokenCache::open_default()?,
//!         CommandUserAgent::system_default()?,
//!     )?;
//!
//!     let acquired = session.acquire().await?;
//!     println!("id token: {}", acquired.tokens.id_token);
//!     Ok(())
//! }
//! ```
//!
//! ## How tokens are obtained
//!
//! 1. Cached tokens for the client id are reused while the access token's
//!    `exp` claim is more than five minutes away
//! 2. Expired tokens are refreshed with the refresh grant
//! 3. If there is nothing cached, or the refresh token was rejected, the
//!    browser is opened on the provider's sign-in page and the redirect is
//!    captured on a single-use loopback listener
//!
//! New tokens are written back to `~/.tinytoken/<client id>_cache.json`
//! (mode 0600). Concurrent runs for the same client id are not coordinated;
//! the last writer wins.
//!
//! ## Architecture
//!
//! - [`auth`]: discovery, PKCE, callback listener, token endpoint, JWT expiry
//! - [`cache`]: on-disk token cache
//! - [`session`]: orchestration of cache, refresh and sign-in
//! - [`user_agent`]: launching the browser
//! - [`profile`]: named profiles and exported credentials
//! - [`output`]: printing or exporting the final tokens
//! - [`error`]: error types and handling
//!
//! ## Logging
//!
//! This crate uses [`tracing`](https://crates.io/crates/tracing) for structured logging.
//! Tokens, codes and verifiers are never logged. To see logs, attach a
//! tracing subscriber in your application:
//!
//! ```rust,ignore
//! tracing_subscriber::fmt::init();
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, TinytokenError>`](Result). Only
//! [`TinytokenError::RefreshTokenExpired`] is handled internally (by signing
//! in again); everything else reaches the caller:
//!
//! ```no_run
//! # use tinytoken::{Session, TinytokenError};
//! # async fn example(session: Session) {
//! match session.acquire().await {
//!     Ok(acquired) => { /* ... */ }
//!     Err(TinytokenError::CallbackTimeout { timeout_secs }) => {
//!         eprintln!("No sign-in within {timeout_secs}s");
//!     }
//!     Err(e) => {
//!         eprintln!("Error: {e}");
//!     }
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod cache;
pub mod error;
pub mod output;
pub mod profile;
pub mod session;
pub mod user_agent;

// Re-export commonly used types
pub use auth::TokenSet;
pub use cache::TokenCache;
pub use error::{Result, TinytokenError};
pub use output::OutputFormat;
pub use profile::{Profile, ProfileStore};
pub use session::{Acquisition, Session, SessionOptions, TokenSource};
pub use user_agent::{CommandUserAgent, UserAgent};

/// Version of tinytoken
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
