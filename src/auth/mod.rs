//! OpenID Connect authorization code flow with PKCE
//!
//! # Overview
//!
//! The pieces of one sign-in, leaves first:
//!
//! 1. [`discover`] resolves the provider's authorization and token endpoints
//! 2. [`pkce::authorization_request`] generates a verifier, challenge and
//!    state and builds the URL the browser has to visit
//! 3. [`CallbackListener`] captures the redirect on the loopback interface
//! 4. [`TokenClient::exchange`] redeems the code together with the verifier
//! 5. [`TokenClient::refresh`] later trades the refresh token for new tokens
//! 6. [`jwt::is_expired`] decides whether cached tokens are still usable
//!
//! [`Session`](crate::Session) strings these together with the token cache.
//!
//! # Security
//!
//! - PKCE prevents authorization code interception attacks
//! - The callback `state` must match the request `state` (CSRF)
//! - The callback listener serves a single request and then stops
//! - JWT claims are read without signature verification and only used for
//!   local cache decisions

mod callback;
mod discovery;
mod exchange;
pub mod jwt;
pub mod pkce;
mod token;

pub use callback::{AuthorizationResponse, CALLBACK_RESPONSE, CallbackListener, ListenerState};
pub use discovery::{EndpointPair, discover};
pub use exchange::{CodeExchange, TokenClient};
pub use pkce::{AuthorizationRequest, PkceSession};
pub use token::TokenSet;
