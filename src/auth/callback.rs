//! Single-use loopback listener for the authorization redirect
//!
//! The listener serves on the host and port of the configured redirect URI,
//! answers the first `GET` (any path) with a static confirmation page,
//! hands the captured `code`/`state` to the caller through a channel and then
//! shuts down. A second redirect can never be processed by the same listener.

use crate::error::{Result, TinytokenError};
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::{Host, Url};

/// Body returned to the browser once the callback is captured
pub const CALLBACK_RESPONSE: &str =
    "Callback processed successfully. Page can be closed. Check terminal for results.";

/// How long [`CallbackListener::stop`] lets open connections drain
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Query parameters captured from the redirect
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct AuthorizationResponse {
    /// Authorization code (empty if absent)
    pub code: String,
    /// State echoed by the provider (empty if absent)
    pub state: String,
    /// OAuth `error` parameter, if the provider refused the request
    pub error: Option<String>,
    /// OAuth `error_description` parameter
    pub error_description: Option<String>,
}

/// Lifecycle of a [`CallbackListener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Accepting connections
    Listening,
    /// Closed; the port has been or is being released
    Stopped,
}

/// Loopback HTTP listener capturing exactly one authorization response
#[derive(Debug)]
pub struct CallbackListener {
    local_addr: SocketAddr,
    redirect_uri: Url,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CallbackListener {
    /// Bind the address named by `redirect_uri` and start serving
    ///
    /// A port of `0` binds an ephemeral port; [`Self::redirect_uri`] then
    /// reports the URI with the port actually bound. The captured response is
    /// sent on `handoff`, which should have a capacity of one.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRedirectUri` if the URI has no host or port, and
    /// `ListenerBindFailed` if the address cannot be bound.
    pub async fn bind(
        redirect_uri: &str,
        handoff: mpsc::Sender<AuthorizationResponse>,
    ) -> Result<Self> {
        let mut redirect = Url::parse(redirect_uri)
            .map_err(|e| TinytokenError::invalid_redirect_uri(redirect_uri, e.to_string()))?;
        let (host, port) = bind_target(&redirect)
            .map_err(|reason| TinytokenError::invalid_redirect_uri(redirect_uri, reason))?;

        let listener = TcpListener::bind((host.as_str(), port))
            .await
            .map_err(|source| TinytokenError::ListenerBindFailed {
                address: format!("{host}:{port}"),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        if port == 0 {
            redirect.set_port(Some(local_addr.port())).map_err(|()| {
                TinytokenError::invalid_redirect_uri(redirect_uri, "cannot carry a port")
            })?;
        }

        tracing::info!("Starting callback listener ({local_addr})");

        let shutdown = CancellationToken::new();
        let app = router(handoff, shutdown.clone());
        let task = tokio::spawn(serve(listener, app, shutdown.clone()));

        Ok(Self {
            local_addr,
            redirect_uri: redirect,
            shutdown,
            task: Some(task),
        })
    }

    /// Address actually bound
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Redirect URI to advertise, with an ephemeral port filled in
    #[must_use]
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ListenerState {
        let finished = self.task.as_ref().is_none_or(JoinHandle::is_finished);
        if self.shutdown.is_cancelled() || finished {
            ListenerState::Stopped
        } else {
            ListenerState::Listening
        }
    }

    /// Stop accepting connections and wait until the port is released
    ///
    /// Connections still open after a short grace period are dropped.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("Callback listener task ended abnormally: {e}"),
                Err(_) => {
                    tracing::debug!("Callback connections did not drain, aborting listener");
                    task.abort();
                    task.await.ok();
                }
            }
        }
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Host and port to bind for a redirect URI
fn bind_target(redirect: &Url) -> std::result::Result<(String, u16), String> {
    let host = match redirect.host() {
        Some(Host::Domain(domain)) => domain.to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        None => return Err("missing host".to_string()),
    };
    let port = redirect
        .port_or_known_default()
        .ok_or_else(|| format!("no port and no default port for scheme {:?}", redirect.scheme()))?;
    Ok((host, port))
}

/// Shared by every request; the sender is taken by the first capture
#[derive(Clone)]
struct Handoff {
    sender: Arc<Mutex<Option<mpsc::Sender<AuthorizationResponse>>>>,
    shutdown: CancellationToken,
}

fn router(sender: mpsc::Sender<AuthorizationResponse>, shutdown: CancellationToken) -> Router {
    let handoff = Handoff {
        sender: Arc::new(Mutex::new(Some(sender))),
        shutdown,
    };

    // HEAD would otherwise fall through to the GET handler
    let callback = get(capture).head(|| async { StatusCode::METHOD_NOT_ALLOWED });

    Router::new()
        .route("/", callback.clone())
        .route("/{*path}", callback)
        .with_state(handoff)
}

async fn capture(
    State(handoff): State<Handoff>,
    Query(response): Query<AuthorizationResponse>,
) -> (StatusCode, &'static str) {
    let Some(sender) = handoff.sender.lock().await.take() else {
        return (StatusCode::GONE, "Callback already processed");
    };

    // In-flight responses still complete after cancellation
    handoff.shutdown.cancel();

    // Capacity is one and only one item is ever produced
    if sender.try_send(response).is_err() {
        tracing::warn!("Callback receiver is gone; dropping authorization response");
    }

    (StatusCode::OK, CALLBACK_RESPONSE)
}

async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) {
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;
    if let Err(e) = result {
        tracing::warn!("Callback listener failed: {e}");
    }

    shutdown.cancel();
    tracing::debug!("Callback listener stopped");
}
