//! Loopback control plane for desktop processes.
//!
//! The privileged runner owns a [`ControlServer`], registers each desktop process it spawns
//! to obtain a bearer token, and hands the server url plus token to that process. Desktop
//! processes call back to report health, menu activity, and to forward messages to the
//! runner's [`Messenger`].

mod auth;
mod listener;
mod registry;

use std::{
    future::IntoFuture,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::{
    net::TcpListener,
    sync::{watch, Mutex},
    time::timeout,
};
use tracing::{debug, error, info, warn};

pub use registry::TokenRegistry;

use self::listener::AbandonableListener;
use crate::{
    error::RunnerError,
    services::{CheckInAccelerator, Messenger},
};

pub const HEALTH_CHECK_ENDPOINT: &str = "/health";
pub const MENU_OPENED_ENDPOINT: &str = "/menuopened";
pub const MESSAGE_ENDPOINT: &str = "/message";
pub const RECHECK_ENDPOINT: &str = "/recheck";

/// Method name forwarded to the messenger when `/recheck` is hit.
pub const RECHECK_METHOD: &str = "recheck";

pub const CONTROL_REQUEST_ACCELERATION_INTERVAL: Duration = Duration::from_secs(5);
pub const CONTROL_REQUEST_ACCELERATION_DURATION: Duration = Duration::from_secs(60);

const MAX_DRAINED_BODY_BYTES: usize = 64 * 1024;

/// How long `shutdown` waits for dropped connections to unwind after the deadline.
const ABANDON_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Serving,
    ShuttingDown,
    Stopped,
}

#[derive(Clone)]
struct RouteState {
    accelerator: Arc<dyn CheckInAccelerator>,
    messenger: Arc<dyn Messenger>,
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    #[serde(default)]
    method: String,
    #[serde(default)]
    params: Value,
}

pub struct ControlServer {
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    registry: Arc<TokenRegistry>,
    router: Router,
    state: watch::Sender<ServerState>,
    abandon: watch::Sender<bool>,
}

impl ControlServer {
    /// Binds a listener on an ephemeral loopback port and builds the route table.
    pub async fn new(
        accelerator: Arc<dyn CheckInAccelerator>,
        messenger: Arc<dyn Messenger>,
    ) -> Result<Self, RunnerError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(RunnerError::Bind)?;
        let local_addr = listener.local_addr().map_err(RunnerError::Bind)?;

        let registry = Arc::new(TokenRegistry::new());
        let (state, _) = watch::channel(ServerState::Created);
        let (abandon, abandon_rx) = watch::channel(false);

        let router = build_router(
            registry.clone(),
            RouteState {
                accelerator,
                messenger,
            },
        )
        .layer(middleware::from_fn_with_state(
            abandon_rx,
            abandon_after_deadline,
        ));

        debug!(addr = %local_addr, "control server bound");

        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            registry,
            router,
            state,
            abandon,
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Returns the bearer token for `key`, issuing one if the key is new.
    pub async fn register_client(&self, key: &str) -> String {
        self.registry.register(key).await
    }

    /// Revokes the token held by `key`; later requests bearing it get 401.
    pub async fn deregister_client(&self, key: &str) {
        self.registry.deregister(key).await
    }

    /// Serves until [`ControlServer::shutdown`] is called.
    ///
    /// Returns `Ok(())` once the server has closed, including when shutdown happened before
    /// serving began.
    pub async fn serve(&self) -> Result<(), RunnerError> {
        let Some(listener) = self.listener.lock().await.take() else {
            return match self.state() {
                ServerState::Created | ServerState::Serving => Err(RunnerError::AlreadyServing),
                ServerState::ShuttingDown | ServerState::Stopped => Ok(()),
            };
        };

        let started = self.state.send_if_modified(|state| {
            if *state != ServerState::Created {
                return false;
            }
            *state = ServerState::Serving;
            true
        });
        if !started {
            return Ok(());
        }

        let _stopped = MarkStopped(&self.state);
        let mut draining = self.state.subscribe();
        let graceful = async move {
            let _ = draining
                .wait_for(|state| *state != ServerState::Serving)
                .await;
        };

        let mut abandon = self.abandon.subscribe();
        let listener = AbandonableListener::new(listener, self.abandon.subscribe());

        info!(addr = %self.local_addr, "control server serving");
        let serving = axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(graceful)
            .into_future();
        let result = tokio::select! {
            result = serving => result.map_err(RunnerError::Serve),
            _ = abandon.wait_for(|abandoned| *abandoned) => {
                warn!("control server stopped waiting for open connections");
                Ok(())
            }
        };
        info!(addr = %self.local_addr, "control server closed");

        result
    }

    /// Stops accepting requests and waits up to `deadline` for in-flight ones to finish.
    ///
    /// Connections still open at the deadline, including ones stalled before sending a full
    /// request, are dropped and [`RunnerError::ShutdownTimedOut`] is returned.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), RunnerError> {
        let mut previous = ServerState::Stopped;
        self.state.send_modify(|state| {
            previous = *state;
            *state = match *state {
                ServerState::Created => ServerState::Stopped,
                ServerState::Serving => ServerState::ShuttingDown,
                other => other,
            };
        });

        if previous == ServerState::Created {
            self.listener.lock().await.take();
            debug!("control server closed before serving");
            return Ok(());
        }

        let mut stopped = self.state.subscribe();
        if timeout(deadline, stopped.wait_for(|state| *state == ServerState::Stopped))
            .await
            .is_ok()
        {
            return Ok(());
        }

        warn!(deadline = ?deadline, "control server drain deadline passed");
        self.abandon.send_replace(true);
        if timeout(
            ABANDON_GRACE,
            stopped.wait_for(|state| *state == ServerState::Stopped),
        )
        .await
        .is_err()
        {
            error!("control server did not stop after abandoning connections");
        }
        Err(RunnerError::ShutdownTimedOut(deadline))
    }
}

/// Moves the server to `Stopped` when `serve` returns or is dropped.
struct MarkStopped<'a>(&'a watch::Sender<ServerState>);

impl Drop for MarkStopped<'_> {
    fn drop(&mut self) {
        self.0.send_replace(ServerState::Stopped);
    }
}

fn build_router(registry: Arc<TokenRegistry>, state: RouteState) -> Router {
    let authed = Router::new()
        .route(HEALTH_CHECK_ENDPOINT, any(health_handler))
        .route(MENU_OPENED_ENDPOINT, any(menu_opened_handler))
        .route(MESSAGE_ENDPOINT, post(message_handler))
        .route_layer(middleware::from_fn_with_state(
            registry,
            auth::require_bearer,
        ));

    // Intentionally unauthenticated: any local process may request a recheck. It can only
    // shorten the check-in interval and cannot read or change privileged state.
    let open = Router::new().route(RECHECK_ENDPOINT, get(recheck_handler));

    authed.merge(open).with_state(state)
}

/// Cancels the handler at the shutdown deadline. The response is never delivered: the
/// connection's writes fail from then on and hyper drops it.
async fn abandon_after_deadline(
    State(mut abandon): State<watch::Receiver<bool>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    tokio::select! {
        response = next.run(request) => response,
        _ = abandon.wait_for(|abandoned| *abandoned) => {
            warn!(path = %path, "abandoning in-flight request at shutdown deadline");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn drain(body: Body) {
    let _ = axum::body::to_bytes(body, MAX_DRAINED_BODY_BYTES).await;
}

async fn health_handler(body: Body) -> StatusCode {
    drain(body).await;
    StatusCode::OK
}

async fn menu_opened_handler(State(state): State<RouteState>, body: Body) -> StatusCode {
    drain(body).await;

    state.accelerator.set_check_in_interval_override(
        CONTROL_REQUEST_ACCELERATION_INTERVAL,
        CONTROL_REQUEST_ACCELERATION_DURATION,
    );
    state.accelerator.set_forwarding_interval_override(
        CONTROL_REQUEST_ACCELERATION_INTERVAL,
        CONTROL_REQUEST_ACCELERATION_DURATION,
    );

    StatusCode::OK
}

async fn message_handler(State(state): State<RouteState>, body: Bytes) -> StatusCode {
    if body.is_empty() {
        debug!("no request body");
        return StatusCode::BAD_REQUEST;
    }

    let message = match serde_json::from_slice::<MessageRequest>(&body) {
        Ok(message) => message,
        Err(error) => {
            debug!(%error, "could not decode request body");
            return StatusCode::BAD_REQUEST;
        }
    };

    if message.method.is_empty() {
        debug!("does not include method property");
        return StatusCode::BAD_REQUEST;
    }

    if let Err(error) = state
        .messenger
        .send_message(&message.method, message.params)
    {
        error!(method = %message.method, %error, "error sending message");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }

    StatusCode::OK
}

/// Unlike `/message`, messenger failures here are logged and never surfaced: a recheck is a
/// best-effort hint with no result for the caller.
async fn recheck_handler(State(state): State<RouteState>, body: Body) -> StatusCode {
    drain(body).await;

    state.accelerator.set_check_in_interval_override(
        CONTROL_REQUEST_ACCELERATION_INTERVAL,
        CONTROL_REQUEST_ACCELERATION_DURATION,
    );

    if let Err(error) = state.messenger.send_message(RECHECK_METHOD, Value::Null) {
        warn!(%error, "error sending recheck message");
    }

    StatusCode::OK
}
