//! WebSocket-backed hub connection.
//!
//! `start` negotiates (unless skipped), opens the socket and completes the
//! protocol handshake, then hands the socket to one background supervisor
//! task. The supervisor pumps frames, sends keep-alive pings, detects server
//! silence, and on an unexpected drop walks the reconnect delay schedule.
//! Handlers live in a dispatch table owned by the connection, so they survive
//! every reconnect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::protocol::{self, HubMessage};
use super::{
    EventHandler, HandlerTable, HubChannel, HubError, HubState, LifecycleEvent, LifecycleHandler,
    LifecycleListeners, render_error,
};
use crate::auth::Credential;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Delays before each automatic reconnect attempt; after the last one the
/// connection closes for good.
pub const DEFAULT_RECONNECT_DELAYS: [Duration; 4] = [
    Duration::from_secs(0),
    Duration::from_secs(2),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

const MAX_NEGOTIATE_REDIRECTS: usize = 2;
const LOST_INVOCATION: &str =
    "Invocation canceled due to the underlying connection being closed.";

/// Tuning knobs for a [`HubConnection`].
#[derive(Debug, Clone)]
pub struct HubOptions {
    pub reconnect_delays: Vec<Duration>,
    /// Interval between client pings.
    pub keep_alive_interval: Duration,
    /// Drop the connection after this long without any inbound frame.
    pub server_timeout: Duration,
    pub invocation_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Connect the WebSocket directly without the negotiate round-trip.
    pub skip_negotiation: bool,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            reconnect_delays: DEFAULT_RECONNECT_DELAYS.to_vec(),
            keep_alive_interval: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
            invocation_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(15),
            skip_negotiation: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NegotiateResponse {
    connection_id: Option<String>,
    connection_token: Option<String>,
    url: Option<String>,
    access_token: Option<String>,
    error: Option<String>,
    #[serde(default)]
    available_transports: Vec<TransportInfo>,
}

#[derive(Debug, Deserialize)]
struct TransportInfo {
    transport: String,
}

/// Where and how to open the socket.
struct Endpoint {
    url: Url,
    token: Option<String>,
    connection_id: Option<String>,
    connection_token: Option<String>,
}

/// A socket that completed the handshake.
struct Link {
    ws: WsStream,
    /// Frames that arrived in the same message as the handshake reply.
    leftover: Vec<String>,
    connection_id: Option<String>,
}

/// Why the pump stopped.
enum Ending {
    Stopped,
    Lost(Option<String>),
    ServerClose {
        error: Option<String>,
        allow_reconnect: bool,
    },
}

/// Hub channel over a WebSocket with automatic reconnect.
pub struct HubConnection {
    inner: Arc<Inner>,
}

struct Inner {
    url: Url,
    url_text: String,
    token: Credential,
    http: reqwest::Client,
    options: HubOptions,
    state: RwLock<HubState>,
    connection_id: RwLock<Option<String>>,
    handlers: HandlerTable,
    lifecycle: LifecycleListeners,
    pending: DashMap<String, oneshot::Sender<Result<Value, HubError>>>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    cancel: Mutex<CancellationToken>,
    /// Serializes start/stop.
    transition: tokio::sync::Mutex<()>,
    next_invocation: AtomicU64,
}

impl HubConnection {
    /// Build an unstarted connection to `url` (an `http(s)` or `ws(s)` hub URL).
    pub fn new(url: Url, token: Credential, http: reqwest::Client, options: HubOptions) -> Self {
        let url_text = url.to_string();
        Self {
            inner: Arc::new(Inner {
                url,
                url_text,
                token,
                http,
                options,
                state: RwLock::new(HubState::Disconnected),
                connection_id: RwLock::new(None),
                handlers: HandlerTable::new(),
                lifecycle: LifecycleListeners::default(),
                pending: DashMap::new(),
                outgoing: Mutex::new(None),
                cancel: Mutex::new(CancellationToken::new()),
                transition: tokio::sync::Mutex::new(()),
                next_invocation: AtomicU64::new(0),
            }),
        }
    }
}

#[async_trait]
impl HubChannel for HubConnection {
    fn url(&self) -> &str {
        &self.inner.url_text
    }

    fn state(&self) -> HubState {
        *read(&self.inner.state)
    }

    fn connection_id(&self) -> Option<String> {
        read(&self.inner.connection_id).clone()
    }

    async fn start(&self) -> Result<(), HubError> {
        let _transition = self.inner.transition.lock().await;
        {
            let mut state = write(&self.inner.state);
            let current = *state;
            match current {
                HubState::Disconnected => *state = HubState::Connecting,
                HubState::Connected => return Ok(()),
                other => return Err(HubError::InvalidState(other)),
            }
        }

        let cancel = CancellationToken::new();
        *lock(&self.inner.cancel) = cancel.clone();
        info!(url = %self.inner.url, "starting hub connection");

        let connected = tokio::select! {
            _ = cancel.cancelled() => Err(HubError::Closed("connection stopped while starting".into())),
            result = self.inner.connect() => result,
        };
        let link = match connected {
            Ok(link) => link,
            Err(e) => {
                *write(&self.inner.state) = HubState::Disconnected;
                warn!(url = %self.inner.url, error = %e, "hub connection failed");
                return Err(e);
            }
        };
        let Some(outbound) = self.inner.activate(link.connection_id.clone(), &cancel) else {
            return Err(HubError::Closed("connection stopped while starting".into()));
        };
        info!(
            url = %self.inner.url,
            connection_id = link.connection_id.as_deref().unwrap_or("-"),
            "hub connection established"
        );
        tokio::spawn(supervise(Arc::clone(&self.inner), link, outbound, cancel));
        Ok(())
    }

    async fn stop(&self) {
        // Interrupt a start still holding the transition lock.
        lock(&self.inner.cancel).cancel();
        let _transition = self.inner.transition.lock().await;
        lock(&self.inner.cancel).cancel();
        let was = {
            let mut state = write(&self.inner.state);
            std::mem::replace(&mut *state, HubState::Disconnected)
        };
        self.inner.detach();
        self.inner.fail_pending("connection stopped");
        if was != HubState::Disconnected {
            info!(url = %self.inner.url, "hub connection stopped");
            self.inner.lifecycle.emit(&LifecycleEvent::Closed { error: None });
        }
    }

    async fn invoke(&self, target: &str, args: Vec<Value>) -> Result<Value, HubError> {
        if self.state() != HubState::Connected {
            return Err(HubError::NotConnected);
        }
        let id = self
            .inner
            .next_invocation
            .fetch_add(1, Ordering::Relaxed)
            .to_string();
        let frame = protocol::invocation_frame(Some(&id), target, &args)?;
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id.clone(), tx);

        let queued = lock(&self.inner.outgoing)
            .as_ref()
            .is_some_and(|outgoing| outgoing.send(frame).is_ok());
        if !queued {
            self.inner.pending.remove(&id);
            return Err(HubError::NotConnected);
        }
        debug!(method = target, invocation_id = %id, "hub invocation sent");

        match tokio::time::timeout(self.inner.options.invocation_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HubError::Closed(LOST_INVOCATION.into())),
            Err(_) => {
                self.inner.pending.remove(&id);
                Err(HubError::Timeout(target.to_string()))
            }
        }
    }

    fn on(&self, event: &str, handler: EventHandler) {
        if self.inner.handlers.register(event, handler) {
            debug!(event, "replaced hub event handler");
        }
    }

    fn on_lifecycle(&self, handler: LifecycleHandler) {
        self.inner.lifecycle.add(handler);
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        lock(&self.inner.cancel).cancel();
    }
}

// =============================================================================
// Connection establishment
// =============================================================================

impl Inner {
    fn token_text(&self) -> Option<String> {
        (!self.token.is_empty()).then(|| self.token.expose().to_string())
    }

    async fn connect(&self) -> Result<Link, HubError> {
        let endpoint = if self.options.skip_negotiation {
            Endpoint {
                url: self.url.clone(),
                token: self.token_text(),
                connection_id: None,
                connection_token: None,
            }
        } else {
            self.negotiate().await?
        };
        let mut ws = self.open_socket(&endpoint).await?;
        let leftover = handshake(&mut ws, self.options.handshake_timeout).await?;
        Ok(Link {
            ws,
            leftover,
            connection_id: endpoint.connection_id,
        })
    }

    async fn negotiate(&self) -> Result<Endpoint, HubError> {
        let mut url = self.url.clone();
        let mut token = self.token_text();
        for _ in 0..MAX_NEGOTIATE_REDIRECTS {
            let reply = self.negotiate_once(&url, token.as_deref()).await?;
            if let Some(error) = reply.error {
                return Err(HubError::NegotiateRejected(error));
            }
            if let Some(redirect) = reply.url {
                debug!(%redirect, "negotiate redirected");
                url = Url::parse(&redirect)
                    .map_err(|e| HubError::InvalidUrl(format!("{redirect}: {e}")))?;
                if reply.access_token.is_some() {
                    token = reply.access_token;
                }
                continue;
            }
            if !reply.available_transports.is_empty()
                && !reply
                    .available_transports
                    .iter()
                    .any(|t| t.transport == "WebSockets")
            {
                return Err(HubError::NegotiateRejected(
                    "server does not offer the WebSockets transport".into(),
                ));
            }
            let connection_token = reply
                .connection_token
                .or_else(|| reply.connection_id.clone());
            return Ok(Endpoint {
                url,
                token,
                connection_id: reply.connection_id,
                connection_token,
            });
        }
        Err(HubError::NegotiateRejected(
            "too many negotiation redirects".into(),
        ))
    }

    async fn negotiate_once(
        &self,
        url: &Url,
        token: Option<&str>,
    ) -> Result<NegotiateResponse, HubError> {
        let mut negotiate_url = url.clone();
        negotiate_url
            .path_segments_mut()
            .map_err(|_| HubError::InvalidUrl(url.to_string()))?
            .pop_if_empty()
            .push("negotiate");
        negotiate_url
            .query_pairs_mut()
            .append_pair("negotiateVersion", "1");

        let mut request = self.http.post(negotiate_url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let resp = request.send().await.map_err(HubError::Negotiate)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let detail = if body.is_empty() {
                status.to_string()
            } else {
                format!("{status}: {body}")
            };
            return Err(HubError::NegotiateRejected(detail));
        }
        resp.json().await.map_err(HubError::Negotiate)
    }

    async fn open_socket(&self, endpoint: &Endpoint) -> Result<WsStream, HubError> {
        let url = socket_url(endpoint)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(HubError::WebSocket)?;
        if let Some(token) = &endpoint.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| HubError::Handshake(format!("invalid access token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        debug!(url = %endpoint.url, "opening hub socket");
        let (ws, _response) =
            tokio::time::timeout(self.options.handshake_timeout, connect_async(request))
                .await
                .map_err(|_| HubError::Handshake("timed out opening the WebSocket".into()))?
                .map_err(HubError::WebSocket)?;
        Ok(ws)
    }

    /// Install a fresh outbound queue and mark the connection live, unless
    /// `stop` already cancelled this run.
    fn activate(
        &self,
        connection_id: Option<String>,
        cancel: &CancellationToken,
    ) -> Option<mpsc::UnboundedReceiver<String>> {
        let mut state = write(&self.state);
        if cancel.is_cancelled() {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.outgoing) = Some(tx);
        *write(&self.connection_id) = connection_id;
        *state = HubState::Connected;
        Some(rx)
    }

    fn detach(&self) {
        *lock(&self.outgoing) = None;
        *write(&self.connection_id) = None;
    }

    fn fail_pending(&self, reason: &str) {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(HubError::Closed(reason.to_string())));
            }
        }
    }

    fn close(&self, error: Option<String>, cancel: &CancellationToken) {
        {
            let mut state = write(&self.state);
            if cancel.is_cancelled() {
                return;
            }
            *state = HubState::Disconnected;
        }
        self.detach();
        info!(url = %self.url, error = error.as_deref().unwrap_or("-"), "hub connection closed");
        self.lifecycle.emit(&LifecycleEvent::Closed { error });
    }

    /// Route one inbound frame; returns an ending when the server closes.
    fn dispatch(&self, frame: &str) -> Option<Ending> {
        match protocol::parse_message(frame) {
            Ok(HubMessage::Invocation {
                target, arguments, ..
            }) => {
                self.handlers.dispatch(&target, &arguments);
                None
            }
            Ok(HubMessage::Completion {
                invocation_id,
                result,
                error,
            }) => {
                match self.pending.remove(&invocation_id) {
                    Some((_, tx)) => {
                        let outcome = match error {
                            Some(message) => Err(HubError::Invocation(message)),
                            None => Ok(result.unwrap_or(Value::Null)),
                        };
                        let _ = tx.send(outcome);
                    }
                    None => debug!(%invocation_id, "completion for unknown invocation"),
                }
                None
            }
            Ok(HubMessage::Ping) => None,
            Ok(HubMessage::Other(kind)) => {
                debug!(kind, "ignoring hub frame");
                None
            }
            Ok(HubMessage::Close {
                error,
                allow_reconnect,
            }) => Some(Ending::ServerClose {
                error,
                allow_reconnect,
            }),
            Err(e) => {
                warn!(error = %e, "dropping malformed hub frame");
                None
            }
        }
    }
}

fn socket_url(endpoint: &Endpoint) -> Result<Url, HubError> {
    let mut url = endpoint.url.clone();
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(HubError::InvalidUrl(format!(
                "unsupported scheme '{other}' in {}",
                endpoint.url
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| HubError::InvalidUrl(endpoint.url.to_string()))?;

    let mut extra = Vec::new();
    if let Some(id) = &endpoint.connection_token {
        extra.push(("id", id.as_str()));
    }
    if let Some(token) = &endpoint.token {
        extra.push(("access_token", token.as_str()));
    }
    if !extra.is_empty() {
        url.query_pairs_mut().extend_pairs(extra);
    }
    Ok(url)
}

/// Send the protocol handshake and wait for the reply.
async fn handshake(ws: &mut WsStream, timeout: Duration) -> Result<Vec<String>, HubError> {
    ws.send(WsMessage::Text(protocol::handshake_request().into()))
        .await
        .map_err(HubError::WebSocket)?;

    let reply = tokio::time::timeout(timeout, async {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(text.to_string()),
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(HubError::Handshake(
                        "connection closed during handshake".into(),
                    ));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(HubError::WebSocket(e)),
            }
        }
    })
    .await
    .map_err(|_| HubError::Handshake("timed out waiting for the handshake response".into()))??;

    let mut frames = protocol::split_frames(&reply);
    let first = frames
        .next()
        .ok_or_else(|| HubError::Handshake("empty handshake response".into()))?;
    protocol::parse_handshake(first)?;
    Ok(frames.map(str::to_string).collect())
}

// =============================================================================
// Background supervisor
// =============================================================================

async fn supervise(
    inner: Arc<Inner>,
    mut link: Link,
    mut outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    loop {
        let ending = pump(&inner, &mut link, &mut outbound, &cancel).await;
        inner.detach();
        inner.fail_pending(LOST_INVOCATION);

        let reason = match ending {
            Ending::Stopped => return,
            Ending::Lost(reason) => reason,
            Ending::ServerClose {
                error,
                allow_reconnect: true,
            } => error,
            Ending::ServerClose {
                error,
                allow_reconnect: false,
            } => {
                inner.close(error, &cancel);
                return;
            }
        };
        if cancel.is_cancelled() {
            return;
        }

        match reconnect(&inner, reason, &cancel).await {
            Some((next, next_outbound)) => {
                link = next;
                outbound = next_outbound;
            }
            None => return,
        }
    }
}

async fn pump(
    inner: &Inner,
    link: &mut Link,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    cancel: &CancellationToken,
) -> Ending {
    for frame in std::mem::take(&mut link.leftover) {
        if let Some(ending) = inner.dispatch(&frame) {
            return ending;
        }
    }

    let period = inner.options.keep_alive_interval;
    let mut keep_alive = tokio::time::interval_at(Instant::now() + period, period);
    let mut last_seen = Instant::now();

    loop {
        let silence_deadline = last_seen + inner.options.server_timeout;
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = link.ws.close(None).await;
                return Ending::Stopped;
            }
            incoming = link.ws.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    last_seen = Instant::now();
                    for frame in protocol::split_frames(text.as_str()) {
                        if let Some(ending) = inner.dispatch(frame) {
                            let _ = link.ws.close(None).await;
                            return ending;
                        }
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty());
                    return Ending::Lost(reason);
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    last_seen = Instant::now();
                    warn!("ignoring binary frame on JSON hub connection");
                }
                Some(Ok(_)) => last_seen = Instant::now(),
                Some(Err(e)) => return Ending::Lost(Some(e.to_string())),
                None => return Ending::Lost(None),
            },
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = link.ws.send(WsMessage::Text(frame.into())).await {
                        return Ending::Lost(Some(e.to_string()));
                    }
                }
                None => return Ending::Lost(None),
            },
            _ = keep_alive.tick() => {
                if let Err(e) = link.ws.send(WsMessage::Text(protocol::ping_frame().into())).await {
                    return Ending::Lost(Some(e.to_string()));
                }
            }
            _ = tokio::time::sleep_until(silence_deadline) => {
                return Ending::Lost(Some(
                    "Server timeout elapsed without receiving a message from the server.".into(),
                ));
            }
        }
    }
}

/// Walk the delay schedule; `None` when stopped or out of attempts.
async fn reconnect(
    inner: &Arc<Inner>,
    reason: Option<String>,
    cancel: &CancellationToken,
) -> Option<(Link, mpsc::UnboundedReceiver<String>)> {
    {
        let mut state = write(&inner.state);
        if cancel.is_cancelled() {
            return None;
        }
        *state = HubState::Reconnecting;
    }
    warn!(url = %inner.url, reason = reason.as_deref().unwrap_or("-"), "hub connection lost, reconnecting");
    inner.lifecycle.emit(&LifecycleEvent::Reconnecting {
        reason: reason.clone(),
    });

    let mut last_error = reason;
    for (attempt, delay) in inner.options.reconnect_delays.iter().enumerate() {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(*delay) => {}
        }
        debug!(url = %inner.url, attempt = attempt + 1, "reconnect attempt");
        let result = tokio::select! {
            _ = cancel.cancelled() => return None,
            result = inner.connect() => result,
        };
        match result {
            Ok(link) => {
                let outbound = inner.activate(link.connection_id.clone(), cancel)?;
                info!(url = %inner.url, attempt = attempt + 1, "hub connection restored");
                inner.lifecycle.emit(&LifecycleEvent::Reconnected {
                    connection_id: link.connection_id.clone(),
                });
                return Some((link, outbound));
            }
            Err(e) => {
                warn!(url = %inner.url, attempt = attempt + 1, error = %e, "reconnect attempt failed");
                last_error = Some(render_error(&e));
            }
        }
    }

    inner.close(last_error, cancel);
    None
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
