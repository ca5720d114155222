//! NotificationChannel: the one realtime socket shared by every consumer.
//!
//! The channel is an explicitly constructed service object. It owns at most
//! one socket at a time, bound to the bearer token it was last connected
//! with, and translates the socket's lifecycle into handler dispatches.
//! Abnormal closes are retried on a fixed interval up to a cap; an explicit
//! `disconnect()` cancels any pending retry before returning.
//!
//! `connect`, `disconnect` and `status` are synchronous. Everything that
//! waits on the network runs in a per-socket task spawned on the runtime
//! captured at build time.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::config::ChannelConfig;
use crate::envelope::{self, Inbound};
use crate::error::ChannelError;
use crate::handlers::{HandlerRegistry, Handlers};
use crate::reconnect::RetryTimer;
use crate::session::TokenSource;
use crate::transport::{CloseFrame, Connector, Socket, SocketEvent, WsConnector, connection_url};

/// Lifecycle of the owned socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Read-only snapshot handed to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub is_connected: bool,
    pub is_connecting: bool,
    pub reconnect_attempts: u32,
}

impl ChannelStatus {
    pub const DISCONNECTED: ChannelStatus = ChannelStatus {
        is_connected: false,
        is_connecting: false,
        reconnect_attempts: 0,
    };
}

/// The live socket's entry in the channel state. Dropping `close_tx`
/// without sending also ends the socket task.
struct SocketSlot {
    epoch: u64,
    close_tx: oneshot::Sender<CloseFrame>,
}

struct ConnectionState {
    status: ConnectionStatus,
    socket: Option<SocketSlot>,
    reconnect_attempts: u32,
    retry: Option<RetryTimer>,
    /// Bumped for every socket and every armed retry.
    next_id: u64,
    shut_down: bool,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            socket: None,
            reconnect_attempts: 0,
            retry: None,
            next_id: 0,
            shut_down: false,
        }
    }

    fn snapshot(&self) -> ChannelStatus {
        ChannelStatus {
            is_connected: self.status == ConnectionStatus::Open,
            is_connecting: self.status == ConnectionStatus::Connecting,
            reconnect_attempts: self.reconnect_attempts,
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.socket.as_ref().is_some_and(|s| s.epoch == epoch)
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

struct Inner<C: Connector> {
    config: ChannelConfig,
    connector: C,
    tokens: Arc<dyn TokenSource>,
    handlers: HandlerRegistry,
    state: Mutex<ConnectionState>,
    status_tx: watch::Sender<ChannelStatus>,
    runtime: Handle,
}

/// Builder for [`NotificationChannel`].
pub struct ChannelBuilder<C: Connector = WsConnector> {
    config: ChannelConfig,
    connector: C,
    tokens: Option<Arc<dyn TokenSource>>,
    handlers: Handlers,
}

impl ChannelBuilder<WsConnector> {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            connector: WsConnector,
            tokens: None,
            handlers: Handlers::new(),
        }
    }
}

impl<C: Connector> ChannelBuilder<C> {
    /// Swap the socket implementation.
    pub fn connector<D: Connector>(self, connector: D) -> ChannelBuilder<D> {
        ChannelBuilder {
            config: self.config,
            connector,
            tokens: self.tokens,
            handlers: self.handlers,
        }
    }

    /// Where retries read the current bearer token from. Without one,
    /// abnormal closes are never retried.
    pub fn token_source(mut self, tokens: impl TokenSource + 'static) -> Self {
        self.tokens = Some(Arc::new(tokens));
        self
    }

    /// Handlers registered before the first connection.
    pub fn handlers(mut self, handlers: Handlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// Must run inside a tokio runtime; socket and retry tasks are spawned
    /// on it.
    pub fn build(self) -> Result<NotificationChannel<C>, ChannelError> {
        let runtime = Handle::try_current().map_err(|_| ChannelError::NoRuntime)?;
        let (status_tx, _) = watch::channel(ChannelStatus::DISCONNECTED);
        let handlers = HandlerRegistry::new();
        handlers.set(self.handlers);

        Ok(NotificationChannel {
            inner: Arc::new(Inner {
                config: self.config,
                connector: self.connector,
                tokens: self.tokens.unwrap_or_else(|| Arc::new(NoTokens)),
                handlers,
                state: Mutex::new(ConnectionState::new()),
                status_tx,
                runtime,
            }),
        })
    }
}

struct NoTokens;

impl TokenSource for NoTokens {
    fn bearer_token(&self) -> Option<String> {
        None
    }
}

/// The process-wide notification channel.
///
/// Cloning is cheap and every clone drives the same socket. Only the session
/// synchronizer (and the logout fast path) should call `connect` and
/// `disconnect`; UI consumers get a [`ChannelHandle`].
pub struct NotificationChannel<C: Connector = WsConnector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for NotificationChannel<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl NotificationChannel<WsConnector> {
    pub fn builder(config: ChannelConfig) -> ChannelBuilder<WsConnector> {
        ChannelBuilder::new(config)
    }
}

impl<C: Connector> NotificationChannel<C> {
    /// Open a socket authenticated with `token`, unless one is already open
    /// or being opened.
    pub fn connect(&self, token: &str) {
        let mut state = self.inner.state.lock();
        self.inner.connect_locked(&mut state, token);
    }

    /// Cancel any pending retry, close the socket with `1000 "User logout"`
    /// and reset the attempt counter. Safe to call with nothing connected.
    pub fn disconnect(&self) {
        let mut state = self.inner.state.lock();
        self.inner.disconnect_locked(&mut state);
    }

    /// Disconnect and refuse any later `connect`.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        self.inner.disconnect_locked(&mut state);
        state.shut_down = true;
        info!("notification channel shut down");
    }

    pub fn status(&self) -> ChannelStatus {
        self.inner.state.lock().snapshot()
    }

    /// Detailed lifecycle state, including `Closing`.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.state.lock().status
    }

    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn set_handlers(&self, handlers: Handlers) {
        self.inner.handlers.set(handlers);
    }

    /// The narrow view handed to UI consumers.
    pub fn handle(&self) -> ChannelHandle {
        ChannelHandle {
            inner: self.inner.clone(),
        }
    }
}

/// Consumer-facing view of the channel: register handlers, read status.
/// Cannot connect, disconnect, or reach the socket.
#[derive(Clone)]
pub struct ChannelHandle {
    inner: Arc<dyn ChannelView>,
}

impl ChannelHandle {
    pub fn set_handlers(&self, handlers: Handlers) {
        self.inner.set_handlers(handlers);
    }

    pub fn status(&self) -> ChannelStatus {
        self.inner.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.watch_status()
    }
}

trait ChannelView: Send + Sync {
    fn set_handlers(&self, handlers: Handlers);
    fn status(&self) -> ChannelStatus;
    fn watch_status(&self) -> watch::Receiver<ChannelStatus>;
}

impl<C: Connector> ChannelView for Inner<C> {
    fn set_handlers(&self, handlers: Handlers) {
        self.handlers.set(handlers);
    }

    fn status(&self) -> ChannelStatus {
        self.state.lock().snapshot()
    }

    fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status_tx.subscribe()
    }
}

impl<C: Connector> Inner<C> {
    fn publish(&self, state: &ConnectionState) {
        self.status_tx.send_replace(state.snapshot());
    }

    fn connect_locked(self: &Arc<Self>, state: &mut ConnectionState, token: &str) {
        if state.shut_down {
            warn!("connect ignored: channel is shut down");
            return;
        }
        if token.is_empty() {
            warn!("connect ignored: empty token");
            return;
        }
        if matches!(
            state.status,
            ConnectionStatus::Open | ConnectionStatus::Connecting
        ) {
            debug!(status = ?state.status, "connect ignored: socket already active");
            return;
        }

        // A fresh connect supersedes whatever retry was pending.
        state.retry = None;

        let url = connection_url(&self.config.ws_base_url, token);
        if let Err(e) = self.connector.validate(&url) {
            error!(
                error = %e,
                base_url = %self.config.ws_base_url,
                "cannot build notification socket"
            );
            return;
        }

        // A socket still finishing a peer-initiated close is abandoned.
        if let Some(old) = state.socket.take() {
            debug!(epoch = old.epoch, "superseding closing socket");
        }

        let epoch = state.next_id();
        let (close_tx, close_rx) = oneshot::channel();
        state.socket = Some(SocketSlot { epoch, close_tx });
        state.status = ConnectionStatus::Connecting;
        self.publish(state);

        info!(epoch, "opening notification socket");
        self.runtime
            .spawn(run_socket(self.clone(), epoch, url, close_rx));
    }

    fn disconnect_locked(&self, state: &mut ConnectionState) {
        if state.retry.take().is_some() {
            debug!("pending reconnect cancelled");
        }
        if let Some(slot) = state.socket.take() {
            info!(epoch = slot.epoch, "closing notification socket (logout)");
            // The task may already be gone; nothing left to close then.
            let _ = slot.close_tx.send(CloseFrame::logout());
        }
        state.reconnect_attempts = 0;
        state.status = ConnectionStatus::Disconnected;
        self.publish(state);
    }

    /// Returns false when the socket was superseded while handshaking.
    fn on_open(&self, epoch: u64) -> bool {
        {
            let mut state = self.state.lock();
            if !state.is_current(epoch) {
                return false;
            }
            state.status = ConnectionStatus::Open;
            state.reconnect_attempts = 0;
            self.publish(&state);
        }
        info!(epoch, "notification socket open");
        self.handlers.connected();
        true
    }

    /// The handshake refused the URL itself; no retry can succeed.
    fn on_rejected(&self, epoch: u64, err: &ChannelError) {
        error!(
            epoch,
            error = %err,
            base_url = %self.config.ws_base_url,
            "cannot build notification socket"
        );
        let mut state = self.state.lock();
        if state.is_current(epoch) {
            state.socket = None;
            state.status = ConnectionStatus::Disconnected;
            self.publish(&state);
        }
    }

    fn on_closing(&self, epoch: u64) {
        let mut state = self.state.lock();
        if state.is_current(epoch) {
            state.status = ConnectionStatus::Closing;
            self.publish(&state);
        }
    }

    fn on_frame(&self, text: &str) {
        match envelope::decode(text) {
            Ok(Inbound::Notification(data)) => self.handlers.notify(&data),
            Ok(Inbound::Ignored(kind)) => debug!(kind = %kind, "ignoring envelope"),
            Err(e) => warn!(error = %e, "dropping malformed frame"),
        }
    }

    fn on_error(&self, err: ChannelError) {
        warn!(code = err.error_code(), error = %err, "notification socket error");
        self.handlers.errored(&err);
    }

    /// The socket is gone on its own (not via `disconnect`).
    fn on_closed(self: &Arc<Self>, epoch: u64, frame: CloseFrame) {
        {
            let mut state = self.state.lock();
            if state.is_current(epoch) {
                state.socket = None;
                state.status = ConnectionStatus::Disconnected;
                if frame.is_logout() {
                    info!(epoch, "notification socket closed by logout");
                } else {
                    info!(epoch, close = %frame, "notification socket closed unexpectedly");
                    self.schedule_retry(&mut state);
                }
                self.publish(&state);
            }
        }
        self.handlers.disconnected(&frame);
    }

    fn schedule_retry(self: &Arc<Self>, state: &mut ConnectionState) {
        let Some(delay) = self.config.reconnect.next_delay(state.reconnect_attempts) else {
            info!(
                attempts = state.reconnect_attempts,
                "reconnect attempts exhausted; waiting for a new session"
            );
            return;
        };
        state.reconnect_attempts += 1;
        let id = state.next_id();
        let inner = self.clone();
        state.retry = Some(RetryTimer::arm(&self.runtime, id, delay, move || {
            inner.fire_retry(id);
        }));
        info!(
            attempt = state.reconnect_attempts,
            max = self.config.reconnect.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );
    }

    fn fire_retry(self: &Arc<Self>, id: u64) {
        let mut state = self.state.lock();
        // Cancelled (or replaced) after the timer elapsed but before we got
        // the lock.
        if state.retry.as_ref().map(RetryTimer::id) != Some(id) {
            return;
        }
        state.retry = None;

        match self.tokens.bearer_token() {
            Some(token) => {
                info!(attempt = state.reconnect_attempts, "reconnecting");
                self.connect_locked(&mut state, &token);
            }
            None => debug!("reconnect skipped: no session"),
        }
    }
}

/// Drive one socket from handshake to close.
async fn run_socket<C: Connector>(
    inner: Arc<Inner<C>>,
    epoch: u64,
    url: String,
    mut close_rx: oneshot::Receiver<CloseFrame>,
) {
    let connected = tokio::select! {
        biased;
        request = &mut close_rx => {
            // Closed (or superseded) before the handshake finished.
            if let Ok(frame) = request {
                inner.handlers.disconnected(&frame);
            }
            return;
        }
        result = inner.connector.connect(&url) => result,
    };

    let mut socket = match connected {
        Ok(socket) => socket,
        Err(err @ ChannelError::InvalidUrl(_)) => {
            inner.on_rejected(epoch, &err);
            return;
        }
        Err(err) => {
            inner.on_error(err);
            inner.on_closed(epoch, CloseFrame::abnormal());
            return;
        }
    };

    if !inner.on_open(epoch) {
        let frame = close_rx.try_recv().unwrap_or_else(|_| CloseFrame::logout());
        socket.close(frame.clone()).await;
        inner.handlers.disconnected(&frame);
        return;
    }

    loop {
        tokio::select! {
            biased;
            request = &mut close_rx => {
                match request {
                    Ok(frame) => {
                        socket.close(frame.clone()).await;
                        inner.handlers.disconnected(&frame);
                    }
                    // Superseded without a close request: just drop the socket.
                    Err(_) => debug!(epoch, "socket superseded"),
                }
                return;
            }
            event = socket.next_event() => match event {
                SocketEvent::Text(text) => inner.on_frame(&text),
                SocketEvent::Error(message) => inner.on_error(ChannelError::Transport(message)),
                SocketEvent::Closing => inner.on_closing(epoch),
                SocketEvent::Closed(frame) => {
                    inner.on_closed(epoch, frame);
                    return;
                }
            },
        }
    }
}
