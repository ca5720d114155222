//! Scriptable in-memory sockets for channel tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::ChannelError;
use crate::handlers::Handlers;
use crate::transport::{CloseFrame, Connector, Socket, SocketEvent};

/// Let every ready task run (and, with a paused clock, advance 1ms).
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[derive(Default)]
struct FakeShared {
    refuse: AtomicBool,
    /// Returned by every handshake while set.
    handshake_error: Mutex<Option<ChannelError>>,
    handshake_delay: Mutex<Duration>,
    /// URL and start time of every handshake attempt.
    attempts: Mutex<Vec<(String, Instant)>>,
    peers: Mutex<Vec<FakePeer>>,
}

/// Connector whose sockets are driven by the test through [`FakePeer`]s.
#[derive(Clone, Default)]
pub(crate) struct FakeConnector {
    shared: Arc<FakeShared>,
}

impl FakeConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make subsequent handshakes fail.
    pub(crate) fn refuse(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn fail_handshakes_with(&self, err: ChannelError) {
        *self.shared.handshake_error.lock() = Some(err);
    }

    pub(crate) fn clear_handshake_failure(&self) {
        *self.shared.handshake_error.lock() = None;
    }

    pub(crate) fn set_handshake_delay(&self, delay: Duration) {
        *self.shared.handshake_delay.lock() = delay;
    }

    pub(crate) fn attempts(&self) -> usize {
        self.shared.attempts.lock().len()
    }

    pub(crate) fn attempt_times(&self) -> Vec<Instant> {
        self.shared.attempts.lock().iter().map(|(_, t)| *t).collect()
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.shared
            .attempts
            .lock()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Number of sockets that completed the handshake.
    pub(crate) fn opened(&self) -> usize {
        self.shared.peers.lock().len()
    }

    /// Server side of the most recently opened socket.
    pub(crate) fn peer(&self) -> FakePeer {
        self.shared
            .peers
            .lock()
            .last()
            .cloned()
            .expect("no socket opened yet")
    }
}

impl Connector for FakeConnector {
    type Socket = FakeSocket;

    fn validate(&self, url: &str) -> Result<(), ChannelError> {
        if url.starts_with("ws://") || url.starts_with("wss://") {
            Ok(())
        } else {
            Err(ChannelError::InvalidUrl(url.to_string()))
        }
    }

    async fn connect(&self, url: &str) -> Result<FakeSocket, ChannelError> {
        self.shared
            .attempts
            .lock()
            .push((url.to_string(), Instant::now()));

        let delay = *self.shared.handshake_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failure = self.shared.handshake_error.lock().clone();
        if let Some(err) = failure {
            return Err(err);
        }
        if self.shared.refuse.load(Ordering::SeqCst) {
            return Err(ChannelError::Connect("connection refused".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let closed_with = Arc::new(Mutex::new(None));
        self.shared.peers.lock().push(FakePeer {
            events: tx,
            closed_with: closed_with.clone(),
        });
        Ok(FakeSocket {
            events: rx,
            closed_with,
        })
    }
}

pub(crate) struct FakeSocket {
    events: mpsc::UnboundedReceiver<SocketEvent>,
    closed_with: Arc<Mutex<Option<CloseFrame>>>,
}

impl Socket for FakeSocket {
    async fn next_event(&mut self) -> SocketEvent {
        self.events
            .recv()
            .await
            .unwrap_or_else(|| SocketEvent::Closed(CloseFrame::abnormal()))
    }

    async fn close(&mut self, frame: CloseFrame) {
        *self.closed_with.lock() = Some(frame);
    }
}

#[derive(Clone)]
pub(crate) struct FakePeer {
    events: mpsc::UnboundedSender<SocketEvent>,
    closed_with: Arc<Mutex<Option<CloseFrame>>>,
}

impl FakePeer {
    pub(crate) fn send_text(&self, text: &str) {
        let _ = self.events.send(SocketEvent::Text(text.to_string()));
    }

    pub(crate) fn send_event(&self, event: SocketEvent) {
        let _ = self.events.send(event);
    }

    /// Connection lost without a close handshake (1006).
    pub(crate) fn drop_abnormally(&self) {
        self.send_event(SocketEvent::Closed(CloseFrame::abnormal()));
    }

    /// Close frame the client sent, if it closed this socket itself.
    pub(crate) fn closed_with(&self) -> Option<CloseFrame> {
        self.closed_with.lock().clone()
    }
}

/// Everything dispatched to the handler registry, in order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Recorded {
    Connect,
    Disconnect(CloseFrame),
    Error(String),
    Notification(Value),
}

#[derive(Clone, Default)]
pub(crate) struct Recorder {
    events: Arc<Mutex<Vec<Recorded>>>,
}

impl Recorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn handlers(&self) -> Handlers {
        let on_note = self.events.clone();
        let on_connect = self.events.clone();
        let on_disconnect = self.events.clone();
        let on_error = self.events.clone();
        Handlers::new()
            .on_notification(move |data| on_note.lock().push(Recorded::Notification(data.clone())))
            .on_connect(move || on_connect.lock().push(Recorded::Connect))
            .on_disconnect(move |frame| on_disconnect.lock().push(Recorded::Disconnect(frame.clone())))
            .on_error(move |err| on_error.lock().push(Recorded::Error(err.to_string())))
    }

    pub(crate) fn events(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }

    pub(crate) fn notifications(&self) -> Vec<Value> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Recorded::Notification(v) => Some(v.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Recorded) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}
