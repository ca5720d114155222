//! Session synchronizer: follows the externally-owned authentication
//! session and connects or disconnects the notification channel as the
//! session appears and disappears.
//!
//! The auth subsystem publishes [`Session`] values on a `watch` channel.
//! The synchronizer never stores the token itself; retries read it back
//! through [`TokenSource`] at the moment they fire.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::channel::NotificationChannel;
use crate::transport::Connector;

/// Authentication state as seen by the notification subsystem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Session {
    #[default]
    Absent,
    Present {
        token: String,
    },
}

impl Session {
    pub fn present(token: impl Into<String>) -> Self {
        Self::Present {
            token: token.into(),
        }
    }

    /// The bearer token, if signed in with a non-empty one.
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Present { token } if !token.is_empty() => Some(token),
            _ => None,
        }
    }
}

/// Supplies the current bearer token on demand.
pub trait TokenSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

impl TokenSource for watch::Receiver<Session> {
    fn bearer_token(&self) -> Option<String> {
        self.borrow().token().map(str::to_owned)
    }
}

impl<F> TokenSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn bearer_token(&self) -> Option<String> {
        self()
    }
}

/// Apply one observed session state to the channel.
///
/// Idempotent: repeating a state relies on `connect` being a no-op while a
/// socket is active and `disconnect` being a no-op with none.
pub fn apply<C: Connector>(channel: &NotificationChannel<C>, session: &Session) {
    match session.token() {
        Some(token) => channel.connect(token),
        None => channel.disconnect(),
    }
}

/// Background task mirroring a session watch channel onto the notification
/// channel.
pub struct SessionSync<C: Connector> {
    channel: NotificationChannel<C>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl<C: Connector> SessionSync<C> {
    /// Apply the current session immediately, then follow every change.
    pub fn spawn(channel: NotificationChannel<C>, mut sessions: watch::Receiver<Session>) -> Self {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_channel = channel.clone();

        let task = tokio::spawn(async move {
            let initial = sessions.borrow_and_update().clone();
            apply(&task_channel, &initial);
            let mut signed_in = initial.token().is_some();

            loop {
                tokio::select! {
                    () = task_cancel.cancelled() => break,
                    changed = sessions.changed() => {
                        if changed.is_err() {
                            debug!("session source dropped; stopping sync");
                            break;
                        }
                        let session = sessions.borrow_and_update().clone();
                        let now_signed_in = session.token().is_some();
                        if now_signed_in != signed_in {
                            info!(signed_in = now_signed_in, "session transition");
                        }
                        signed_in = now_signed_in;
                        apply(&task_channel, &session);
                    }
                }
            }
        });

        Self {
            channel,
            cancel,
            task,
        }
    }

    /// Logout fast path: close the socket without waiting for the session
    /// source to publish `Absent`.
    pub fn logout(&self) {
        self.channel.disconnect();
    }

    /// Stop following the session. The channel is left as it is.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}
