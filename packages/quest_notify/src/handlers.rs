//! Handler registry: named callback slots observed by UI consumers.
//!
//! Slots are merged on registration (last registration per slot wins) and
//! live as long as the channel, so they survive reconnects. The registry has
//! no socket state of its own; the channel forwards events into it.
//!
//! ```
//! use quest_notify::Handlers;
//!
//! let handlers = Handlers::new()
//!     .on_connect(|| println!("connected"))
//!     .on_notification(|data| println!("notification: {data}"));
//! ```

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::error;

use crate::error::ChannelError;
use crate::transport::CloseFrame;

pub type NotificationHandler = Arc<dyn Fn(&Value) + Send + Sync>;
pub type ConnectHandler = Arc<dyn Fn() + Send + Sync>;
pub type DisconnectHandler = Arc<dyn Fn(&CloseFrame) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&ChannelError) + Send + Sync>;

/// A partial or complete set of callbacks. Unset slots are left untouched
/// when merged into the registry.
#[derive(Clone, Default)]
pub struct Handlers {
    pub(crate) on_notification: Option<NotificationHandler>,
    pub(crate) on_connect: Option<ConnectHandler>,
    pub(crate) on_disconnect: Option<DisconnectHandler>,
    pub(crate) on_error: Option<ErrorHandler>,
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("on_notification", &self.on_notification.is_some())
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the envelope's `data` for every notification frame.
    pub fn on_notification(mut self, f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.on_notification = Some(Arc::new(f));
        self
    }

    /// Called each time a socket reaches the open state.
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Called once per socket when it closes, intentionally or not.
    pub fn on_disconnect(mut self, f: impl Fn(&CloseFrame) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Called for handshake and transport errors.
    pub fn on_error(mut self, f: impl Fn(&ChannelError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Shallow merge: every slot set in `other` replaces ours.
    fn merge(&mut self, other: Handlers) {
        if other.on_notification.is_some() {
            self.on_notification = other.on_notification;
        }
        if other.on_connect.is_some() {
            self.on_connect = other.on_connect;
        }
        if other.on_disconnect.is_some() {
            self.on_disconnect = other.on_disconnect;
        }
        if other.on_error.is_some() {
            self.on_error = other.on_error;
        }
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    slots: RwLock<Handlers>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, partial: Handlers) {
        self.slots.write().merge(partial);
    }

    // Callbacks are cloned out of the lock before running so they may
    // re-register handlers or query the channel.

    pub(crate) fn notify(&self, data: &Value) {
        let handler = self.slots.read().on_notification.clone();
        if let Some(handler) = handler {
            guarded("on_notification", || handler(data));
        }
    }

    pub(crate) fn connected(&self) {
        let handler = self.slots.read().on_connect.clone();
        if let Some(handler) = handler {
            guarded("on_connect", || handler());
        }
    }

    pub(crate) fn disconnected(&self, frame: &CloseFrame) {
        let handler = self.slots.read().on_disconnect.clone();
        if let Some(handler) = handler {
            guarded("on_disconnect", || handler(frame));
        }
    }

    pub(crate) fn errored(&self, err: &ChannelError) {
        let handler = self.slots.read().on_error.clone();
        if let Some(handler) = handler {
            guarded("on_error", || handler(err));
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandlerRegistry")
            .field(&*self.slots.read())
            .finish()
    }
}

/// A panicking consumer callback must not take the socket task down with it.
fn guarded(slot: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(handler = slot, "handler panicked; continuing");
    }
}
