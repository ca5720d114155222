//! Realtime notification channel for the quest dashboard.
//!
//! One authentication-bound WebSocket per process delivers push
//! notifications (new quest, submission validated/rejected, pending review)
//! to any number of consumers. The channel follows the user's session,
//! survives transient network failures with bounded reconnection, and is
//! torn down cleanly on logout.
//!
//! # Example
//!
//! ```no_run
//! use quest_notify::{ChannelConfig, Handlers, NotificationChannel, Session, SessionSync};
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (session_tx, session_rx) = watch::channel(Session::Absent);
//!
//!     let channel = NotificationChannel::builder(ChannelConfig::default())
//!         .token_source(session_rx.clone())
//!         .build()?;
//!
//!     // UI consumers only ever see the handle.
//!     let handle = channel.handle();
//!     handle.set_handlers(Handlers::new().on_notification(|data| println!("{data}")));
//!
//!     let sync = SessionSync::spawn(channel, session_rx);
//!     session_tx.send_replace(Session::present("bearer-token"));
//!
//!     tokio::signal::ctrl_c().await?;
//!     sync.logout();
//!     sync.stop().await;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod reconnect;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_helpers;

pub use channel::{
    ChannelBuilder, ChannelHandle, ChannelStatus, ConnectionStatus, NotificationChannel,
};
pub use config::ChannelConfig;
pub use envelope::{Envelope, Notification, NotificationKind};
pub use error::{ChannelError, EnvelopeError};
pub use handlers::Handlers;
pub use reconnect::ReconnectPolicy;
pub use session::{Session, SessionSync, TokenSource};
pub use transport::{CloseFrame, Connector, Socket, SocketEvent, WsConnector};
