//! Socket seam: how the channel opens and drives one WebSocket.
//!
//! The channel only sees [`Socket`] events; [`WsConnector`] provides them over
//! `tokio-tungstenite`.

use std::fmt;
use std::future::Future;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::ChannelError;

/// Close code for a normal, intentional closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code reported when the connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Reason sent with an explicit `disconnect()`.
pub const LOGOUT_REASON: &str = "User logout";

/// Code and reason of a closed socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// The close frame sent by an explicit logout.
    pub fn logout() -> Self {
        Self::new(CLOSE_NORMAL, LOGOUT_REASON)
    }

    /// The connection vanished without a close handshake.
    pub fn abnormal() -> Self {
        Self::new(CLOSE_ABNORMAL, "")
    }

    /// Whether this close was requested by `disconnect()`.
    pub fn is_logout(&self) -> bool {
        self.code == CLOSE_NORMAL && self.reason == LOGOUT_REASON
    }
}

impl fmt::Display for CloseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "code {}", self.code)
        } else {
            write!(f, "code {} ({})", self.code, self.reason)
        }
    }
}

/// Raw lifecycle events from an established socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A text frame.
    Text(String),
    /// The transport reported an error; a `Closed` event follows.
    Error(String),
    /// The peer started the close handshake.
    Closing,
    /// The socket is gone. Terminal: no events follow.
    Closed(CloseFrame),
}

/// An established socket.
pub trait Socket: Send + 'static {
    /// Next event. Must be cancel safe; after `Closed` it is never called again.
    fn next_event(&mut self) -> impl Future<Output = SocketEvent> + Send;

    /// Send a close frame and wait (briefly) for the transport to wind down.
    fn close(&mut self, frame: CloseFrame) -> impl Future<Output = ()> + Send;
}

/// Opens sockets for fully-formed connection URLs.
pub trait Connector: Send + Sync + 'static {
    type Socket: Socket;

    /// Synchronous construction check: reject URLs that can never connect.
    fn validate(&self, url: &str) -> Result<(), ChannelError>;

    /// Perform the handshake.
    fn connect(&self, url: &str) -> impl Future<Output = Result<Self::Socket, ChannelError>> + Send;
}

/// Build `{base}/?token={token}` with the token percent-encoded.
///
/// A trailing `/` on `base` is dropped first, so `ws://h/ws/` and `ws://h/ws`
/// both yield `ws://h/ws/?token=...` rather than a doubled slash.
pub fn connection_url(base: &str, token: &str) -> String {
    format!(
        "{}/?token={}",
        base.trim_end_matches('/'),
        urlencoding::encode(token)
    )
}

// =============================================================================
// tokio-tungstenite implementation
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Socket = WsSocket;

    fn validate(&self, url: &str) -> Result<(), ChannelError> {
        let request = url
            .into_client_request()
            .map_err(ChannelError::from_tungstenite)?;
        match request.uri().scheme_str() {
            Some("ws") | Some("wss") => Ok(()),
            other => Err(ChannelError::InvalidUrl(format!(
                "unsupported scheme {:?}",
                other.unwrap_or("")
            ))),
        }
    }

    async fn connect(&self, url: &str) -> Result<WsSocket, ChannelError> {
        install_crypto_provider();
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(ChannelError::from_tungstenite)?;
        debug!(status = %response.status(), "websocket handshake complete");
        Ok(WsSocket {
            stream,
            peer_close: None,
            errored: false,
        })
    }
}

/// rustls needs a process-wide crypto provider before the first `wss://`
/// handshake.
fn install_crypto_provider() {
    // Err only means a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();
}

pub struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// Close frame received from the peer, reported once the stream ends.
    peer_close: Option<CloseFrame>,
    errored: bool,
}

impl Socket for WsSocket {
    async fn next_event(&mut self) -> SocketEvent {
        if self.errored {
            return SocketEvent::Closed(CloseFrame::abnormal());
        }
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return SocketEvent::Text(text.to_string()),
                Some(Ok(Message::Close(frame))) => {
                    self.peer_close = Some(match frame {
                        Some(f) => CloseFrame::new(u16::from(f.code), f.reason.to_string()),
                        // 1005: no status code present
                        None => CloseFrame::new(1005, ""),
                    });
                    return SocketEvent::Closing;
                }
                // Binary frames are not part of the protocol; ping/pong are
                // answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => {
                    return SocketEvent::Closed(
                        self.peer_close.take().unwrap_or_else(CloseFrame::abnormal),
                    );
                }
                Some(Err(e)) => {
                    self.errored = true;
                    return SocketEvent::Error(e.to_string());
                }
            }
        }
    }

    async fn close(&mut self, frame: CloseFrame) {
        let frame = WsCloseFrame {
            code: CloseCode::from(frame.code),
            reason: frame.reason.into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            debug!("close handshake failed: {}", e);
            return;
        }
        // Drain until the peer acknowledges, bounded so a silent peer cannot
        // hold the task forever.
        let drain = async { while let Some(Ok(_)) = self.stream.next().await {} };
        let _ = tokio::time::timeout(std::time::Duration::from_secs(2), drain).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_embeds_encoded_token() {
        assert_eq!(
            connection_url("ws://api.example.com/ws/notifications", "abc"),
            "ws://api.example.com/ws/notifications/?token=abc"
        );
        assert_eq!(
            connection_url("wss://h/ws/", "a b+c/="),
            "wss://h/ws/?token=a%20b%2Bc%2F%3D"
        );
    }

    #[test]
    fn logout_frame_is_recognised() {
        assert!(CloseFrame::logout().is_logout());
        assert!(!CloseFrame::new(1000, "bye").is_logout());
        assert!(!CloseFrame::abnormal().is_logout());
    }

    #[test]
    fn close_frame_display() {
        assert_eq!(CloseFrame::abnormal().to_string(), "code 1006");
        assert_eq!(CloseFrame::logout().to_string(), "code 1000 (User logout)");
    }

    #[test]
    fn ws_connector_validates_scheme() {
        let connector = WsConnector;
        assert!(connector.validate("ws://localhost:8000/ws/?token=x").is_ok());
        assert!(matches!(
            connector.validate("not a url"),
            Err(ChannelError::InvalidUrl(_))
        ));
        assert!(connector.validate("http://localhost/ws/?token=x").is_err());
    }

    #[test]
    fn url_base_trailing_slash_is_not_doubled() {
        assert_eq!(
            connection_url("ws://h/ws/", "t"),
            connection_url("ws://h/ws", "t")
        );
        assert_eq!(connection_url("ws://h/ws///", "t"), "ws://h/ws/?token=t");
    }

    #[tokio::test]
    async fn wss_handshake_reaches_tls_layer() {
        // Accepts TCP and hangs up, so the TLS handshake itself fails.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let connector = WsConnector;
        let url = format!("wss://127.0.0.1:{port}/ws/?token=x");
        assert!(connector.validate(&url).is_ok());
        match connector.connect(&url).await {
            Err(ChannelError::Connect(message)) => {
                assert!(!message.contains("TLS support not compiled"), "{message}");
            }
            Err(other) => panic!("expected a connect failure, got {other}"),
            Ok(_) => panic!("handshake against a hang-up server succeeded"),
        }
    }
}
