use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::COOKIE, HeaderValue},
        Message,
    },
};
use tracing::debug;

use crate::error::ConnectError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    Error(String),
    Closed,
}

/// Client side of an open duplex link. Dropping `outgoing` asks the
/// transport to close.
pub struct TransportLink {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Transport side of a [`TransportLink`].
pub struct LinkPeer {
    pub written: mpsc::UnboundedReceiver<String>,
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportLink {
    pub fn channel() -> (TransportLink, LinkPeer) {
        let (outgoing, written) = mpsc::unbounded_channel();
        let (events, incoming) = mpsc::unbounded_channel();
        (
            TransportLink { outgoing, incoming },
            LinkPeer { written, events },
        )
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<TransportLink>;
}

/// Socket endpoint whose scheme mirrors the server's transport security.
pub fn websocket_url(server_url: &str, path: &str) -> Result<String, ConnectError> {
    let server_url = server_url.trim().trim_end_matches('/');
    let ws_url = if server_url.starts_with("https://") {
        server_url.replacen("https://", "wss://", 1)
    } else if server_url.starts_with("http://") {
        server_url.replacen("http://", "ws://", 1)
    } else {
        return Err(ConnectError::UnsupportedScheme(server_url.to_string()));
    };
    if path.starts_with('/') {
        Ok(format!("{ws_url}{path}"))
    } else {
        Ok(format!("{ws_url}/{path}"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    session_cookie: Option<String>,
}

impl WsConnector {
    pub fn new(session_cookie: Option<String>) -> Self {
        Self { session_cookie }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<TransportLink> {
        let mut request = url
            .into_client_request()
            .with_context(|| format!("invalid websocket url: {url}"))?;
        if let Some(cookie) = &self.session_cookie {
            request.headers_mut().insert(
                COOKIE,
                HeaderValue::from_str(cookie).context("session cookie is not a valid header")?,
            );
        }

        let (ws_stream, _) = connect_async(request)
            .await
            .with_context(|| format!("failed to connect websocket: {url}"))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (link, peer) = TransportLink::channel();
        let LinkPeer {
            mut written,
            events,
        } = peer;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = written.recv() => match outbound {
                        Some(text) => {
                            if let Err(err) = ws_writer.send(Message::Text(text)).await {
                                let _ = events.send(TransportEvent::Error(format!(
                                    "websocket send failed: {err}"
                                )));
                                break;
                            }
                        }
                        None => {
                            debug!("transport: client released link, closing socket");
                            let _ = ws_writer.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    inbound = ws_reader.next() => match inbound {
                        Some(Ok(Message::Text(text))) => {
                            if events.send(TransportEvent::Frame(text)).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            let _ = events.send(TransportEvent::Error(format!(
                                "websocket receive failed: {err}"
                            )));
                            break;
                        }
                    },
                }
            }
            let _ = events.send(TransportEvent::Closed);
        });

        Ok(link)
    }
}
