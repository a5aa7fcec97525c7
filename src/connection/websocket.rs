//! WebSocket transport for the streaming API.
//!
//! [`WsConnector`] resolves the streaming URL from a server base URL, applies
//! bearer authentication and opens `tokio-tungstenite` connections with an
//! optional connect timeout.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        error::Error as WsError,
        http::header::{HeaderValue, AUTHORIZATION},
        protocol::{frame::coding::CloseCode, CloseFrame, Message},
    },
    MaybeTlsStream,
};
use url::Url;

use super::{Connection, Connector, MAX_TEXT_FRAME_BYTES};
use crate::error::{FeedLinkError, Result};

type WebSocketStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Path of the streaming endpoint relative to the server base URL.
pub const STREAMING_PATH: &str = "/api/v1/streaming";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolve the WebSocket URL of the streaming endpoint.
///
/// `http(s)://` base URLs are mapped to `ws(s)://`; an explicit override must
/// already be `ws://` or `wss://`.
pub fn resolve_stream_url(base_url: &str, override_url: Option<&str>) -> Result<String> {
    let base = Url::parse(base_url.trim()).map_err(|e| {
        FeedLinkError::ConfigurationError(format!("Invalid base_url '{}': {}", base_url, e))
    })?;
    validate_url(&base, "base_url")?;

    if let Some(url) = override_url {
        let parsed = Url::parse(url.trim()).map_err(|e| {
            FeedLinkError::ConfigurationError(format!("Invalid stream URL '{}': {}", url, e))
        })?;
        validate_url(&parsed, "stream URL")?;
        match parsed.scheme() {
            "ws" | "wss" => {},
            other => {
                return Err(FeedLinkError::ConfigurationError(format!(
                    "stream URL must use ws:// or wss:// (found '{}')",
                    other
                )));
            },
        }
        if base.scheme() == "https" && parsed.scheme() == "ws" {
            return Err(FeedLinkError::ConfigurationError(
                "Refusing insecure ws:// stream URL when base_url uses https://".to_string(),
            ));
        }
        return Ok(parsed.to_string());
    }

    let ws_scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(FeedLinkError::ConfigurationError(format!(
                "Unsupported base_url scheme '{}'; expected http(s) or ws(s)",
                other
            )));
        },
    };

    let mut ws_url = base.clone();
    ws_url.set_scheme(ws_scheme).map_err(|_| {
        FeedLinkError::ConfigurationError("Failed to set WebSocket URL scheme".to_string())
    })?;
    ws_url.set_path(STREAMING_PATH);
    ws_url.set_query(None);
    ws_url.set_fragment(None);
    Ok(ws_url.to_string())
}

fn validate_url(url: &Url, context: &str) -> Result<()> {
    if url.host_str().is_none() {
        return Err(FeedLinkError::ConfigurationError(format!("{} must include a host", context)));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(FeedLinkError::ConfigurationError(format!(
            "{} must not include username/password credentials",
            context
        )));
    }
    Ok(())
}

/// Opens WebSocket connections to a streaming endpoint.
///
/// # Example
///
/// ```rust
/// use feed_link::WsConnector;
///
/// let connector = WsConnector::builder()
///     .base_url("https://social.example")
///     .access_token("token")
///     .build()
///     .unwrap();
/// assert_eq!(connector.url(), "wss://social.example/api/v1/streaming");
/// ```
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    access_token: Option<String>,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn builder() -> WsConnectorBuilder {
        WsConnectorBuilder::default()
    }

    /// Resolved streaming URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    fn build_request(
        &self,
    ) -> Result<tokio_tungstenite::tungstenite::http::Request<()>> {
        let mut request = self.url.as_str().into_client_request().map_err(|e| {
            FeedLinkError::ConfigurationError(format!("Failed to build WebSocket request: {}", e))
        })?;

        if let Some(token) = &self.access_token {
            let header_value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
                FeedLinkError::ConfigurationError(format!(
                    "Invalid access token for Authorization header: {}",
                    e
                ))
            })?;
            request.headers_mut().insert(AUTHORIZATION, header_value);
        }
        Ok(request)
    }
}

fn map_connect_error(err: WsError) -> FeedLinkError {
    match err {
        WsError::Http(response) => {
            let message = match response.status().as_u16() {
                401 => "Unauthorized: streaming requires a valid access token".to_string(),
                403 => "Forbidden: access to streaming denied".to_string(),
                code => format!("Streaming HTTP error: {}", code),
            };
            FeedLinkError::ConnectionError(message)
        },
        other => FeedLinkError::ConnectionError(other.to_string()),
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let request = self.build_request()?;
        log::debug!("[feed-link] Opening streaming connection to {}", self.url);

        let connect_result = if self.connect_timeout.is_zero() {
            Ok(connect_async(request).await)
        } else {
            tokio::time::timeout(self.connect_timeout, connect_async(request)).await
        };

        match connect_result {
            Ok(Ok((stream, _response))) => Ok(Box::new(WsConnection { stream })),
            Ok(Err(e)) => Err(map_connect_error(e)),
            Err(_) => Err(FeedLinkError::TimeoutError(format!(
                "Connection timeout ({:?})",
                self.connect_timeout
            ))),
        }
    }
}

/// Builder for [`WsConnector`].
#[derive(Debug, Clone, Default)]
pub struct WsConnectorBuilder {
    base_url: Option<String>,
    stream_url: Option<String>,
    access_token: Option<String>,
    connect_timeout: Option<Duration>,
}

impl WsConnectorBuilder {
    /// Server base URL, e.g. `https://social.example`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Explicit `ws(s)://` streaming URL, used instead of the derived one.
    pub fn stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = Some(url.into());
        self
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Zero disables the timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<WsConnector> {
        let base_url = self
            .base_url
            .ok_or_else(|| FeedLinkError::ConfigurationError("base_url is required".to_string()))?;
        let url = resolve_stream_url(&base_url, self.stream_url.as_deref())?;
        Ok(WsConnector {
            url,
            access_token: self.access_token,
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        })
    }
}

struct WsConnection {
    stream: WebSocketStream,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| FeedLinkError::SendError(e.to_string()))
    }

    async fn next_frame(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => {
                    if text.len() > MAX_TEXT_FRAME_BYTES {
                        log::warn!("[feed-link] Text frame too large ({} bytes)", text.len());
                        continue;
                    }
                    return Some(Ok(text.as_str().to_owned()));
                },
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(e) => {
                        log::warn!("[feed-link] Skipping non UTF-8 binary frame: {}", e);
                    },
                },
                Ok(Message::Close(frame)) => {
                    if let Some(frame) = frame {
                        log::debug!(
                            "[feed-link] Server closed stream: {} ({})",
                            frame.reason.as_str(),
                            u16::from(frame.code)
                        );
                    }
                    return None;
                },
                // tungstenite queues pong replies on its own
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {},
                Err(e) => return Some(Err(FeedLinkError::WebSocketError(e.to_string()))),
            }
        }
    }

    async fn send_ping(&mut self) -> Result<()> {
        self.stream
            .send(Message::Ping(Bytes::new()))
            .await
            .map_err(|e| FeedLinkError::WebSocketError(format!("Ping failed: {}", e)))
    }

    async fn close(&mut self, code: u16) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            log::debug!("[feed-link] Close handshake failed: {}", e);
        }
    }
}
