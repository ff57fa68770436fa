//! WebSocket transport behind a [`Connector`] seam.
//!
//! The connection manager only sees [`Link`]s: a sink of [`Outbound`] frames
//! and a stream of [`Inbound`] frames. [`WsConnector`] produces them from a
//! real `tokio-tungstenite` socket; tests plug in channel-backed links.

use std::{fmt, pin::Pin};

use {
    async_trait::async_trait,
    futures::{Sink, SinkExt, StreamExt, future, stream::BoxStream},
    tokio_tungstenite::{
        connect_async_with_config,
        tungstenite::{
            self, Message,
            client::IntoClientRequest,
            http::{HeaderValue, StatusCode, header::AUTHORIZATION},
        },
    },
    tether_config::GatewaySettings,
    tracing::debug,
    url::Url,
};

use crate::error::{Error, Result};

/// Endpoint plus credentials for one session.
#[derive(Clone, PartialEq, Eq)]
pub struct Target {
    pub url: String,
    pub api_key: Option<String>,
}

impl Target {
    /// Validate `url` as a `ws://` or `wss://` endpoint.
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let url = url.into();
        let parsed = Url::parse(&url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(Error::InvalidUrl(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }
        Ok(Self {
            url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    pub fn from_settings(settings: &GatewaySettings) -> Result<Self> {
        Self::new(settings.ws_url(), settings.api_key().map(str::to_owned))
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Ping(Vec<u8>),
    Pong,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Ping,
    Pong(Vec<u8>),
    Close,
}

impl From<Outbound> for Message {
    fn from(frame: Outbound) -> Self {
        match frame {
            Outbound::Text(text) => Message::Text(text.into()),
            Outbound::Ping => Message::Ping(Vec::new().into()),
            Outbound::Pong(data) => Message::Pong(data.into()),
            Outbound::Close => Message::Close(None),
        }
    }
}

pub type LinkSink = Pin<Box<dyn Sink<Outbound, Error = Error> + Send>>;

/// One established duplex link.
pub struct Link {
    pub sink: LinkSink,
    pub stream: BoxStream<'static, Result<Inbound>>,
}

impl Link {
    pub fn new(
        sink: impl Sink<Outbound, Error = Error> + Send + 'static,
        stream: BoxStream<'static, Result<Inbound>>,
    ) -> Self {
        Self {
            sink: Box::pin(sink),
            stream,
        }
    }
}

/// Opens links to the gateway.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Perform the handshake. Credential rejection must surface as
    /// [`Error::Auth`] so the caller stops retrying.
    async fn connect(&self, target: &Target) -> Result<Link>;
}

/// Real WebSocket connector. TLS comes from the `rustls` native roots.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, target: &Target) -> Result<Link> {
        let mut request = target.url.as_str().into_client_request()?;
        if let Some(key) = &target.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| Error::Connection(format!("invalid api key header: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (socket, response) = connect_async_with_config(request, None, false)
            .await
            .map_err(map_handshake_error)?;
        debug!(status = %response.status(), "websocket upgrade complete");

        let (sink, stream) = socket.split();
        let sink = sink
            .sink_map_err(Error::from)
            .with(|frame: Outbound| future::ready(Ok::<_, Error>(Message::from(frame))));
        let stream = stream
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(Inbound::Text(text.to_string()))),
                    Ok(Message::Ping(data)) => Some(Ok(Inbound::Ping(data.to_vec()))),
                    Ok(Message::Pong(_)) => Some(Ok(Inbound::Pong)),
                    Ok(Message::Close(_)) => Some(Ok(Inbound::Close)),
                    Ok(Message::Binary(_) | Message::Frame(_)) => None,
                    Err(e) => Some(Err(Error::from(e))),
                })
            })
            .boxed();

        Ok(Link::new(sink, stream))
    }
}

/// 401/403 on the upgrade is a credential problem, anything else is a
/// transient connection failure.
fn map_handshake_error(err: tungstenite::Error) -> Error {
    match &err {
        tungstenite::Error::Http(response) => upgrade_status_error(response.status()),
        _ => Error::WebSocket(err),
    }
}

fn upgrade_status_error(status: StatusCode) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Auth(format!("gateway rejected credentials ({status})"))
        },
        _ => Error::Connection(format!("upgrade failed with HTTP {status}")),
    }
}
