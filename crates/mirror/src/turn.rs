//! Persisted conversation turns.

use std::{
    fmt,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    serde::{Deserialize, Serialize},
    tether_protocol::Envelope,
    tracing::warn,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sender {
    User,
    Agent,
}

impl Sender {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Agent => "AGENT",
        }
    }
}

impl FromStr for Sender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(Self::User),
            "AGENT" => Ok(Self::Agent),
            other => Err(format!("unknown sender '{other}'")),
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status. `Sending` is the only non-terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnStatus {
    Sending,
    Sent,
    Failed,
    Received,
}

impl TurnStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sending => "SENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
            Self::Received => "RECEIVED",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Sending)
    }
}

impl FromStr for TurnStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SENDING" => Ok(Self::Sending),
            "SENT" => Ok(Self::Sent),
            "FAILED" => Ok(Self::Failed),
            "RECEIVED" => Ok(Self::Received),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

impl fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored image: file path plus pixel dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData {
    pub path: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub content: String,
    pub sender: Sender,
    pub images: Vec<ImageData>,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub status: TurnStatus,
    pub message_type: Option<String>,
}

impl Turn {
    /// A user turn about to be sent.
    pub fn outgoing(content: impl Into<String>, images: Vec<ImageData>) -> Self {
        Self {
            id: new_turn_id(),
            content: content.into(),
            sender: Sender::User,
            images,
            timestamp: now_ms(),
            status: TurnStatus::Sending,
            message_type: None,
        }
    }

    /// An agent turn received from the gateway. The envelope's `type` tag,
    /// if any, is kept as `message_type`.
    #[must_use]
    pub fn received(envelope: &Envelope) -> Self {
        Self {
            id: new_turn_id(),
            content: envelope.content().to_string(),
            sender: Sender::Agent,
            images: Vec::new(),
            timestamp: now_ms(),
            status: TurnStatus::Received,
            message_type: envelope.kind().map(|k| k.as_str().to_string()),
        }
    }
}

#[must_use]
pub fn new_turn_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// ── Image side-list codec ───────────────────────────────────────────────────

/// Encode an image list for the `images` column. Empty lists store NULL.
#[must_use]
pub fn encode_images(images: &[ImageData]) -> Option<String> {
    if images.is_empty() {
        return None;
    }
    serde_json::to_string(images).ok()
}

/// Decode the `images` column. Malformed data yields an empty list.
#[must_use]
pub fn decode_images(raw: Option<&str>) -> Vec<ImageData> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Vec::new();
    };
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(error = %e, "ignoring malformed image list");
        Vec::new()
    })
}
