use std::fmt;

use serde::{Deserialize, Serialize};

/// The `type` tag of an envelope.
///
/// Unrecognised tags are preserved verbatim in [`EnvelopeType::Other`] so they
/// can be stored alongside the turn they arrived with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnvelopeType {
    Status,
    StatusEnd,
    ToolRequest,
    ToolResponse,
    Exit,
    SetupRequired,
    Other(String),
}

impl EnvelopeType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Status => "status",
            Self::StatusEnd => "status_end",
            Self::ToolRequest => "tool_request",
            Self::ToolResponse => "tool_response",
            Self::Exit => "exit",
            Self::SetupRequired => "setup_required",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for EnvelopeType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "status" => Self::Status,
            "status_end" => Self::StatusEnd,
            "tool_request" => Self::ToolRequest,
            "tool_response" => Self::ToolResponse,
            "exit" => Self::Exit,
            "setup_required" => Self::SetupRequired,
            _ => Self::Other(tag),
        }
    }
}

impl From<&str> for EnvelopeType {
    fn from(tag: &str) -> Self {
        Self::from(tag.to_owned())
    }
}

impl From<EnvelopeType> for String {
    fn from(kind: EnvelopeType) -> Self {
        match kind {
            EnvelopeType::Other(tag) => tag,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of wire traffic.
///
/// Fields are read-only after construction; the `with_*` builders consume the
/// envelope so a value handed to the transport can no longer change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    content: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<EnvelopeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    input_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
}

impl Envelope {
    /// A plain conversational turn.
    pub fn turn(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn typed(kind: EnvelopeType, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn tool_response(request_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: Some(EnvelopeType::ToolResponse),
            request_id: Some(request_id.into()),
            ..Self::default()
        }
    }

    /// Attach base64-encoded images. An empty list leaves the field absent.
    #[must_use]
    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = if images.is_empty() {
            None
        } else {
            Some(images)
        };
        self
    }

    #[must_use]
    pub fn with_input_mode(mut self, mode: impl Into<String>) -> Self {
        self.input_mode = Some(mode.into());
        self
    }

    #[must_use]
    pub fn with_sender_id(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn kind(&self) -> Option<&EnvelopeType> {
        self.kind.as_ref()
    }

    pub fn sender_id(&self) -> Option<&str> {
        self.sender_id.as_deref()
    }

    pub fn images(&self) -> &[String] {
        self.images.as_deref().unwrap_or_default()
    }

    pub fn input_mode(&self) -> Option<&str> {
        self.input_mode.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// `true` for `status` and `status_end` pulses.
    pub fn is_status(&self) -> bool {
        matches!(
            self.kind,
            Some(EnvelopeType::Status | EnvelopeType::StatusEnd)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tags_round_trip_through_string() {
        for tag in [
            "status",
            "status_end",
            "tool_request",
            "tool_response",
            "exit",
            "setup_required",
        ] {
            let kind = EnvelopeType::from(tag);
            assert!(!matches!(kind, EnvelopeType::Other(_)), "{tag}");
            assert_eq!(String::from(kind), tag);
        }
    }

    #[test]
    fn unknown_tag_is_preserved() {
        let kind = EnvelopeType::from("canvas");
        assert_eq!(kind, EnvelopeType::Other("canvas".into()));
        assert_eq!(kind.to_string(), "canvas");
    }

    #[test]
    fn empty_image_list_is_absent() {
        let env = Envelope::turn("hi").with_images(vec![]);
        assert!(env.images().is_empty());
        assert_eq!(env, Envelope::turn("hi"));
    }

    #[test]
    fn tool_response_carries_request_id() {
        let env = Envelope::tool_response("r1", "done");
        assert_eq!(env.kind(), Some(&EnvelopeType::ToolResponse));
        assert_eq!(env.request_id(), Some("r1"));
        assert_eq!(env.content(), "done");
    }

    #[test]
    fn status_detection() {
        assert!(Envelope::typed(EnvelopeType::Status, "x").is_status());
        assert!(Envelope::typed(EnvelopeType::StatusEnd, "").is_status());
        assert!(!Envelope::turn("x").is_status());
        assert!(!Envelope::typed(EnvelopeType::Exit, "").is_status());
    }
}
