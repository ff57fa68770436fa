use serde::{Deserialize, Deserializer, Serialize};

use crate::{Envelope, Error, Result};

/// Response text sent when no tool handler is installed.
pub const HANDLER_NOT_CONFIGURED: &str = "tool request handler not configured";

/// Payload of a `tool_request` envelope's `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    #[serde(default)]
    pub request_id: String,
    pub action: String,
    /// Arguments for `action`. A value that is not an object is dropped
    /// rather than failing the request.
    #[serde(
        default,
        deserialize_with = "lenient_params",
        skip_serializing_if = "Option::is_none"
    )]
    pub params: Option<serde_json::Map<String, serde_json::Value>>,
}

fn lenient_params<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<serde_json::Map<String, serde_json::Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_object().cloned()))
}

impl ToolRequest {
    /// Extract the tool call from a `tool_request` envelope.
    ///
    /// The request id comes from the payload, falling back to the envelope's
    /// own `request_id`. A payload that cannot be parsed still reports the id
    /// it was sent under so the caller can answer it.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let fallback_id = envelope.request_id().filter(|id| !id.is_empty());
        match serde_json::from_str::<ToolRequest>(envelope.content()) {
            Ok(mut request) => {
                if request.request_id.is_empty() {
                    request.request_id = fallback_id.ok_or(Error::MissingRequestId)?.to_owned();
                }
                Ok(request)
            },
            Err(e) => {
                let request_id = peek_request_id(envelope.content())
                    .or_else(|| fallback_id.map(str::to_owned))
                    .ok_or(Error::MissingRequestId)?;
                Err(Error::MalformedToolRequest {
                    request_id,
                    message: e.to_string(),
                })
            },
        }
    }

    /// Look up a parameter by name.
    pub fn param(&self, name: &str) -> Option<&serde_json::Value> {
        self.params.as_ref().and_then(|p| p.get(name))
    }
}

/// Best-effort read of `request_id` from a payload that failed full parsing.
fn peek_request_id(content: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(content).ok()?;
    value
        .get("request_id")
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
}
