//! Text-frame codec for [`Envelope`]s.

use crate::{Envelope, Error, MAX_FRAME_BYTES, Result};

/// Serialize an envelope into one JSON text frame.
pub fn encode(envelope: &Envelope) -> Result<String> {
    let text = serde_json::to_string(envelope)?;
    if text.len() > MAX_FRAME_BYTES {
        return Err(Error::FrameTooLarge {
            size: text.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    Ok(text)
}

/// Parse one inbound text frame. Unknown fields are ignored.
pub fn decode(frame: &str) -> Result<Envelope> {
    if frame.len() > MAX_FRAME_BYTES {
        return Err(Error::FrameTooLarge {
            size: frame.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    Ok(serde_json::from_str(frame)?)
}
