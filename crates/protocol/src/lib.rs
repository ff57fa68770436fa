//! Gateway session protocol definitions.
//!
//! All traffic is JSON text frames over a single WebSocket. Every frame is an
//! [`Envelope`]: a `content` payload plus an optional `type` tag. An absent
//! tag marks a plain conversational turn; the known tags are listed in
//! [`EnvelopeType`].
//!
//! Tool calls ride inside envelopes: a `tool_request` carries a JSON
//! [`ToolRequest`] in its `content`, and the client answers with a
//! `tool_response` envelope carrying the same `request_id`.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod tool;

pub use {
    codec::{decode, encode},
    envelope::{Envelope, EnvelopeType},
    error::{Error, Result},
    tool::{HANDLER_NOT_CONFIGURED, ToolRequest},
};

// ── Constants ────────────────────────────────────────────────────────────────

/// Input mode attached to turns produced by the voice assistant.
pub const INPUT_MODE_ASSISTANT: &str = "assistant";
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024; // 8 MB, images are inlined
