use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("tool request has no request id")]
    MissingRequestId,

    #[error("malformed tool request {request_id}: {message}")]
    MalformedToolRequest { request_id: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
