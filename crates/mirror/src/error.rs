use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),

    #[error("turn {id} already exists")]
    DuplicateTurn { id: String },

    #[error("corrupt turn row {id}: {message}")]
    Corrupt { id: String, message: String },
}

impl Error {
    #[must_use]
    pub fn corrupt(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            id: id.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
