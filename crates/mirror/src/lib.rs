//! Durable local mirror of the gateway conversation.
//!
//! Turns live in one SQLite table (`turns`); attached images are files under
//! the media directory, referenced from the turn by path and dimensions.

pub mod error;
pub mod media;
pub mod mirror;
pub mod store;
pub mod turn;

pub use {
    error::{Error, Result},
    media::{ImageAttachment, MediaStore},
    mirror::{DATABASE_FILE, LocalMirror, MEDIA_DIR},
    store::TurnStore,
    turn::{ImageData, Sender, Turn, TurnStatus, decode_images, encode_images},
};

/// Create the `turns` table and its index.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
