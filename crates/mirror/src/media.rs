//! Image files attached to outgoing turns.

use std::{fs, path::PathBuf};

use base64::{Engine, engine::general_purpose::STANDARD};

use crate::{Result, turn::ImageData};

/// Raw image handed to [`crate::LocalMirror::send_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// File extension without the dot, e.g. `jpg`.
    pub extension: String,
}

impl ImageAttachment {
    pub fn jpeg(bytes: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            bytes,
            width,
            height,
            extension: "jpg".into(),
        }
    }

    /// Wire form carried in the envelope's `images` list.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

/// Directory of saved attachments.
#[derive(Debug, Clone)]
pub struct MediaStore {
    dir: PathBuf,
}

impl MediaStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write the attachment under a fresh name and describe where it went.
    pub async fn save(&self, attachment: &ImageAttachment) -> Result<ImageData> {
        let extension = sanitize_extension(&attachment.extension);
        let path = self
            .dir
            .join(format!("{}.{extension}", uuid::Uuid::new_v4()));
        let dir = self.dir.clone();
        let file_path = path.clone();
        let data = attachment.bytes.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            fs::create_dir_all(&dir)?;
            fs::write(&file_path, &data)?;
            Ok(())
        })
        .await??;

        Ok(ImageData {
            path: path.display().to_string(),
            width: attachment.width,
            height: attachment.height,
        })
    }
}

fn sanitize_extension(ext: &str) -> String {
    let clean: String = ext
        .trim_start_matches('.')
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase();
    if clean.is_empty() {
        "bin".into()
    } else {
        clean
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_writes_file_and_records_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let media = MediaStore::new(dir.path().join("media"));
        let attachment = ImageAttachment::jpeg(vec![0xFF, 0xD8, 0xFF], 640, 480);

        let saved = media.save(&attachment).await.unwrap();
        assert_eq!((saved.width, saved.height), (640, 480));
        assert!(saved.path.ends_with(".jpg"));
        assert_eq!(fs::read(&saved.path).unwrap(), vec![0xFF, 0xD8, 0xFF]);
    }

    #[tokio::test]
    async fn each_save_gets_its_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let media = MediaStore::new(dir.path());
        let attachment = ImageAttachment::jpeg(vec![1], 1, 1);
        let a = media.save(&attachment).await.unwrap();
        let b = media.save(&attachment).await.unwrap();
        assert_ne!(a.path, b.path);
    }

    #[test]
    fn base64_encoding() {
        assert_eq!(ImageAttachment::jpeg(b"hi".to_vec(), 1, 1).to_base64(), "aGk=");
    }

    #[test]
    fn extension_is_sanitized() {
        assert_eq!(sanitize_extension(".PNG"), "png");
        assert_eq!(sanitize_extension("../x"), "x");
        assert_eq!(sanitize_extension(""), "bin");
    }
}
