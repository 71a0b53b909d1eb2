use std::path::{Path, PathBuf};

use image::ImageFormat;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
pub const UPLOADS_DIR: &str = "uploads";

/// Extension for an accepted image, decided from the bytes rather than the
/// client's content type or filename.
fn sniff_extension(bytes: &[u8]) -> AppResult<&'static str> {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => Ok("png"),
        Ok(ImageFormat::Jpeg) => Ok("jpg"),
        Ok(ImageFormat::WebP) => Ok("webp"),
        Ok(ImageFormat::Gif) => Ok("gif"),
        _ => Err(AppError::validation("Unsupported image format. Use PNG, JPG, WebP or GIF.")),
    }
}

pub fn uploads_root(media_dir: &str) -> PathBuf {
    Path::new(media_dir).join(UPLOADS_DIR)
}

pub struct UploadService;

impl UploadService {
    /// Store an image under `media_dir/uploads` and return its public path.
    pub async fn store_image(media_dir: &str, bytes: &[u8]) -> AppResult<String> {
        if bytes.is_empty() {
            return Err(AppError::validation("No file provided"));
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(AppError::validation("File too large (max 5 MB)"));
        }
        let ext = sniff_extension(bytes)?;

        let dir = uploads_root(media_dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;

        let file_name = format!("{}.{ext}", Uuid::new_v4());
        tokio::fs::write(dir.join(&file_name), bytes)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;

        tracing::info!(file = %file_name, size = bytes.len(), "image uploaded");
        Ok(format!("/{UPLOADS_DIR}/{file_name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n', 0, 0, 0, 0];
    const JPEG_MAGIC: &[u8] = &[0xff, 0xd8, 0xff, 0xe0, 0, 0x10];

    #[test]
    fn sniffs_known_formats() {
        assert_eq!(sniff_extension(PNG_MAGIC).unwrap(), "png");
        assert_eq!(sniff_extension(JPEG_MAGIC).unwrap(), "jpg");
        assert!(matches!(sniff_extension(b"%PDF-1.7"), Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn stores_under_uploads_and_returns_public_path() {
        let media = std::env::temp_dir().join(format!("upload-test-{}", Uuid::new_v4()));
        let media_dir = media.to_string_lossy().to_string();

        let path = UploadService::store_image(&media_dir, PNG_MAGIC).await.unwrap();
        assert!(path.starts_with("/uploads/"));
        assert!(path.ends_with(".png"));

        let stored = media.join(path.trim_start_matches('/'));
        assert_eq!(tokio::fs::read(&stored).await.unwrap(), PNG_MAGIC);
        let _ = tokio::fs::remove_dir_all(&media).await;
    }

    #[tokio::test]
    async fn rejects_empty_and_non_image_payloads() {
        assert!(UploadService::store_image("/nonexistent", b"").await.is_err());
        assert!(UploadService::store_image("/nonexistent", b"plain text").await.is_err());
    }
}
