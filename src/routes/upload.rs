use std::path::PathBuf;
use uuid::Uuid;

use crate::routes::error::ApiError;

/// Content store root; served statically under the same name.
pub const UPLOAD_DIR: &str = "uploads";
const MAX_FILE_SIZE: usize = 5 * 1024 * 1024; // 5MB
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

fn validate_image_magic_bytes(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() < 4 {
        return None;
    }
    match bytes {
        // JPEG: FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        // PNG: 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => Some("image/png"),
        // GIF: 47 49 46 38
        [0x47, 0x49, 0x46, 0x38, ..] => Some("image/gif"),
        // WebP: 52 49 46 46 ... 57 45 42 50
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some("image/webp"),
        _ => None,
    }
}

fn get_extension_from_mime(mime: &str) -> &str {
    match mime {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

/// Validate an uploaded image and write it into the content store under a
/// generated unique name. Returns the relative path stored on the blog
/// document.
pub async fn save_image(original_name: &str, bytes: &[u8]) -> Result<String, ApiError> {
    let original_ext = original_name
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_lowercase();

    if !ALLOWED_EXTENSIONS.contains(&original_ext.as_str()) {
        return Err(ApiError::Validation(
            "Unsupported file type. Allowed: JPEG, PNG, WebP, GIF.".to_string(),
        ));
    }

    if bytes.is_empty() {
        return Err(ApiError::Validation("Empty file".to_string()));
    }

    if bytes.len() > MAX_FILE_SIZE {
        return Err(ApiError::Validation(
            "File too large. Maximum size is 5MB.".to_string(),
        ));
    }

    let mime_type = validate_image_magic_bytes(bytes).ok_or_else(|| {
        ApiError::Validation("File content does not match an allowed image type.".to_string())
    })?;

    let upload_path = PathBuf::from(UPLOAD_DIR);
    tokio::fs::create_dir_all(&upload_path).await.map_err(|e| {
        tracing::error!("Failed to create upload directory: {}", e);
        ApiError::Internal("Failed to initialize upload directory".to_string())
    })?;

    let ext = get_extension_from_mime(mime_type);
    let filename = format!("{}.{}", Uuid::new_v4(), ext);
    let file_path = upload_path.join(&filename);

    tokio::fs::write(&file_path, bytes).await.map_err(|e| {
        tracing::error!("Failed to write upload file: {}", e);
        ApiError::Internal("Failed to save file".to_string())
    })?;

    tracing::info!("Image uploaded: {} ({} bytes)", filename, bytes.len());

    Ok(format!("{}/{}", UPLOAD_DIR, filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_bytes_detects_known_formats() {
        assert_eq!(
            validate_image_magic_bytes(&[0xFF, 0xD8, 0xFF, 0xE0]),
            Some("image/jpeg")
        );
        assert_eq!(
            validate_image_magic_bytes(&[0x89, 0x50, 0x4E, 0x47, 0x0D]),
            Some("image/png")
        );
        assert_eq!(
            validate_image_magic_bytes(&[0x47, 0x49, 0x46, 0x38, 0x39]),
            Some("image/gif")
        );
        assert_eq!(
            validate_image_magic_bytes(&[
                0x52, 0x49, 0x46, 0x46, 0x00, 0x00, 0x00, 0x00, 0x57, 0x45, 0x42, 0x50
            ]),
            Some("image/webp")
        );
    }

    #[test]
    fn test_magic_bytes_rejects_unknown_content() {
        assert_eq!(validate_image_magic_bytes(b"not an image"), None);
        assert_eq!(validate_image_magic_bytes(&[0xFF]), None);
    }

    #[test]
    fn test_extension_from_mime() {
        assert_eq!(get_extension_from_mime("image/jpeg"), "jpg");
        assert_eq!(get_extension_from_mime("image/webp"), "webp");
        assert_eq!(get_extension_from_mime("text/plain"), "bin");
    }

    #[tokio::test]
    async fn test_save_image_rejects_bad_extension() {
        let result = save_image("malware.exe", &[0xFF, 0xD8, 0xFF, 0xE0]).await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn test_save_image_rejects_mismatched_content() {
        let result = save_image("photo.png", b"plain text pretending").await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn test_save_image_rejects_empty_file() {
        let result = save_image("photo.png", &[]).await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }
}
