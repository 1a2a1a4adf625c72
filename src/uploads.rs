// Post images: checked against a small allow-list, stored under the uploads
// directory with a generated name, served back from /uploads.

use std::future::Future;
use std::path::{Path, PathBuf};

use axum::body::Bytes;

use crate::error::{AppError, AppResult};

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
pub const URL_PREFIX: &str = "/uploads/";
pub const IMAGE_TOO_LARGE: &str = "Image must be 5MB or smaller";

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];
const ALLOWED_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/gif"];

/// An image as it arrived in a multipart field.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl ImageUpload {
    /// Lowercased extension, if it is one we accept.
    fn extension(&self) -> Option<String> {
        let ext = Path::new(&self.file_name)
            .extension()?
            .to_str()?
            .to_ascii_lowercase();
        ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
    }

    /// The declared type, or a guess from the file name when none was sent.
    fn mime_type(&self) -> Option<String> {
        match self.content_type.as_deref() {
            Some(declared) if !declared.is_empty() => Some(declared.to_ascii_lowercase()),
            _ => mime_guess::from_path(&self.file_name)
                .first_raw()
                .map(str::to_string),
        }
    }
}

pub fn validate_image(upload: &ImageUpload) -> AppResult<String> {
    if upload.bytes.is_empty() {
        return Err(AppError::validation("Image file is empty"));
    }
    if upload.bytes.len() > MAX_IMAGE_BYTES {
        return Err(AppError::validation(IMAGE_TOO_LARGE));
    }

    let ext = upload.extension().ok_or_else(|| {
        AppError::validation("Image must be a jpg, jpeg, png, webp or gif file")
    })?;

    match upload.mime_type() {
        Some(mime) if ALLOWED_TYPES.contains(&mime.as_str()) => Ok(ext),
        _ => Err(AppError::validation(
            "Image must be a JPEG, PNG, WebP or GIF image",
        )),
    }
}

/// Validate and persist `upload`, returning its public URL.
pub async fn save_image(dir: &Path, upload: &ImageUpload) -> AppResult<String> {
    let ext = validate_image(upload)?;
    let file_name = format!("{}.{}", uuid::Uuid::now_v7(), ext);

    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(&file_name), &upload.bytes).await?;

    tracing::info!("Stored image {} ({} bytes)", file_name, upload.bytes.len());
    Ok(format!("{URL_PREFIX}{file_name}"))
}

/// Save `image` if there is one, then run `write` with its URL. When `write`
/// fails the freshly saved file is removed again.
pub async fn with_saved_image<T, F, Fut>(
    dir: &Path,
    image: Option<&ImageUpload>,
    write: F,
) -> AppResult<T>
where
    F: FnOnce(Option<String>) -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let url = match image {
        Some(image) => Some(save_image(dir, image).await?),
        None => None,
    };

    match write(url.clone()).await {
        Ok(value) => Ok(value),
        Err(err) => {
            if let Some(url) = url {
                remove_images(dir, &[url]).await;
            }
            Err(err)
        }
    }
}

/// Map an image URL back to its file, refusing anything outside `dir`.
fn local_path(dir: &Path, url: &str) -> Option<PathBuf> {
    let name = url.strip_prefix(URL_PREFIX)?;
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
        return None;
    }
    Some(dir.join(name))
}

/// Best effort: a missing file is not an error.
pub async fn remove_images(dir: &Path, urls: &[String]) {
    for url in urls {
        let Some(path) = local_path(dir, url) else {
            continue;
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!("Removed image {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove image {}: {}", path.display(), e),
        }
    }
}
