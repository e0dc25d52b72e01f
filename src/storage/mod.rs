//! Image object storage.
//!
//! Objects live under `{owner}/{id}-{filename}`; the owner prefix is the only
//! ownership record. Downloads go through short-lived signed URLs.

mod local;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

pub use local::LocalImageStore;
pub use memory::InMemoryImageStore;

type HmacSha256 = Hmac<Sha256>;

pub const MAX_IMAGE_SIZE: usize = 5 * 1024 * 1024; // 5MB
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("invalid image: {0}")]
    Invalid(String),

    #[error("image not found: {0}")]
    NotFound(String),

    #[error("image '{path}' does not belong to '{owner}'")]
    NotOwner { owner: String, path: String },

    #[error("download link is invalid or expired")]
    BadSignature,

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

pub type ImageResult<T> = Result<T, ImageError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub id: String,
    pub name: String,
    pub original_name: String,
    pub size: u64,
    pub content_type: String,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
    /// Signed download URL, refreshed whenever metadata is returned.
    #[serde(default)]
    pub url: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedImages {
    pub images: Vec<ImageMetadata>,
    pub total: usize,
    pub page_index: usize,
    pub page_size: usize,
    pub has_more: bool,
}

#[async_trait]
pub trait ImageStore: Send + Sync + 'static {
    /// Prepares the backing location; idempotent.
    async fn initialize(&self) -> ImageResult<()>;

    async fn upload(
        &self,
        owner: &str,
        filename: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> ImageResult<ImageMetadata>;

    /// Deletes an image owned by `owner`.
    async fn delete(&self, owner: &str, path: &str) -> ImageResult<()>;

    /// Deletes any image.
    async fn delete_as_admin(&self, path: &str) -> ImageResult<()>;

    /// Images of one owner, or of everyone when `owner` is `None`, newest first.
    async fn list(
        &self,
        owner: Option<&str>,
        page_index: usize,
        page_size: usize,
    ) -> ImageResult<PaginatedImages>;

    async fn presigned_url(&self, owner: &str, path: &str) -> ImageResult<String>;

    /// Raw bytes and content type, for serving signed downloads.
    async fn read(&self, path: &str) -> ImageResult<(Vec<u8>, String)>;
}

/// Detects the image type from its leading bytes.
pub fn detect_image_type(bytes: &[u8]) -> Option<&'static str> {
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
        // WebP: RIFF .... WEBP
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some("image/webp"),
        _ => None,
    }
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment.contains("..")
        && !segment.contains('/')
        && !segment.contains('\\')
        && !segment.contains('\0')
}

/// Checks an object path has the `{owner}/{name}` shape with safe segments.
pub fn validate_path(path: &str) -> ImageResult<()> {
    match path.split_once('/') {
        Some((owner, name)) if is_safe_segment(owner) && is_safe_segment(name) => Ok(()),
        _ => Err(ImageError::Invalid(format!("invalid image path '{path}'"))),
    }
}

pub fn ensure_owner(owner: &str, path: &str) -> ImageResult<()> {
    if path.starts_with(&format!("{owner}/")) {
        Ok(())
    } else {
        Err(ImageError::NotOwner {
            owner: owner.to_string(),
            path: path.to_string(),
        })
    }
}

/// Validates an upload and returns its detected content type.
pub(crate) fn validate_upload(owner: &str, filename: &str, data: &[u8]) -> ImageResult<&'static str> {
    if !is_safe_segment(owner) {
        return Err(ImageError::Invalid(format!("invalid owner '{owner}'")));
    }
    if !is_safe_segment(filename) {
        return Err(ImageError::Invalid("invalid filename".into()));
    }
    let extension = filename.rsplit('.').next().unwrap_or("").to_lowercase();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ImageError::Invalid(
            "unsupported file type, allowed: JPEG, PNG, WebP, GIF".into(),
        ));
    }
    if data.is_empty() {
        return Err(ImageError::Invalid("empty file".into()));
    }
    if data.len() > MAX_IMAGE_SIZE {
        return Err(ImageError::Invalid("file too large, maximum size is 5MB".into()));
    }
    detect_image_type(data).ok_or_else(|| {
        ImageError::Invalid("file content does not match an allowed image type".into())
    })
}

/// Fresh metadata for a validated upload. The URL is filled in by the caller.
pub(crate) fn new_metadata(owner: &str, filename: &str, size: usize, content_type: &str) -> ImageMetadata {
    let id = Uuid::new_v4().to_string();
    let name = format!("{id}-{filename}");
    ImageMetadata {
        path: format!("{owner}/{name}"),
        id,
        name,
        original_name: filename.to_string(),
        size: size as u64,
        content_type: content_type.to_string(),
        uploaded_by: owner.to_string(),
        uploaded_at: Utc::now(),
        url: String::new(),
    }
}

/// Sorts newest first and cuts one page.
pub(crate) fn paginate(
    mut images: Vec<ImageMetadata>,
    page_index: usize,
    page_size: usize,
) -> PaginatedImages {
    images.sort_by(|a, b| {
        b.uploaded_at
            .cmp(&a.uploaded_at)
            .then_with(|| a.path.cmp(&b.path))
    });
    let total = images.len();
    let page_size = page_size.max(1);
    let start = page_index.saturating_mul(page_size);
    let images = images.into_iter().skip(start).take(page_size).collect();
    PaginatedImages {
        images,
        total,
        page_index,
        page_size,
        has_more: start.saturating_add(page_size) < total,
    }
}

/// Issues and verifies signed download URLs of the form
/// `{base}/uploads/{path}?expires={unix}&signature={hex}`, where the
/// signature is HMAC-SHA256 over `{path}:{expires}`.
#[derive(Clone)]
pub struct UrlSigner {
    mac: HmacSha256,
    base_url: String,
    ttl: chrono::Duration,
}

impl UrlSigner {
    pub fn new(
        secret: impl AsRef<[u8]>,
        base_url: impl Into<String>,
        ttl: chrono::Duration,
    ) -> ImageResult<Self> {
        let mac = HmacSha256::new_from_slice(secret.as_ref())
            .map_err(|_| ImageError::Invalid("URL signing key rejected".into()))?;
        Ok(Self {
            mac,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ttl,
        })
    }

    fn keyed(&self, path: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(format!("{path}:{expires}").as_bytes());
        mac
    }

    pub fn presign(&self, path: &str) -> String {
        let expires = (Utc::now() + self.ttl).timestamp();
        let signature = hex::encode(self.keyed(path, expires).finalize().into_bytes());
        format!(
            "{}/uploads/{path}?expires={expires}&signature={signature}",
            self.base_url
        )
    }

    /// Rejects expired links and signatures that do not match, comparing in
    /// constant time.
    pub fn verify(&self, path: &str, expires: i64, signature: &str) -> ImageResult<()> {
        if expires < Utc::now().timestamp() {
            return Err(ImageError::BadSignature);
        }
        let signature = hex::decode(signature).map_err(|_| ImageError::BadSignature)?;
        self.keyed(path, expires)
            .verify_slice(&signature)
            .map_err(|_| ImageError::BadSignature)
    }
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("base_url", &self.base_url)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
