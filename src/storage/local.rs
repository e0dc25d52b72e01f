use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;

use super::{
    ensure_owner, new_metadata, paginate, validate_path, validate_upload, ImageError,
    ImageMetadata, ImageResult, ImageStore, PaginatedImages, UrlSigner,
};

const METADATA_SUFFIX: &str = ".meta.json";

/// Stores images on the local filesystem, one directory per owner, with a
/// JSON metadata file next to every image.
#[derive(Debug)]
pub struct LocalImageStore {
    root: PathBuf,
    signer: UrlSigner,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            root: root.into(),
            signer,
        }
    }

    fn metadata_path(&self, path: &str) -> PathBuf {
        self.root.join(format!("{path}{METADATA_SUFFIX}"))
    }

    async fn read_metadata(&self, path: &str) -> ImageResult<ImageMetadata> {
        let raw = match tokio::fs::read(self.metadata_path(path)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ImageError::NotFound(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut metadata: ImageMetadata = serde_json::from_slice(&raw)?;
        metadata.url = self.signer.presign(&metadata.path);
        Ok(metadata)
    }

    async fn owner_dirs(&self, owner: Option<&str>) -> ImageResult<Vec<PathBuf>> {
        if let Some(owner) = owner {
            return Ok(vec![self.root.join(owner)]);
        }
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn initialize(&self) -> ImageResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tracing::info!(root = %self.root.display(), "image directory ready");
        Ok(())
    }

    async fn upload(
        &self,
        owner: &str,
        filename: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> ImageResult<ImageMetadata> {
        let detected = validate_upload(owner, filename, &data)?;
        if content_type != detected {
            tracing::debug!(declared = content_type, detected, "content type overridden");
        }

        let mut metadata = new_metadata(owner, filename, data.len(), detected);
        tokio::fs::create_dir_all(self.root.join(owner)).await?;
        tokio::fs::write(self.root.join(&metadata.path), &data).await?;
        tokio::fs::write(
            self.metadata_path(&metadata.path),
            serde_json::to_vec(&metadata)?,
        )
        .await?;

        metadata.url = self.signer.presign(&metadata.path);
        tracing::info!(path = %metadata.path, size = metadata.size, "image uploaded");
        Ok(metadata)
    }

    async fn delete(&self, owner: &str, path: &str) -> ImageResult<()> {
        validate_path(path)?;
        ensure_owner(owner, path)?;
        self.delete_as_admin(path).await
    }

    async fn delete_as_admin(&self, path: &str) -> ImageResult<()> {
        validate_path(path)?;
        match tokio::fs::remove_file(self.root.join(path)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ImageError::NotFound(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        match tokio::fs::remove_file(self.metadata_path(path)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(path, "image had no metadata file");
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(path, "image deleted");
        Ok(())
    }

    async fn list(
        &self,
        owner: Option<&str>,
        page_index: usize,
        page_size: usize,
    ) -> ImageResult<PaginatedImages> {
        let mut images = Vec::new();
        for dir in self.owner_dirs(owner).await? {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.ends_with(METADATA_SUFFIX) {
                    continue;
                }
                let raw = tokio::fs::read(entry.path()).await?;
                match serde_json::from_slice::<ImageMetadata>(&raw) {
                    Ok(mut metadata) => {
                        metadata.url = self.signer.presign(&metadata.path);
                        images.push(metadata);
                    }
                    Err(e) => tracing::warn!(file = %name, error = %e, "skipping unreadable image metadata"),
                }
            }
        }
        Ok(paginate(images, page_index, page_size))
    }

    async fn presigned_url(&self, owner: &str, path: &str) -> ImageResult<String> {
        validate_path(path)?;
        ensure_owner(owner, path)?;
        Ok(self.read_metadata(path).await?.url)
    }

    async fn read(&self, path: &str) -> ImageResult<(Vec<u8>, String)> {
        validate_path(path)?;
        let metadata = self.read_metadata(path).await?;
        let data = match tokio::fs::read(self.root.join(path)).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ImageError::NotFound(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok((data, metadata.content_type))
    }
}
