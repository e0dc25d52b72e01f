use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{
    ensure_owner, new_metadata, paginate, validate_path, validate_upload, ImageError,
    ImageMetadata, ImageResult, ImageStore, PaginatedImages, UrlSigner,
};

/// Keeps images in process memory; used by tests and `STORAGE_TYPE=memory`.
#[derive(Debug)]
pub struct InMemoryImageStore {
    objects: RwLock<HashMap<String, (ImageMetadata, Vec<u8>)>>,
    signer: UrlSigner,
}

impl InMemoryImageStore {
    pub fn new(signer: UrlSigner) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            signer,
        }
    }
}

#[async_trait]
impl ImageStore for InMemoryImageStore {
    async fn initialize(&self) -> ImageResult<()> {
        Ok(())
    }

    async fn upload(
        &self,
        owner: &str,
        filename: &str,
        data: Vec<u8>,
        _content_type: &str,
    ) -> ImageResult<ImageMetadata> {
        let detected = validate_upload(owner, filename, &data)?;
        let mut metadata = new_metadata(owner, filename, data.len(), detected);
        self.objects
            .write()
            .await
            .insert(metadata.path.clone(), (metadata.clone(), data));
        metadata.url = self.signer.presign(&metadata.path);
        Ok(metadata)
    }

    async fn delete(&self, owner: &str, path: &str) -> ImageResult<()> {
        validate_path(path)?;
        ensure_owner(owner, path)?;
        self.delete_as_admin(path).await
    }

    async fn delete_as_admin(&self, path: &str) -> ImageResult<()> {
        self.objects
            .write()
            .await
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| ImageError::NotFound(path.to_string()))
    }

    async fn list(
        &self,
        owner: Option<&str>,
        page_index: usize,
        page_size: usize,
    ) -> ImageResult<PaginatedImages> {
        let prefix = owner.map(|o| format!("{o}/"));
        let images = self
            .objects
            .read()
            .await
            .values()
            .filter(|(meta, _)| prefix.as_deref().map_or(true, |p| meta.path.starts_with(p)))
            .map(|(meta, _)| {
                let mut meta = meta.clone();
                meta.url = self.signer.presign(&meta.path);
                meta
            })
            .collect();
        Ok(paginate(images, page_index, page_size))
    }

    async fn presigned_url(&self, owner: &str, path: &str) -> ImageResult<String> {
        ensure_owner(owner, path)?;
        if !self.objects.read().await.contains_key(path) {
            return Err(ImageError::NotFound(path.to_string()));
        }
        Ok(self.signer.presign(path))
    }

    async fn read(&self, path: &str) -> ImageResult<(Vec<u8>, String)> {
        self.objects
            .read()
            .await
            .get(path)
            .map(|(meta, data)| (data.clone(), meta.content_type.clone()))
            .ok_or_else(|| ImageError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::{signer, PNG};

    #[tokio::test]
    async fn test_ownership_is_enforced() {
        let store = InMemoryImageStore::new(signer());
        let meta = store.upload("ann", "a.png", PNG.to_vec(), "image/png").await.unwrap();

        assert!(store.presigned_url("ann", &meta.path).await.is_ok());
        assert!(matches!(
            store.presigned_url("bob", &meta.path).await,
            Err(ImageError::NotOwner { .. })
        ));
        assert!(store.delete("bob", &meta.path).await.is_err());
        store.delete_as_admin(&meta.path).await.unwrap();
        assert!(matches!(store.read(&meta.path).await, Err(ImageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_filters_by_owner() {
        let store = InMemoryImageStore::new(signer());
        for owner in ["ann", "ann", "bob"] {
            store.upload(owner, "a.png", PNG.to_vec(), "image/png").await.unwrap();
        }
        assert_eq!(store.list(Some("ann"), 0, 10).await.unwrap().total, 2);
        let all = store.list(None, 0, 2).await.unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.images.len(), 2);
        assert!(all.has_more);
    }
}
