//! Object storage buckets with public URLs.
//!
//! Objects live under `{root}/{bucket}/{path}` on disk and are addressed by
//! `{public_base}/storage/v1/object/public/{bucket}/{path}`.

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use mshb_shared::constants::MAX_UPLOAD_SIZE;
use mshb_shared::types::Bucket;

use crate::error::{Result, StoreError};

const PUBLIC_PREFIX: &str = "/storage/v1/object/public/";

#[derive(Debug, Clone)]
pub struct BucketStore {
    root: PathBuf,
    public_base: String,
    max_size: usize,
}

impl BucketStore {
    pub async fn new(root: PathBuf, public_base: &str) -> Result<Self> {
        fs::create_dir_all(&root).await?;
        info!(path = %root.display(), "bucket store initialized");

        Ok(Self {
            root,
            public_base: public_base.trim_end_matches('/').to_string(),
            max_size: MAX_UPLOAD_SIZE,
        })
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write an object, replacing any previous one at the same path.
    /// Returns its public URL.
    pub async fn upload(&self, bucket: Bucket, path: &str, data: &[u8]) -> Result<String> {
        if data.is_empty() {
            return Err(StoreError::Invalid("empty upload".into()));
        }
        if data.len() > self.max_size {
            return Err(StoreError::TooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let file = self.object_path(bucket, path)?;
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&file, data).await?;

        debug!(bucket = %bucket, path, size = data.len(), "stored object");
        Ok(self.public_url(bucket, path))
    }

    pub async fn download(&self, bucket: Bucket, path: &str) -> Result<Vec<u8>> {
        let file = self.object_path(bucket, path)?;
        match fs::read(&file).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn remove(&self, bucket: Bucket, path: &str) -> Result<()> {
        let file = self.object_path(bucket, path)?;
        match fs::remove_file(&file).await {
            Ok(()) => {
                debug!(bucket = %bucket, path, "removed object");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    pub fn public_url(&self, bucket: Bucket, path: &str) -> String {
        format!("{}{PUBLIC_PREFIX}{}/{}", self.public_base, bucket, path.trim_start_matches('/'))
    }

    /// Reverse of [`public_url`](Self::public_url) for URLs issued by this store.
    pub fn parse_public_url(&self, url: &str) -> Option<(Bucket, String)> {
        let rest = url.strip_prefix(&self.public_base)?.strip_prefix(PUBLIC_PREFIX)?;
        let (bucket, path) = rest.split_once('/')?;
        Some((bucket.parse().ok()?, path.to_string()))
    }

    fn object_path(&self, bucket: Bucket, path: &str) -> Result<PathBuf> {
        if path.is_empty() || path.contains('\\') || Path::new(path).is_absolute() {
            return Err(StoreError::Invalid(format!("invalid object path: {path:?}")));
        }

        let mut resolved = self.root.join(bucket.as_str());
        for component in Path::new(path).components() {
            match component {
                Component::Normal(c) => resolved.push(c),
                _ => return Err(StoreError::Invalid("path traversal detected".into())),
            }
        }
        Ok(resolved)
    }
}

/// Object key for a user upload: `{owner}/{hash}-{file name}`.
///
/// The content hash keeps two uploads of the same name apart; the name is
/// reduced to characters safe in a URL path.
pub fn object_key(owner: &str, file_name: &str, data: &[u8]) -> String {
    let hash = blake3::hash(data).to_hex();
    let safe: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe = safe.trim_start_matches('.');
    let safe = if safe.is_empty() { "file" } else { safe };
    format!("{owner}/{}-{safe}", &hash.as_str()[..16])
}

/// Best-effort MIME type from the file extension.
pub fn guess_mime(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}
