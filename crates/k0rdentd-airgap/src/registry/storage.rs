//! Disk-backed, content-addressed registry storage
//!
//! ```text
//! <root>/blobs/sha256/<hex>                          blob and manifest content
//! <root>/uploads/<uuid>                              in-progress blob uploads
//! <root>/repositories/<repo>/_manifests/sha256/<hex>  manifest media type
//! <root>/repositories/<repo>/_tags/<tag>              digest the tag points at
//! ```
//!
//! Everything is addressed by path, so a restarted registry serves what
//! earlier runs stored.

use axum::body::Bytes;
use futures_util::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const SHA256_PREFIX: &str = "sha256:";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("invalid repository name: {0}")]
    InvalidName(String),

    #[error("invalid tag: {0}")]
    InvalidTag(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("unknown upload: {0}")]
    UploadUnknown(String),

    #[error("upload stream error: {0}")]
    Stream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A stored manifest
#[derive(Debug, Clone)]
pub struct StoredManifest {
    pub digest: String,
    pub media_type: String,
    pub content: Bytes,
}

/// `sha256:<hex>` of `data`
pub fn digest_of(data: &[u8]) -> String {
    format!("{}{:x}", SHA256_PREFIX, Sha256::digest(data))
}

/// Hex part of a well-formed sha256 digest
fn digest_hex(digest: &str) -> StoreResult<&str> {
    let hex = digest
        .strip_prefix(SHA256_PREFIX)
        .ok_or_else(|| StoreError::InvalidDigest(digest.to_string()))?;
    if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return Err(StoreError::InvalidDigest(digest.to_string()));
    }
    Ok(hex)
}

/// Repository names are lowercase path components of `[a-z0-9._-]`
fn validate_name(name: &str) -> StoreResult<()> {
    let valid = !name.is_empty()
        && name.split('/').all(|part| {
            !part.is_empty()
                && part != "."
                && part != ".."
                && !part.starts_with('_')
                && part
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b"._-".contains(&b))
        });
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

fn validate_tag(tag: &str) -> StoreResult<()> {
    let valid = !tag.is_empty()
        && tag.len() <= 128
        && !tag.starts_with(['.', '-'])
        && tag
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"._-".contains(&b));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidTag(tag.to_string()))
    }
}

pub fn is_digest(reference: &str) -> bool {
    reference.starts_with(SHA256_PREFIX)
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open the store at `root`, creating its layout if missing
    ///
    /// Upload sessions do not survive a restart, so leftovers are removed.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("blobs").join("sha256")).await?;
        let uploads = root.join("uploads");
        match fs::remove_dir_all(&uploads).await {
            Ok(()) => tracing::debug!("Cleared abandoned uploads in {}", uploads.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&uploads).await?;
        fs::create_dir_all(root.join("repositories")).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blob_path(&self, digest: &str) -> StoreResult<PathBuf> {
        Ok(self.root.join("blobs").join("sha256").join(digest_hex(digest)?))
    }

    /// Size of a stored blob, `None` when absent
    pub async fn blob_size(&self, digest: &str) -> StoreResult<Option<u64>> {
        match fs::metadata(self.blob_path(digest)?).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn upload_path(&self, id: &str) -> StoreResult<PathBuf> {
        uuid::Uuid::parse_str(id).map_err(|_| StoreError::UploadUnknown(id.to_string()))?;
        Ok(self.root.join("uploads").join(id))
    }

    fn repository_dir(&self, name: &str) -> StoreResult<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join("repositories").join(name))
    }

    pub async fn start_upload(&self) -> StoreResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        fs::File::create(self.upload_path(&id)?).await?;
        Ok(id)
    }

    /// Current size of an upload
    pub async fn upload_size(&self, id: &str) -> StoreResult<u64> {
        match fs::metadata(self.upload_path(id)?).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::UploadUnknown(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Append a chunk stream to an upload, returning the new size
    pub async fn append_upload<S, E>(&self, id: &str, mut chunks: S) -> StoreResult<u64>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let path = self.upload_path(id)?;
        let mut file = match fs::OpenOptions::new().append(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::UploadUnknown(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| StoreError::Stream(e.to_string()))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(fs::metadata(&path).await?.len())
    }

    /// Verify an upload against `digest` and move it into the blob store
    pub async fn finish_upload(&self, id: &str, digest: &str) -> StoreResult<()> {
        let target = self.blob_path(digest)?;
        let path = self.upload_path(id)?;

        let actual = match hash_file(&path).await {
            Ok(actual) => actual,
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::UploadUnknown(id.to_string()));
            }
            Err(e) => return Err(e),
        };
        if actual != digest {
            fs::remove_file(&path).await?;
            return Err(StoreError::DigestMismatch {
                expected: digest.to_string(),
                actual,
            });
        }

        fs::rename(&path, &target).await?;
        tracing::debug!("Stored blob {}", digest);
        Ok(())
    }

    pub async fn cancel_upload(&self, id: &str) -> StoreResult<()> {
        match fs::remove_file(self.upload_path(id)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::UploadUnknown(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Store a manifest under `reference` (a tag or its own digest)
    pub async fn put_manifest(
        &self,
        name: &str,
        reference: &str,
        media_type: &str,
        content: Bytes,
    ) -> StoreResult<String> {
        let repository = self.repository_dir(name)?;
        let digest = digest_of(&content);

        if is_digest(reference) && reference != digest {
            return Err(StoreError::DigestMismatch {
                expected: reference.to_string(),
                actual: digest,
            });
        }
        if !is_digest(reference) {
            validate_tag(reference)?;
        }

        let blob = self.blob_path(&digest)?;
        write_atomic(&blob, &content).await?;

        let manifests = repository.join("_manifests").join("sha256");
        fs::create_dir_all(&manifests).await?;
        write_atomic(&manifests.join(digest_hex(&digest)?), media_type.as_bytes()).await?;

        if !is_digest(reference) {
            let tags = repository.join("_tags");
            fs::create_dir_all(&tags).await?;
            write_atomic(&tags.join(reference), digest.as_bytes()).await?;
        }

        tracing::debug!("Stored manifest {}:{} ({})", name, reference, digest);
        Ok(digest)
    }

    /// Resolve a tag or digest to the stored manifest
    pub async fn get_manifest(
        &self,
        name: &str,
        reference: &str,
    ) -> StoreResult<Option<StoredManifest>> {
        let repository = self.repository_dir(name)?;

        let digest = if is_digest(reference) {
            reference.to_string()
        } else {
            validate_tag(reference)?;
            match read_optional(&repository.join("_tags").join(reference)).await? {
                Some(digest) => String::from_utf8_lossy(&digest).trim().to_string(),
                None => return Ok(None),
            }
        };

        let media_type = repository
            .join("_manifests")
            .join("sha256")
            .join(digest_hex(&digest)?);
        let Some(media_type) = read_optional(&media_type).await? else {
            return Ok(None);
        };
        let Some(content) = read_optional(&self.blob_path(&digest)?).await? else {
            return Ok(None);
        };

        Ok(Some(StoredManifest {
            digest,
            media_type: String::from_utf8_lossy(&media_type).into_owned(),
            content: Bytes::from(content),
        }))
    }

    /// Tags of a repository, sorted; `None` for an unknown repository
    pub async fn tags(&self, name: &str) -> StoreResult<Option<Vec<String>>> {
        let repository = self.repository_dir(name)?;
        if fs::metadata(&repository).await.is_err() {
            return Ok(None);
        }

        let mut tags = Vec::new();
        let mut entries = match fs::read_dir(repository.join("_tags")).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Some(tags)),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let tag = entry.file_name().to_string_lossy().into_owned();
            if !tag.starts_with('.') {
                tags.push(tag);
            }
        }
        tags.sort();
        Ok(Some(tags))
    }
}

async fn hash_file(path: &Path) -> StoreResult<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{}{:x}", SHA256_PREFIX, hasher.finalize()))
}

async fn read_optional(path: &Path) -> StoreResult<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write to a dot-prefixed sibling, then rename over `path`
async fn write_atomic(path: &Path, data: &[u8]) -> StoreResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{}", file_name, uuid::Uuid::new_v4()));
    fs::write(&tmp, data).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tempfile::tempdir;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_reopen_discards_abandoned_uploads() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path()).await.unwrap();
        let id = store.start_upload().await.unwrap();
        store.append_upload(&id, chunks(&[b"partial"])).await.unwrap();

        let digest = digest_of(b"kept");
        let kept = store.start_upload().await.unwrap();
        store.append_upload(&kept, chunks(&[b"kept"])).await.unwrap();
        store.finish_upload(&kept, &digest).await.unwrap();

        let store = BlobStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.upload_size(&id).await,
            Err(StoreError::UploadUnknown(_))
        ));
        assert_eq!(std::fs::read_dir(dir.path().join("uploads")).unwrap().count(), 0);
        assert_eq!(store.blob_size(&digest).await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_chunked_upload_is_verified() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path()).await.unwrap();

        let id = store.start_upload().await.unwrap();
        assert_eq!(store.append_upload(&id, chunks(&[b"hello "])).await.unwrap(), 6);
        assert_eq!(store.append_upload(&id, chunks(&[b"world"])).await.unwrap(), 11);

        let digest = digest_of(b"hello world");
        store.finish_upload(&id, &digest).await.unwrap();
        assert_eq!(store.blob_size(&digest).await.unwrap(), Some(11));
        assert!(matches!(
            store.upload_size(&id).await,
            Err(StoreError::UploadUnknown(_))
        ));
    }

    #[tokio::test]
    async fn test_digest_mismatch_discards_upload() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path()).await.unwrap();

        let id = store.start_upload().await.unwrap();
        store.append_upload(&id, chunks(&[b"abc"])).await.unwrap();

        let wrong = digest_of(b"xyz");
        let err = store.finish_upload(&id, &wrong).await.unwrap_err();
        assert!(matches!(err, StoreError::DigestMismatch { .. }));
        assert_eq!(store.blob_size(&wrong).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_manifest_by_tag_and_digest_survives_reopen() {
        let dir = tempdir().unwrap();
        let content = Bytes::from_static(br#"{"schemaVersion":2}"#);
        let media_type = "application/vnd.oci.image.manifest.v1+json";

        let digest = {
            let store = BlobStore::open(dir.path()).await.unwrap();
            store
                .put_manifest("k0sproject/k0s", "v1.32.8", media_type, content.clone())
                .await
                .unwrap()
        };

        let store = BlobStore::open(dir.path()).await.unwrap();
        let by_tag = store
            .get_manifest("k0sproject/k0s", "v1.32.8")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_tag.digest, digest);
        assert_eq!(by_tag.media_type, media_type);
        assert_eq!(by_tag.content, content);

        let by_digest = store.get_manifest("k0sproject/k0s", &digest).await.unwrap();
        assert!(by_digest.is_some());
        assert_eq!(
            store.tags("k0sproject/k0s").await.unwrap(),
            Some(vec!["v1.32.8".to_string()])
        );
        assert!(store.get_manifest("other/repo", "v1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_traversal_and_bad_digests() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path()).await.unwrap();

        assert!(matches!(
            store.tags("../etc").await,
            Err(StoreError::InvalidName(_))
        ));
        assert!(matches!(
            store.blob_size("sha256:../../passwd").await,
            Err(StoreError::InvalidDigest(_))
        ));
        assert!(matches!(
            store.upload_size("../x").await,
            Err(StoreError::UploadUnknown(_))
        ));
    }
}
