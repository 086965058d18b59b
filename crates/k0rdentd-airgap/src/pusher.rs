//! Batch image push into the local registry

use crate::error::{AirgapError, Result};
use crate::image::ImageReference;
use crate::tools::find_executable;
use async_trait::async_trait;
use k0rdentd_runtime::run_command;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;

/// Pushes allowed in flight at once unless configured otherwise
pub const DEFAULT_PUSH_CONCURRENCY: usize = 5;

/// Copies one OCI image archive to a registry reference
#[async_trait]
pub trait ImageCopier: Send + Sync {
    /// `destination` is `<registry>/<repository>:<tag>`
    async fn copy(&self, archive: &Path, destination: &str) -> Result<()>;
}

/// [`ImageCopier`] backed by `skopeo copy`
#[derive(Debug, Clone)]
pub struct SkopeoCopier {
    binary: PathBuf,
}

impl SkopeoCopier {
    /// Find skopeo on PATH
    pub fn locate() -> Result<Self> {
        find_executable("skopeo")
            .map(Self::with_binary)
            .ok_or_else(|| AirgapError::ToolNotFound("skopeo".to_string()))
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl ImageCopier for SkopeoCopier {
    async fn copy(&self, archive: &Path, destination: &str) -> Result<()> {
        let source = format!("oci-archive:{}", archive.display());
        let target = format!("docker://{}", destination);
        run_command(
            &self.binary.to_string_lossy(),
            &[
                "copy",
                "--insecure-policy",
                "--dest-tls-verify=false",
                &source,
                &target,
            ],
        )
        .await
        .map_err(|e| AirgapError::Push {
            image: destination.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

/// Result of a fully successful batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSummary {
    pub pushed: usize,
}

/// Pushes a bundle's image archives with bounded concurrency
///
/// A failed push never stops the others; failures are counted and
/// reported once every push has finished.
pub struct ImagePusher {
    copier: Arc<dyn ImageCopier>,
    registry: String,
    concurrency: usize,
}

impl ImagePusher {
    pub fn new(copier: Arc<dyn ImageCopier>, registry: impl Into<String>) -> Self {
        Self {
            copier,
            registry: registry.into(),
            concurrency: DEFAULT_PUSH_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Push every archive in `archives`, each relative to bundle `root`
    pub async fn push_all(&self, root: &Path, archives: &[PathBuf]) -> Result<PushSummary> {
        let total = archives.len();
        if total == 0 {
            tracing::warn!("No image archives found in {}", root.display());
            return Ok(PushSummary { pushed: 0 });
        }

        tracing::info!(
            "Pushing {} images to {} ({} at a time)",
            total,
            self.registry,
            self.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (tx, mut rx) = mpsc::channel::<(String, Result<()>)>(total);
        let mut tasks = JoinSet::new();

        for (index, archive) in archives.iter().enumerate() {
            let image = match ImageReference::from_archive(root, archive) {
                Ok(image) => image,
                Err(e) => {
                    if tx.send((archive.display().to_string(), Err(e))).await.is_err() {
                        tracing::debug!("Push result for {} dropped", archive.display());
                    }
                    continue;
                }
            };

            let copier = self.copier.clone();
            let semaphore = semaphore.clone();
            let tx = tx.clone();
            let archive = archive.clone();
            let destination = format!("{}/{}", self.registry, image);
            let relative = archive
                .strip_prefix(root)
                .unwrap_or(&archive)
                .display()
                .to_string();

            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        tracing::info!("[{}/{}] Pushing: {}", index + 1, total, relative);
                        copier.copy(&archive, &destination).await
                    }
                    Err(e) => Err(AirgapError::Push {
                        image: destination.clone(),
                        reason: e.to_string(),
                    }),
                };
                if let Err(unsent) = tx.send((destination, result)).await {
                    tracing::debug!("Push result for {} dropped", unsent.0.0);
                }
            });
        }
        drop(tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("Push task aborted: {}", e);
            }
        }

        let mut pushed = 0;
        while let Some((image, result)) = rx.recv().await {
            match result {
                Ok(()) => {
                    tracing::debug!("Pushed {}", image);
                    pushed += 1;
                }
                Err(e) => tracing::warn!("Failed to push {}: {}", image, e),
            }
        }

        let failed = total - pushed;
        if failed > 0 {
            return Err(AirgapError::PushFailed { failed, total });
        }

        tracing::info!("Pushed {} images", pushed);
        Ok(PushSummary { pushed })
    }
}
