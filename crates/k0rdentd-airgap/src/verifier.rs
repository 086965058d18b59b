//! Bundle signature verification with cosign

use crate::error::{AirgapError, Result};
use crate::tools::find_executable;
use k0rdentd_runtime::run_command;
use std::path::{Path, PathBuf};

/// Public key the k0rdent enterprise bundles are signed with
pub const DEFAULT_COSIGN_KEY: &str = "https://get.mirantis.com/cosign.pub";

/// Detached signature expected next to the bundle
pub fn signature_path(bundle: &Path) -> PathBuf {
    let mut path = bundle.as_os_str().to_owned();
    path.push(".sig");
    PathBuf::from(path)
}

fn is_remote(key: &str) -> bool {
    key.starts_with("http://") || key.starts_with("https://")
}

/// Runs `cosign verify-blob` against a bundle and its `.sig` file
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    key: String,
    cosign: Option<PathBuf>,
}

impl SignatureVerifier {
    /// `key` is a local path or an http(s) URL
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            cosign: None,
        }
    }

    /// Use this cosign binary instead of looking it up on PATH
    pub fn with_cosign(mut self, cosign: impl Into<PathBuf>) -> Self {
        self.cosign = Some(cosign.into());
        self
    }

    pub async fn verify(&self, bundle: &Path) -> Result<()> {
        let signature = signature_path(bundle);
        if !signature.exists() {
            return Err(AirgapError::SignatureMissing(signature));
        }

        let cosign = match &self.cosign {
            Some(path) => path.clone(),
            None => find_executable("cosign")
                .ok_or_else(|| AirgapError::ToolNotFound("cosign".to_string()))?,
        };

        // Keeps a downloaded key alive until cosign has run
        let scratch = tempfile::Builder::new().prefix("k0rdentd-cosign-").tempdir()?;
        let key = if is_remote(&self.key) {
            download_key(&self.key, scratch.path()).await?
        } else {
            PathBuf::from(&self.key)
        };

        tracing::info!("Verifying signature of {}", bundle.display());
        run_command(
            &cosign.to_string_lossy(),
            &[
                "verify-blob",
                "--key",
                &key.to_string_lossy(),
                "--signature",
                &signature.to_string_lossy(),
                &bundle.to_string_lossy(),
            ],
        )
        .await
        .map_err(|e| AirgapError::VerificationFailed(e.to_string()))?;

        tracing::info!("Bundle signature verified");
        Ok(())
    }
}

/// Fetch a remote public key into `dest_dir/cosign.pub`
pub async fn download_key(url: &str, dest_dir: &Path) -> Result<PathBuf> {
    tracing::debug!("Downloading cosign key from {}", url);
    let key_error = |e: reqwest::Error| AirgapError::KeyDownload {
        url: url.to_string(),
        reason: e.to_string(),
    };

    let body = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(key_error)?
        .bytes()
        .await
        .map_err(key_error)?;

    let path = dest_dir.join("cosign.pub");
    tokio::fs::write(&path, &body).await?;
    Ok(path)
}
