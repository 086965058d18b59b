//! Registry daemon: verify, serve, push, then run until cancelled

use crate::assets::{Asset, SKOPEO_INSTALL_PATH};
use crate::bundle::{find_image_archives, prepare_bundle};
use crate::error::{AirgapError, Result};
use crate::metadata::is_airgap;
use crate::pusher::{DEFAULT_PUSH_CONCURRENCY, ImageCopier, ImagePusher, SkopeoCopier};
use crate::registry::{BlobStore, router};
use crate::verifier::{DEFAULT_COSIGN_KEY, SignatureVerifier};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_REGISTRY_HOST: &str = "0.0.0.0";
pub const DEFAULT_REGISTRY_PORT: u16 = 5000;
pub const DEFAULT_STORAGE_DIR: &str = "/var/lib/k0rdentd/registry";
/// Budget for in-flight requests to finish after cancellation
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub bundle_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub storage_dir: PathBuf,
    pub verify_signature: bool,
    pub cosign_key: String,
    pub push_concurrency: usize,
}

impl DaemonOptions {
    pub fn new(bundle_path: impl Into<PathBuf>) -> Self {
        Self {
            bundle_path: bundle_path.into(),
            host: DEFAULT_REGISTRY_HOST.to_string(),
            port: DEFAULT_REGISTRY_PORT,
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            verify_signature: true,
            cosign_key: DEFAULT_COSIGN_KEY.to_string(),
            push_concurrency: DEFAULT_PUSH_CONCURRENCY,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub struct RegistryDaemon {
    options: DaemonOptions,
    copier: Option<Arc<dyn ImageCopier>>,
    verifier: Option<SignatureVerifier>,
}

impl RegistryDaemon {
    pub fn new(options: DaemonOptions) -> Self {
        Self {
            options,
            copier: None,
            verifier: None,
        }
    }

    /// Push with this copier instead of skopeo
    pub fn with_copier(mut self, copier: Arc<dyn ImageCopier>) -> Self {
        self.copier = Some(copier);
        self
    }

    /// Verify with this verifier instead of one built from the cosign key
    pub fn with_verifier(mut self, verifier: SignatureVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn options(&self) -> &DaemonOptions {
        &self.options
    }

    /// Serve the bundle's images until `cancel` fires
    ///
    /// Returns once the server has shut down; a push failure stops the
    /// server and is returned.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let options = &self.options;
        tracing::info!("Starting k0rdentd registry daemon");

        if is_airgap() {
            Asset::Skopeo.extract_to(Path::new(SKOPEO_INSTALL_PATH))?;
        }

        if options.verify_signature {
            let verifier = self
                .verifier
                .clone()
                .unwrap_or_else(|| SignatureVerifier::new(&options.cosign_key));
            verifier.verify(&options.bundle_path).await?;
        }

        if is_port_in_use(&options.host, options.port).await {
            return Err(AirgapError::PortInUse {
                host: options.host.clone(),
                port: options.port,
            });
        }

        tokio::fs::create_dir_all(&options.storage_dir).await?;
        let store = BlobStore::open(&options.storage_dir)
            .await
            .map_err(|e| AirgapError::Server(e.to_string()))?;

        let listener = TcpListener::bind((options.host.as_str(), options.port)).await?;
        let target = push_target(listener.local_addr()?);
        tracing::info!("Registry listening on {}", options.address());
        match storage_size(&options.storage_dir).await {
            Ok(size) => tracing::info!(
                "Registry storage: {} ({})",
                options.storage_dir.display(),
                format_bytes(size)
            ),
            Err(e) => tracing::debug!("Could not measure registry storage: {}", e),
        }

        let shutdown = cancel.child_token();
        let mut server = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                axum::serve(listener, router(Arc::new(store)))
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await
            }
        });

        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => Startup::Cancelled,
            joined = &mut server => Startup::ServerExited(joined),
            pushed = self.push_bundle(&target) => Startup::Pushed(pushed),
        };
        match started {
            Startup::Cancelled => return stop_server(&shutdown, server).await,
            Startup::ServerExited(joined) => return Err(server_exit(joined)),
            Startup::Pushed(Err(e)) => {
                if let Err(stopped) = stop_server(&shutdown, server).await {
                    tracing::warn!("Registry did not stop cleanly after failed push: {}", stopped);
                }
                return Err(e);
            }
            Startup::Pushed(Ok(())) => {}
        }

        tracing::info!("Registry ready; press Ctrl-C to stop");
        tokio::select! {
            _ = cancel.cancelled() => {}
            joined = &mut server => return Err(server_exit(joined)),
        }
        stop_server(&shutdown, server).await
    }

    async fn push_bundle(&self, registry: &str) -> Result<()> {
        let bundle_path = self.options.bundle_path.clone();
        let bundle = tokio::task::spawn_blocking(move || prepare_bundle(&bundle_path))
            .await
            .map_err(|e| AirgapError::Server(e.to_string()))??;
        let archives = find_image_archives(bundle.root())?;

        let copier: Arc<dyn ImageCopier> = match &self.copier {
            Some(copier) => copier.clone(),
            None => Arc::new(SkopeoCopier::locate()?),
        };

        ImagePusher::new(copier, registry)
            .with_concurrency(self.options.push_concurrency)
            .push_all(bundle.root(), &archives)
            .await?;
        Ok(())
    }
}

enum Startup {
    Cancelled,
    ServerExited(ServerJoin),
    Pushed(Result<()>),
}

type ServerJoin = std::result::Result<std::io::Result<()>, tokio::task::JoinError>;

fn server_exit(joined: ServerJoin) -> AirgapError {
    match joined {
        Ok(Ok(())) => AirgapError::Server("server exited unexpectedly".to_string()),
        Ok(Err(e)) => AirgapError::Server(e.to_string()),
        Err(e) => AirgapError::Server(e.to_string()),
    }
}

async fn stop_server(
    shutdown: &CancellationToken,
    server: tokio::task::JoinHandle<std::io::Result<()>>,
) -> Result<()> {
    tracing::info!("Shutting down registry server");
    shutdown.cancel();
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, server).await {
        Ok(Ok(Ok(()))) => {
            tracing::info!("Registry server stopped");
            Ok(())
        }
        Ok(joined) => Err(server_exit(joined)),
        Err(_) => Err(AirgapError::ShutdownTimeout(SHUTDOWN_TIMEOUT)),
    }
}

/// Address the pusher reaches the registry at; wildcard binds go through localhost
fn push_target(bound: SocketAddr) -> String {
    if bound.ip().is_unspecified() {
        format!("localhost:{}", bound.port())
    } else {
        bound.to_string()
    }
}

/// Whether something already listens on `host:port`
pub async fn is_port_in_use(host: &str, port: u16) -> bool {
    TcpListener::bind((host, port)).await.is_err()
}

/// Total size of the files under `dir`
pub async fn storage_size(dir: &Path) -> std::io::Result<u64> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || dir_size(&dir))
        .await
        .map_err(std::io::Error::other)?
}

fn dir_size(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            total += dir_size(&entry.path())?;
        } else if file_type.is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

/// Human-readable size in binary units, e.g. `1.5 KiB`
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    const PREFIXES: [char; 6] = ['K', 'M', 'G', 'T', 'P', 'E'];

    if bytes < UNIT {
        return format!("{} B", bytes);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1} {}iB", bytes as f64 / div as f64, PREFIXES[exp])
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[derive(Default)]
    struct CountingCopier {
        copies: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ImageCopier for CountingCopier {
        async fn copy(&self, _archive: &Path, destination: &str) -> Result<()> {
            self.copies.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AirgapError::Push {
                    image: destination.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(())
        }
    }

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn options(bundle: &Path, storage: &Path) -> DaemonOptions {
        let mut options = DaemonOptions::new(bundle);
        options.host = "127.0.0.1".to_string();
        options.port = free_port().await;
        options.storage_dir = storage.to_path_buf();
        options.verify_signature = false;
        options
    }

    fn bundle_with_images(dir: &Path) {
        std::fs::create_dir_all(dir.join("k0sproject")).unwrap();
        std::fs::write(dir.join("k0sproject/k0s_v1.32.8.tar"), b"a").unwrap();
        std::fs::write(dir.join("k0sproject/pause_3.9.tar"), b"b").unwrap();
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }

    #[tokio::test]
    async fn test_storage_size_sums_nested_files() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/one"), vec![0u8; 10]).unwrap();
        std::fs::write(dir.path().join("a/b/two"), vec![0u8; 32]).unwrap();
        assert_eq!(storage_size(dir.path()).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_serves_pushes_and_stops_on_cancel() {
        let bundle = tempdir().unwrap();
        let storage = tempdir().unwrap();
        bundle_with_images(bundle.path());

        let options = options(bundle.path(), &storage.path().join("registry")).await;
        let port = options.port;
        let copier = Arc::new(CountingCopier::default());
        let daemon = RegistryDaemon::new(options).with_copier(copier.clone());

        let cancel = CancellationToken::new();
        let running = tokio::spawn({
            let cancel = cancel.clone();
            async move { daemon.run(cancel).await }
        });

        let client = reqwest::Client::new();
        let mut ready = false;
        for _ in 0..100 {
            let pinged = client
                .get(format!("http://127.0.0.1:{}/v2/", port))
                .send()
                .await;
            if pinged.is_ok() && copier.copies.load(Ordering::SeqCst) == 2 {
                ready = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(ready, "registry never became ready");

        cancel.cancel();
        running.await.unwrap().unwrap();
        assert!(storage.path().join("registry/blobs/sha256").is_dir());
    }

    #[tokio::test]
    async fn test_push_failure_stops_daemon() {
        let bundle = tempdir().unwrap();
        let storage = tempdir().unwrap();
        bundle_with_images(bundle.path());

        let options = options(bundle.path(), storage.path()).await;
        let port = options.port;
        let daemon = RegistryDaemon::new(options).with_copier(Arc::new(CountingCopier {
            fail: true,
            ..Default::default()
        }));

        let err = daemon.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AirgapError::PushFailed { failed: 2, total: 2 }));
        assert!(!is_port_in_use("127.0.0.1", port).await);
    }

    #[test]
    fn test_push_target_follows_bound_address() {
        assert_eq!(push_target("0.0.0.0:5000".parse().unwrap()), "localhost:5000");
        assert_eq!(push_target("[::]:5000".parse().unwrap()), "localhost:5000");
        assert_eq!(push_target("10.0.0.5:5000".parse().unwrap()), "10.0.0.5:5000");
        assert_eq!(push_target("[fd00::5]:5000".parse().unwrap()), "[fd00::5]:5000");
    }

    #[tokio::test]
    async fn test_refuses_bound_port() {
        let bundle = tempdir().unwrap();
        let storage = tempdir().unwrap();
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let mut options = options(bundle.path(), storage.path()).await;
        options.port = occupied.local_addr().unwrap().port();
        assert!(is_port_in_use("127.0.0.1", options.port).await);

        let err = RegistryDaemon::new(options)
            .run(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AirgapError::PortInUse { .. }));
    }

    #[tokio::test]
    async fn test_missing_signature_fails_before_serving() {
        let bundle = tempdir().unwrap();
        let storage = tempdir().unwrap();
        let archive = bundle.path().join("bundle.tar.gz");
        std::fs::write(&archive, b"not really").unwrap();

        let mut options = options(&archive, &storage.path().join("registry")).await;
        options.verify_signature = true;
        options.cosign_key = "/keys/cosign.pub".to_string();

        let err = RegistryDaemon::new(options)
            .run(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AirgapError::SignatureMissing(_)));
        assert!(!storage.path().join("registry").exists());
    }
}
