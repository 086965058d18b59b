//! Fakes shared by the installer integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use k0rdentd_cloud::ClusterApi;
use k0rdentd_cloud::memory::InMemoryCluster;
use k0rdentd_installer::{ClusterConnector, InstallPaths, Installer, Timeouts};
use k0rdentd_config::InstallationConfig;
use k0rdentd_runtime::{RuntimeLifecycle, SilentProgress, Waiter};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const NAMESPACE: &str = "kcm-system";

/// k0s stand-in that records every lifecycle call
#[derive(Default)]
pub struct FakeRuntime {
    installed: AtomicBool,
    running: AtomicBool,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeRuntime {
    pub fn fresh() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn running() -> Arc<Self> {
        let runtime = Self::default();
        runtime.installed.store(true, Ordering::SeqCst);
        runtime.running.store(true, Ordering::SeqCst);
        Arc::new(runtime)
    }

    pub fn stopped() -> Arc<Self> {
        let runtime = Self::default();
        runtime.installed.store(true, Ordering::SeqCst);
        Arc::new(runtime)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RuntimeLifecycle for FakeRuntime {
    async fn binary_available(&self) -> bool {
        true
    }

    async fn install_binary(&self, _version: Option<&str>) -> k0rdentd_runtime::Result<()> {
        self.record("install_binary");
        Ok(())
    }

    async fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn install(&self) -> k0rdentd_runtime::Result<()> {
        self.record("install");
        self.installed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self) -> k0rdentd_runtime::Result<()> {
        self.record("start");
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> k0rdentd_runtime::Result<()> {
        self.record("stop");
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn reset(&self) -> k0rdentd_runtime::Result<()> {
        self.record("reset");
        self.installed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn admin_kubeconfig(&self) -> k0rdentd_runtime::Result<String> {
        Ok("apiVersion: v1\nkind: Config\n".to_string())
    }
}

/// Hands out the same in-memory cluster on every connect
pub struct FakeConnector(pub Arc<InMemoryCluster>);

#[async_trait]
impl ClusterConnector for FakeConnector {
    async fn connect(
        &self,
        _runtime: &dyn RuntimeLifecycle,
    ) -> k0rdentd_installer::Result<Arc<dyn ClusterApi>> {
        Ok(self.0.clone())
    }
}

pub fn installer(
    config: InstallationConfig,
    runtime: Arc<FakeRuntime>,
    cluster: Arc<InMemoryCluster>,
    root: &Path,
) -> Installer {
    Installer::new(config, runtime)
        .with_connector(Arc::new(FakeConnector(cluster)))
        .with_waiter(Waiter::new(Arc::new(SilentProgress)).poll_interval(Duration::from_secs(2)))
        .with_paths(InstallPaths::under(root))
        .with_timeouts(Timeouts {
            runtime_ready: Duration::from_secs(60),
            application_ready: Duration::from_secs(120),
            providers_ready: Duration::from_secs(60),
        })
}

/// Namespace plus every required deployment, fully scaled
pub fn make_ready(cluster: &InMemoryCluster, deployments: &[&str]) {
    cluster.add_namespace(NAMESPACE);
    cluster.set_deployments_ready(NAMESPACE, deployments);
}
