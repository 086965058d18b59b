//! Installation orchestration
//!
//! Phases run strictly in order. Each phase result is settled against its
//! [`FailurePolicy`](crate::phase::FailurePolicy): fatal phases end the run,
//! best-effort phases (provider readiness, credentials) only leave a warning.

use crate::connector::{ClusterConnector, KubeConnector};
use crate::error::{InstallError, Result};
use crate::generator::{generate, generate_airgap};
use crate::paths::InstallPaths;
use crate::phase::{InstallReport, Phase, PhaseOutcome};
use k0rdentd_airgap::assets::write_executable;
use k0rdentd_airgap::{AirgapError, Asset, extract_version, is_airgap, setup_mirror};
use k0rdentd_cloud::{ClusterApi, ClusterError, CredentialsManager, HelmReleaseStatus};
use k0rdentd_config::{InstallationConfig, Provider, write_private_file};
use k0rdentd_runtime::{RuntimeLifecycle, SilentProgress, Waiter};
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Deployments that make up a healthy k0rdent management plane
const REQUIRED_DEPLOYMENTS: [&str; 7] = [
    "kcm-cert-manager",
    "kcm-cert-manager-cainjector",
    "kcm-cert-manager-webhook",
    "kcm-datasource-controller-manager",
    "kcm-k0rdent-enterprise-controller-manager",
    "kcm-k0rdent-ui",
    "kcm-rbac-manager",
];

/// Disabled in air-gapped installs
const TELEMETRY_DEPLOYMENT: &str = "kcm-regional-telemetry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    Online,
    Airgap,
}

impl InstallMode {
    /// The mode matching this build's flavor
    pub fn current() -> Self {
        if is_airgap() {
            InstallMode::Airgap
        } else {
            InstallMode::Online
        }
    }
}

pub fn required_deployments(mode: InstallMode) -> Vec<&'static str> {
    let mut deployments = REQUIRED_DEPLOYMENTS.to_vec();
    if mode == InstallMode::Online {
        deployments.push(TELEMETRY_DEPLOYMENT);
    }
    deployments
}

/// Helm release that must be deployed before credentials for `provider` work
pub fn provider_release(provider: Provider) -> Option<&'static str> {
    match provider {
        Provider::Aws => Some("cluster-api-provider-aws"),
        Provider::Azure => Some("cluster-api-provider-azure"),
        Provider::OpenStack => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub runtime_ready: Duration,
    pub application_ready: Duration,
    pub providers_ready: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            runtime_ready: Duration::from_secs(5 * 60),
            application_ready: Duration::from_secs(15 * 60),
            providers_ready: Duration::from_secs(15 * 60),
        }
    }
}

pub struct Installer {
    config: InstallationConfig,
    runtime: Arc<dyn RuntimeLifecycle>,
    connector: Arc<dyn ClusterConnector>,
    waiter: Waiter,
    paths: InstallPaths,
    timeouts: Timeouts,
    mode: InstallMode,
    dry_run: bool,
    k0s_binary: Option<&'static [u8]>,
}

impl Installer {
    pub fn new(config: InstallationConfig, runtime: Arc<dyn RuntimeLifecycle>) -> Self {
        Self {
            config,
            runtime,
            connector: Arc::new(KubeConnector),
            waiter: Waiter::new(Arc::new(SilentProgress)),
            paths: InstallPaths::default(),
            timeouts: Timeouts::default(),
            mode: InstallMode::current(),
            dry_run: false,
            k0s_binary: Asset::K0s.bytes(),
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn ClusterConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_waiter(mut self, waiter: Waiter) -> Self {
        self.waiter = waiter;
        self
    }

    pub fn with_paths(mut self, paths: InstallPaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_mode(mut self, mode: InstallMode) -> Self {
        self.mode = mode;
        self
    }

    /// k0s binary installed in air-gapped mode, the embedded one by default
    pub fn with_k0s_binary(mut self, binary: &'static [u8]) -> Self {
        self.k0s_binary = Some(binary);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &InstallationConfig {
        &self.config
    }

    pub fn mode(&self) -> InstallMode {
        self.mode
    }

    /// Run every phase, or only describe them in dry-run mode
    pub async fn run(&mut self) -> Result<InstallReport> {
        let mut report = InstallReport::default();

        if self.dry_run {
            for step in self.plan() {
                tracing::info!("[dry-run] {}", step);
            }
            for phase in Phase::ALL {
                report.settle(phase, Ok(PhaseOutcome::Skipped("dry run".to_string())))?;
            }
            return Ok(report);
        }

        let written = match self.mode {
            InstallMode::Online => self.write_config(),
            InstallMode::Airgap => self.prepare_airgap(),
        };
        report.settle(Phase::ConfigWritten, written)?;

        let cluster = self.bring_up_runtime(&mut report).await?;

        let application = self.wait_for_application(cluster.as_ref()).await;
        report.settle(Phase::ApplicationReady, application)?;

        let providers = self.wait_for_providers(cluster.as_ref()).await;
        report.settle(Phase::ProvidersReady, providers)?;

        let credentials = self.create_credentials(cluster).await;
        report.settle(Phase::CredentialsProvisioned, credentials)?;

        Ok(report)
    }

    /// Human readable steps [`Installer::run`] would take
    pub fn plan(&self) -> Vec<String> {
        let mut steps = Vec::new();

        if self.mode == InstallMode::Airgap {
            match &self.config.airgap.bundle_path {
                Some(bundle) => steps.push(format!(
                    "Read k0rdent version from bundle {}",
                    bundle.display()
                )),
                None => steps.push(format!(
                    "Use configured k0rdent version {}",
                    self.config.k0rdent.version
                )),
            }
            steps.push(format!(
                "Extract embedded k0s binary to {}",
                self.paths.k0s_binary.display()
            ));
            steps.push(format!(
                "Configure containerd mirror for {} in {}",
                self.config.airgap.registry_address(),
                self.paths.containerd.drop_in_dir.display()
            ));
            steps.push(format!(
                "Write air-gapped k0s configuration to {}",
                self.paths.k0s_config.display()
            ));
        } else {
            steps.push(format!(
                "Write k0s configuration to {}",
                self.paths.k0s_config.display()
            ));
        }

        steps.push("Install k0s controller (k0s install controller --enable-worker --no-taints)".to_string());
        steps.push(format!(
            "Start k0s and wait up to {} for it to become ready",
            format_timeout(self.timeouts.runtime_ready)
        ));
        steps.push(format!(
            "Wait up to {} for k0rdent {} in namespace {}",
            format_timeout(self.timeouts.application_ready),
            self.config.k0rdent.version,
            self.config.k0rdent.helm.namespace
        ));

        let releases = self.provider_releases();
        if !releases.is_empty() {
            steps.push(format!(
                "Wait up to {} for provider releases: {}",
                format_timeout(self.timeouts.providers_ready),
                releases.join(", ")
            ));
        }

        let credentials = self.config.k0rdent.credentials.definitions();
        if !credentials.is_empty() {
            steps.push(format!(
                "Create {} cloud credential(s): {}",
                credentials.len(),
                credentials
                    .iter()
                    .map(|c| format!("{} ({})", c.name(), c.provider()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }

        steps
    }

    fn write_config(&self) -> Result<PhaseOutcome> {
        let document = generate(&self.config)?;
        write_private_file(&self.paths.k0s_config, document.as_bytes())?;
        tracing::info!("Wrote k0s configuration to {}", self.paths.k0s_config.display());
        Ok(PhaseOutcome::Completed)
    }

    fn prepare_airgap(&mut self) -> Result<PhaseOutcome> {
        self.resolve_bundle_version();

        let k0s = self.k0s_binary.ok_or(AirgapError::AssetMissing("k0s"))?;
        write_executable(&self.paths.k0s_binary, k0s)?;
        tracing::info!("Extracted k0s to {}", self.paths.k0s_binary.display());

        let registry = self.config.airgap.registry_address().to_string();
        let insecure = self.config.airgap.registry_insecure();
        let document = generate_airgap(&self.config, &registry, insecure)?;

        setup_mirror(&self.paths.containerd, &registry)?;

        write_private_file(&self.paths.k0s_config, document.as_bytes())?;
        tracing::info!(
            "Wrote air-gapped k0s configuration to {} (registry {})",
            self.paths.k0s_config.display(),
            registry
        );
        Ok(PhaseOutcome::Completed)
    }

    /// Prefer the version baked into the bundle's chart
    fn resolve_bundle_version(&mut self) {
        let Some(bundle) = self.config.airgap.bundle_path.clone() else {
            tracing::warn!(
                "No airgap bundle configured, using k0rdent version {}",
                self.config.k0rdent.version
            );
            return;
        };

        match extract_version(&bundle) {
            Ok(version) => {
                tracing::info!("k0rdent version {} from bundle {}", version, bundle.display());
                self.config.k0rdent.version = version;
            }
            Err(e) => tracing::warn!(
                "Could not read k0rdent version from {}: {}. Using {}",
                bundle.display(),
                e,
                self.config.k0rdent.version
            ),
        }
    }

    /// Install and start k0s as needed, then connect to its API
    async fn bring_up_runtime(&self, report: &mut InstallReport) -> Result<Arc<dyn ClusterApi>> {
        let installed = self.runtime.is_installed().await;
        let running = installed && self.runtime.is_running().await;

        if running {
            report.settle(
                Phase::RuntimeInstalled,
                Ok(PhaseOutcome::Skipped("k0s is already installed".to_string())),
            )?;
            report.settle(
                Phase::RuntimeReady,
                Ok(PhaseOutcome::Skipped("k0s is already running".to_string())),
            )?;
        } else {
            let install = if installed {
                Ok(PhaseOutcome::Skipped("k0s is already installed".to_string()))
            } else {
                self.install_runtime().await
            };
            report.settle(Phase::RuntimeInstalled, install)?;

            let ready = self.start_runtime().await;
            report.settle(Phase::RuntimeReady, ready)?;
        }

        self.connector
            .connect(self.runtime.as_ref())
            .await
            .map_err(|e| InstallError::Phase {
                phase: Phase::RuntimeReady,
                source: Box::new(e),
            })
    }

    async fn install_runtime(&self) -> Result<PhaseOutcome> {
        if self.mode == InstallMode::Online && !self.runtime.binary_available().await {
            let version = Some(self.config.k0s.version.as_str()).filter(|v| !v.is_empty());
            tracing::info!("Installing k0s binary");
            self.runtime.install_binary(version).await?;
        }

        self.runtime.install().await?;
        tracing::info!("k0s controller installed");
        Ok(PhaseOutcome::Completed)
    }

    async fn start_runtime(&self) -> Result<PhaseOutcome> {
        self.runtime.start().await?;

        let runtime = &self.runtime;
        self.waiter
            .wait_until("k0s to be ready", self.timeouts.runtime_ready, || async move {
                Ok::<_, Infallible>(runtime.is_running().await)
            })
            .await?;
        Ok(PhaseOutcome::Completed)
    }

    async fn wait_for_application(&self, cluster: &dyn ClusterApi) -> Result<PhaseOutcome> {
        let namespace = self.config.k0rdent.helm.namespace.as_str();
        let deployments = required_deployments(self.mode);

        if matches!(
            application_ready(cluster, namespace, &deployments).await,
            Ok(true)
        ) {
            return Ok(PhaseOutcome::Skipped("k0rdent is already ready".to_string()));
        }

        let deployments = &deployments;
        self.waiter
            .wait_until(
                "k0rdent to be ready",
                self.timeouts.application_ready,
                || async move { application_ready(cluster, namespace, deployments).await },
            )
            .await?;
        Ok(PhaseOutcome::Completed)
    }

    fn provider_releases(&self) -> Vec<&'static str> {
        self.config
            .k0rdent
            .credentials
            .providers()
            .into_iter()
            .filter_map(provider_release)
            .collect()
    }

    async fn wait_for_providers(&self, cluster: &dyn ClusterApi) -> Result<PhaseOutcome> {
        if self.config.k0rdent.credentials.is_empty() {
            return Ok(PhaseOutcome::Skipped("no cloud credentials configured".to_string()));
        }
        let releases = self.provider_releases();
        if releases.is_empty() {
            return Ok(PhaseOutcome::Skipped("no provider release required".to_string()));
        }

        // one budget covers every release
        let namespace = self.config.k0rdent.helm.namespace.as_str();
        let releases = &releases;
        let result = self
            .waiter
            .wait_until(
                "provider releases to be deployed",
                self.timeouts.providers_ready,
                || async move { releases_deployed(cluster, namespace, releases).await },
            )
            .await;
        match result {
            Ok(()) => return Ok(PhaseOutcome::Completed),
            Err(e) => tracing::warn!("{}", e),
        }

        let mut pending = Vec::new();
        for release in releases {
            if !matches!(release_deployed(cluster, namespace, release).await, Ok(true)) {
                pending.push(*release);
            }
        }
        Ok(PhaseOutcome::Warning(format!(
            "provider release(s) not ready: {}. Will attempt credential creation anyway",
            pending.join(", ")
        )))
    }

    async fn create_credentials(&self, cluster: Arc<dyn ClusterApi>) -> Result<PhaseOutcome> {
        let definitions = self.config.k0rdent.credentials.definitions();
        if definitions.is_empty() {
            return Ok(PhaseOutcome::Skipped("no cloud credentials configured".to_string()));
        }

        let manager = CredentialsManager::new(cluster)
            .with_namespace(self.config.k0rdent.helm.namespace.clone());
        let report = manager.create_all(&definitions).await;
        tracing::info!("Created {} credential object(s)", report.created());

        let warnings: Vec<String> = report.warnings().into_iter().map(String::from).collect();
        if let Err(e) = report.into_result() {
            return Ok(PhaseOutcome::Warning(format!(
                "{}. You may need to create them manually through the K0rdent UI",
                e
            )));
        }
        if !warnings.is_empty() {
            return Ok(PhaseOutcome::Warning(warnings.join("; ")));
        }
        Ok(PhaseOutcome::Completed)
    }

    /// Human readable steps [`Installer::uninstall`] would take
    pub fn uninstall_plan(&self) -> Vec<String> {
        vec![
            "Stop k0s if it is running (k0s stop)".to_string(),
            "Reset k0s (k0s reset)".to_string(),
            format!("Remove {}", self.paths.k0s_config.display()),
            format!("Remove {}", self.paths.k0rdentd_config.display()),
        ]
    }

    /// Stop and reset k0s, then remove generated configuration
    pub async fn uninstall(&self) -> Result<()> {
        if self.dry_run {
            for step in self.uninstall_plan() {
                tracing::info!("[dry-run] {}", step);
            }
            return Ok(());
        }

        if self.runtime.is_running().await {
            tracing::info!("Stopping k0s");
            self.runtime.stop().await?;
        }

        if self.runtime.is_installed().await {
            tracing::info!("Resetting k0s");
            self.runtime.reset().await?;
        } else {
            tracing::info!("k0s is not installed, skipping reset");
        }

        remove_if_present(&self.paths.k0s_config)?;
        remove_if_present(&self.paths.k0rdentd_config)?;
        Ok(())
    }
}

async fn application_ready(
    cluster: &dyn ClusterApi,
    namespace: &str,
    deployments: &[&str],
) -> std::result::Result<bool, ClusterError> {
    if !cluster.namespace_exists(namespace).await? {
        tracing::debug!("Namespace {} does not exist yet", namespace);
        return Ok(false);
    }
    for name in deployments {
        if !cluster.deployment_ready(namespace, name).await? {
            tracing::debug!("Deployment {}/{} is not ready", namespace, name);
            return Ok(false);
        }
    }
    Ok(true)
}

async fn releases_deployed(
    cluster: &dyn ClusterApi,
    namespace: &str,
    releases: &[&str],
) -> std::result::Result<bool, ClusterError> {
    for release in releases {
        if !release_deployed(cluster, namespace, release).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

async fn release_deployed(
    cluster: &dyn ClusterApi,
    namespace: &str,
    release: &str,
) -> std::result::Result<bool, ClusterError> {
    if !cluster.namespace_exists(namespace).await? {
        return Ok(false);
    }
    let status = cluster.helm_release_status(namespace, release).await?;
    tracing::debug!("Release {} is {:?}", release, status);
    Ok(status == HelmReleaseStatus::Deployed)
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn format_timeout(timeout: Duration) -> String {
    let secs = timeout.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}
