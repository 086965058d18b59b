//! k0s runtime lifecycle
//!
//! k0s is driven entirely through its CLI (and systemd for the installed
//! check). [`RuntimeLifecycle`] is the seam the installer works against.

use crate::error::{Result, RuntimeError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

const K0S_SERVICE: &str = "k0scontroller.service";
const READY_MARKER: &str = "Kube-api probing successful: true";
const INSTALL_SCRIPT_URL: &str = "https://get.k0s.sh";

/// Lifecycle operations on the local Kubernetes runtime
#[async_trait]
pub trait RuntimeLifecycle: Send + Sync {
    /// The runtime binary is available
    async fn binary_available(&self) -> bool;

    /// Download and install the runtime binary
    async fn install_binary(&self, version: Option<&str>) -> Result<()>;

    /// The controller service is installed
    async fn is_installed(&self) -> bool;

    /// The runtime reports a healthy API server
    async fn is_running(&self) -> bool;

    async fn install(&self) -> Result<()>;
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn reset(&self) -> Result<()>;

    /// Admin kubeconfig for the local cluster
    async fn admin_kubeconfig(&self) -> Result<String>;
}

/// The k0s CLI
#[derive(Debug, Clone)]
pub struct K0sRuntime {
    binary: PathBuf,
    config_path: PathBuf,
}

impl K0sRuntime {
    pub fn new(binary: impl Into<PathBuf>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            config_path: config_path.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        run_command(&self.binary.to_string_lossy(), args).await
    }
}

impl Default for K0sRuntime {
    fn default() -> Self {
        Self::new("k0s", "/etc/k0s/k0s.yaml")
    }
}

/// Run a command and return stdout, or `CommandFailed` with its stderr
pub async fn run_command(program: &str, args: &[&str]) -> Result<String> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    // the child must not outlive a dropped future
    cmd.kill_on_drop(true);

    tracing::debug!("Running: {} {}", program, args.join(" "));

    let output = cmd.output().await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RuntimeError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Map the host architecture to the names the k0s installer accepts
fn k0s_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "arm",
        other => other,
    }
}

#[async_trait]
impl RuntimeLifecycle for K0sRuntime {
    async fn binary_available(&self) -> bool {
        match self.run(&["version"]).await {
            Ok(version) => {
                tracing::info!("Found k0s {}", version.trim());
                true
            }
            Err(e) => {
                tracing::debug!("k0s binary not usable: {}", e);
                false
            }
        }
    }

    async fn install_binary(&self, version: Option<&str>) -> Result<()> {
        let script = format!("curl -sSLf {} | sh", INSTALL_SCRIPT_URL);
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&script);
        cmd.env("K0S_ARCH", k0s_arch());
        if let Some(version) = version.filter(|v| !v.is_empty()) {
            cmd.env("K0S_VERSION", version);
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: sh -c '{}'", script);
        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: script,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        if !self.binary_available().await {
            return Err(RuntimeError::BinaryNotFound);
        }
        Ok(())
    }

    async fn is_installed(&self) -> bool {
        run_command("systemctl", &["is-enabled", K0S_SERVICE])
            .await
            .is_ok()
    }

    async fn is_running(&self) -> bool {
        match self.run(&["status"]).await {
            Ok(status) => status.contains(READY_MARKER),
            Err(e) => {
                tracing::debug!("k0s status failed: {}", e);
                false
            }
        }
    }

    async fn install(&self) -> Result<()> {
        let config = self.config_path.to_string_lossy();
        self.run(&[
            "install",
            "controller",
            "--enable-worker",
            "--no-taints",
            "--config",
            &*config,
        ])
        .await?;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.run(&["start"]).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.run(&["stop"]).await?;
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.run(&["reset"]).await?;
        Ok(())
    }

    async fn admin_kubeconfig(&self) -> Result<String> {
        self.run(&["kubeconfig", "admin"]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_command_captures_stdout() {
        let output = run_command("sh", &["-c", "echo ready"]).await.unwrap();
        assert_eq!(output.trim(), "ready");
    }

    #[tokio::test]
    async fn test_run_command_reports_stderr() {
        let err = run_command("sh", &["-c", "echo boom >&2; exit 3"])
            .await
            .unwrap_err();
        match err {
            RuntimeError::CommandFailed { command, stderr } => {
                assert!(command.starts_with("sh -c"));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_aborted_command_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let script = format!("sleep 2; touch {}", marker.display());

        let task = tokio::spawn(async move { run_command("sh", &["-c", &script]).await });
        tokio::time::sleep(Duration::from_millis(300)).await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_running() {
        let runtime = K0sRuntime::new("/nonexistent/k0s", "/tmp/k0s.yaml");
        assert!(!runtime.is_running().await);
        assert!(!runtime.binary_available().await);
        assert!(runtime.admin_kubeconfig().await.is_err());
    }

    #[test]
    fn test_arch_mapping() {
        let arch = k0s_arch();
        assert!(!arch.is_empty());
        assert_ne!(arch, "x86_64");
        assert_ne!(arch, "aarch64");
    }
}
