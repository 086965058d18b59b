//! Installation phases and how their results are folded into a report

use crate::error::{InstallError, Result};
use std::fmt;

/// Installation phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    ConfigWritten,
    RuntimeInstalled,
    RuntimeReady,
    ApplicationReady,
    ProvidersReady,
    CredentialsProvisioned,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::ConfigWritten,
        Phase::RuntimeInstalled,
        Phase::RuntimeReady,
        Phase::ApplicationReady,
        Phase::ProvidersReady,
        Phase::CredentialsProvisioned,
    ];

    pub fn description(&self) -> &'static str {
        match self {
            Phase::ConfigWritten => "write k0s configuration",
            Phase::RuntimeInstalled => "install k0s",
            Phase::RuntimeReady => "wait for k0s",
            Phase::ApplicationReady => "wait for k0rdent",
            Phase::ProvidersReady => "wait for cloud providers",
            Phase::CredentialsProvisioned => "create cloud credentials",
        }
    }

    /// Failure handling for this phase
    pub fn policy(&self) -> FailurePolicy {
        match self {
            Phase::ProvidersReady | Phase::CredentialsProvisioned => FailurePolicy::Warn,
            _ => FailurePolicy::Abort,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed,
    Skipped(String),
    /// Finished with a problem the operator has to follow up on
    Warning(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// The error ends the installation
    Abort,
    /// The error is downgraded to [`PhaseOutcome::Warning`]
    Warn,
}

impl FailurePolicy {
    pub fn apply(self, phase: Phase, result: Result<PhaseOutcome>) -> Result<PhaseOutcome> {
        match (self, result) {
            (_, Ok(outcome)) => Ok(outcome),
            (FailurePolicy::Warn, Err(err)) => Ok(PhaseOutcome::Warning(err.to_string())),
            (FailurePolicy::Abort, Err(err @ InstallError::Phase { .. })) => Err(err),
            (FailurePolicy::Abort, Err(err)) => Err(InstallError::Phase {
                phase,
                source: Box::new(err),
            }),
        }
    }
}

/// Outcome of every phase that ran
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub phases: Vec<(Phase, PhaseOutcome)>,
}

impl InstallReport {
    /// Apply the phase's policy to `result` and record the outcome
    ///
    /// Returns the error when the policy aborts the run.
    pub fn settle(&mut self, phase: Phase, result: Result<PhaseOutcome>) -> Result<()> {
        let outcome = phase.policy().apply(phase, result)?;
        match &outcome {
            PhaseOutcome::Completed => tracing::info!("✓ {}", phase),
            PhaseOutcome::Skipped(reason) => tracing::info!("Skipped {}: {}", phase, reason),
            PhaseOutcome::Warning(message) => tracing::warn!("{}: {}", phase, message),
        }
        self.phases.push((phase, outcome));
        Ok(())
    }

    pub fn outcome(&self, phase: Phase) -> Option<&PhaseOutcome> {
        self.phases
            .iter()
            .find(|(p, _)| *p == phase)
            .map(|(_, outcome)| outcome)
    }

    pub fn warnings(&self) -> Vec<(Phase, &str)> {
        self.phases
            .iter()
            .filter_map(|(phase, outcome)| match outcome {
                PhaseOutcome::Warning(message) => Some((*phase, message.as_str())),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k0rdentd_runtime::WaitError;
    use std::time::Duration;

    fn timeout() -> InstallError {
        InstallError::Wait(WaitError::Timeout {
            description: "k0rdent".to_string(),
            timeout: Duration::from_secs(1),
        })
    }

    #[test]
    fn test_abort_tags_error_with_phase() {
        let err = FailurePolicy::Abort
            .apply(Phase::ApplicationReady, Err(timeout()))
            .unwrap_err();
        assert_eq!(err.phase(), Some(Phase::ApplicationReady));
        assert!(err.to_string().starts_with("wait for k0rdent failed: timeout"));
    }

    #[test]
    fn test_warn_downgrades_error() {
        let outcome = FailurePolicy::Warn
            .apply(Phase::ProvidersReady, Err(timeout()))
            .unwrap();
        assert!(matches!(outcome, PhaseOutcome::Warning(m) if m.contains("timeout")));
    }

    #[test]
    fn test_report_folds_phases() {
        let mut report = InstallReport::default();
        report.settle(Phase::ConfigWritten, Ok(PhaseOutcome::Completed)).unwrap();
        report.settle(Phase::CredentialsProvisioned, Err(timeout())).unwrap();
        assert_eq!(report.phases.len(), 2);
        assert_eq!(report.warnings().len(), 1);

        let err = report.settle(Phase::RuntimeReady, Err(timeout())).unwrap_err();
        assert_eq!(err.phase(), Some(Phase::RuntimeReady));
        assert_eq!(report.outcome(Phase::RuntimeReady), None);
    }
}
