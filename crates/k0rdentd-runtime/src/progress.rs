//! Progress sinks for long-running waits

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

/// Receives progress updates from a [`crate::Waiter`]
///
/// `tick` is called on a fixed short interval while a wait is in progress,
/// `finish` exactly once when it ends.
pub trait ProgressSink: Send + Sync {
    fn start(&self, description: &str);
    fn tick(&self, description: &str, elapsed: Duration);
    fn finish(&self, description: &str, success: bool);
}

/// Discards all progress
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn start(&self, _description: &str) {}
    fn tick(&self, _description: &str, _elapsed: Duration) {}
    fn finish(&self, _description: &str, _success: bool) {}
}

/// Terminal spinner
pub struct SpinnerProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl SpinnerProgress {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }
}

impl Default for SpinnerProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for SpinnerProgress {
    fn start(&self, description: &str) {
        let bar = ProgressBar::new_spinner();
        bar.set_style(Self::style());
        bar.set_message(format!("Waiting for {}...", description));
        if let Ok(mut slot) = self.bar.lock() {
            *slot = Some(bar);
        }
    }

    fn tick(&self, _description: &str, _elapsed: Duration) {
        if let Ok(slot) = self.bar.lock() {
            if let Some(bar) = slot.as_ref() {
                bar.tick();
            }
        }
    }

    fn finish(&self, description: &str, success: bool) {
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(bar) = slot.take() {
                if success {
                    bar.finish_with_message(format!("✓ {} ready", description));
                } else {
                    bar.finish_with_message(format!("✗ {} not ready", description));
                }
            }
        }
    }
}
