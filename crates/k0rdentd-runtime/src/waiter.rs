//! Readiness waiting
//!
//! [`Waiter::wait_until`] polls a probe until it reports ready, the timeout
//! expires or the optional cancellation token fires. A separate reporter task
//! drives the [`ProgressSink`] on a fixed sub-second interval, independent of
//! the probe cadence, and is stopped before the wait returns.

use crate::error::WaitError;
use crate::progress::ProgressSink;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct Waiter {
    progress: Arc<dyn ProgressSink>,
    poll_interval: Duration,
    progress_interval: Duration,
    cancel: Option<CancellationToken>,
}

impl Waiter {
    pub fn new(progress: Arc<dyn ProgressSink>) -> Self {
        Self {
            progress,
            poll_interval: DEFAULT_POLL_INTERVAL,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            cancel: None,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Abort waits when `token` is cancelled; an in-flight probe is dropped
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Poll `probe` until it returns `Ok(true)`
    ///
    /// `Ok(false)` keeps waiting. Probe errors are logged at debug level and
    /// treated as "not ready yet".
    pub async fn wait_until<F, Fut, E>(
        &self,
        description: &str,
        timeout: Duration,
        mut probe: F,
    ) -> Result<(), WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
        E: Display,
    {
        self.progress.start(description);

        let (stop_tx, stop_rx) = oneshot::channel();
        let reporter = tokio::spawn(report_progress(
            Arc::clone(&self.progress),
            description.to_string(),
            self.progress_interval,
            stop_rx,
        ));

        let deadline = Instant::now() + timeout;
        let outcome = tokio::select! {
            biased;
            _ = cancelled(self.cancel.as_ref()) => Err(WaitError::Cancelled {
                description: description.to_string(),
            }),
            _ = sleep_until(deadline) => Err(WaitError::Timeout {
                description: description.to_string(),
                timeout,
            }),
            _ = poll_until_ready(&mut probe, description, self.poll_interval) => Ok(()),
        };

        let _ = stop_tx.send(());
        if let Err(e) = reporter.await {
            tracing::debug!("Progress reporter for {} ended abnormally: {}", description, e);
        }
        self.progress.finish(description, outcome.is_ok());

        outcome
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn poll_until_ready<F, Fut, E>(probe: &mut F, description: &str, interval: Duration)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: Display,
{
    loop {
        match probe().await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => tracing::debug!("Probe for {} failed: {}", description, e),
        }
        sleep(interval).await;
    }
}

async fn report_progress(
    sink: Arc<dyn ProgressSink>,
    description: String,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => sink.tick(&description, started.elapsed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentProgress;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingProgress {
        ticks: AtomicUsize,
        finished: Mutex<Vec<bool>>,
    }

    impl ProgressSink for RecordingProgress {
        fn start(&self, _description: &str) {}

        fn tick(&self, _description: &str, _elapsed: Duration) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }

        fn finish(&self, _description: &str, success: bool) {
            self.finished.lock().unwrap().push(success);
        }
    }

    fn counting_probe(
        ready_after: usize,
        polls: Arc<AtomicUsize>,
    ) -> impl FnMut() -> std::future::Ready<Result<bool, String>> {
        move || {
            let n = polls.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(Ok(n >= ready_after))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_n_polls_without_extra_polls() {
        let polls = Arc::new(AtomicUsize::new(0));
        let waiter = Waiter::new(Arc::new(SilentProgress)).poll_interval(Duration::from_secs(1));

        let result = waiter
            .wait_until(
                "service",
                Duration::from_secs(60),
                counting_probe(3, polls.clone()),
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(polls.load(Ordering::SeqCst), 3);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_not_before_deadline() {
        let polls = Arc::new(AtomicUsize::new(0));
        let waiter = Waiter::new(Arc::new(SilentProgress)).poll_interval(Duration::from_secs(1));
        let timeout = Duration::from_secs(10);

        let started = Instant::now();
        let result = waiter
            .wait_until("never", timeout, counting_probe(usize::MAX, polls.clone()))
            .await;
        let elapsed = started.elapsed();

        assert_eq!(
            result,
            Err(WaitError::Timeout {
                description: "never".to_string(),
                timeout,
            })
        );
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_secs(1));
        assert!(polls.load(Ordering::SeqCst) >= 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_errors_are_not_fatal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let waiter = Waiter::new(Arc::new(SilentProgress)).poll_interval(Duration::from_secs(1));

        let result = waiter
            .wait_until("flaky api", Duration::from_secs(30), move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("connection refused".to_string())
                    } else {
                        Ok(true)
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_ticks_and_stops_before_return() {
        let progress = Arc::new(RecordingProgress::default());
        let waiter = Waiter::new(progress.clone())
            .poll_interval(Duration::from_secs(1))
            .progress_interval(Duration::from_millis(100));

        let polls = Arc::new(AtomicUsize::new(0));
        waiter
            .wait_until("app", Duration::from_secs(30), counting_probe(4, polls))
            .await
            .unwrap();

        let ticks = progress.ticks.load(Ordering::SeqCst);
        assert!(ticks >= 20, "expected sub-second ticks, got {}", ticks);
        assert_eq!(*progress.finished.lock().unwrap(), vec![true]);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(progress.ticks.load(Ordering::SeqCst), ticks);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_wait() {
        let token = CancellationToken::new();
        let waiter = Waiter::new(Arc::new(SilentProgress)).cancel_on(token.clone());

        let canceller = tokio::spawn(async move {
            sleep(Duration::from_secs(3)).await;
            token.cancel();
        });

        let result = waiter
            .wait_until("cancellable", Duration::from_secs(600), || async {
                Ok::<_, String>(false)
            })
            .await;

        canceller.await.unwrap();
        assert_eq!(
            result,
            Err(WaitError::Cancelled {
                description: "cancellable".to_string()
            })
        );
    }
}
