//! Periodic Target status logging.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use siphon_core::{Target, TargetSnapshot};

/// Logs the Target's level and value at a fixed interval. Read-only.
pub struct StatusReporter {
    target: Target,
    interval: Duration,
}

impl StatusReporter {
    pub fn new(target: Target, interval: Duration) -> Self {
        Self { target, interval }
    }

    /// Log one status line.
    pub fn report(&self) -> Option<TargetSnapshot> {
        match self.target.snapshot() {
            Ok(state) => {
                info!(
                    target_host = %self.target.name(),
                    level = %format!("{:.3}/{:.3}", state.level, state.min_level),
                    value = %format!("{:.0}/{:.0}", state.value, state.max_value),
                    baseline = state.at_baseline(),
                    "target status"
                );
                Some(state)
            }
            Err(e) => {
                warn!(target_host = %self.target.name(), error = %e, "target status unavailable");
                None
            }
        }
    }

    /// Report until `shutdown` fires. Returns how many reports were made.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut reports = 0;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.report();
                    reports += 1;
                }
                _ = shutdown.changed() => {
                    info!("status reporter shutting down");
                    break;
                }
            }
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphon_core::Environment;
    use siphon_sim::StubEnvironment;
    use std::sync::Arc;

    fn reporter(env: &StubEnvironment) -> StatusReporter {
        let shared: Arc<dyn Environment> = Arc::new(env.clone());
        StatusReporter::new(Target::new("joesguns", shared), Duration::from_secs(1))
    }

    #[test]
    fn report_reads_current_state() {
        let snap = TargetSnapshot {
            level: 7.5,
            min_level: 5.0,
            value: 10.0,
            max_value: 20.0,
        };
        let env = StubEnvironment::new().with_target("joesguns", snap);
        assert_eq!(reporter(&env).report(), Some(snap));
    }

    #[test]
    fn missing_target_is_not_fatal() {
        let env = StubEnvironment::new();
        assert_eq!(reporter(&env).report(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn runs_until_shutdown() {
        let env = StubEnvironment::new();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(reporter(&env).run(rx));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), 3);
    }
}
