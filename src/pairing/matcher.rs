//! Background matcher task.
//!
//! Drains the [`PairingQueue`] two users at a time and hands each pair to
//! [`SessionEngine::commit_match`]. Between rounds it sleeps until the queue
//! signals a new arrival, the idle tick fires or shutdown is requested.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::PairingQueue;
use crate::config::PairingConfig;
use crate::session::{MatchOutcome, SessionEngine};

/// Minimum spacing between search-timeout sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// The matcher loop and its settings.
#[derive(Debug)]
pub struct Matcher {
    engine: Arc<SessionEngine>,
    queue: Arc<PairingQueue>,
    idle: Duration,
    search_timeout: Option<chrono::Duration>,
}

impl Matcher {
    /// Build a matcher over the engine's queue.
    pub fn new(engine: Arc<SessionEngine>, config: &PairingConfig) -> Self {
        let queue = Arc::clone(engine.queue());
        let search_timeout = config
            .search_timeout_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(chrono::Duration::try_seconds);
        Self {
            engine,
            queue,
            idle: Duration::from_millis(config.idle_ms.max(1)),
            search_timeout,
        }
    }

    /// Commit the pairs available at the start of the round. Returns how
    /// many were paired.
    ///
    /// Abandoned candidates go back into the queue, so the round is bounded
    /// by the queue length it started with.
    pub async fn drain(&self) -> usize {
        let rounds = self.queue.len() / 2;
        let mut paired = 0usize;
        for _ in 0..rounds {
            let Some((a, b)) = self.queue.try_match() else {
                break;
            };
            match self.engine.commit_match(a, b).await {
                Ok(MatchOutcome::Paired(..)) => paired = paired.saturating_add(1),
                Ok(MatchOutcome::Abandoned { requeued }) => {
                    debug!(a = %a, b = %b, requeued = requeued.len(), "candidate pair dropped");
                }
                Err(e) => {
                    warn!(a = %a, b = %b, error = %e, "match commit failed");
                    break;
                }
            }
        }
        paired
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            idle_ms = u64::try_from(self.idle.as_millis()).unwrap_or(u64::MAX),
            search_timeout_secs = self.search_timeout.map(|t| t.num_seconds()),
            "matcher started"
        );
        let mut last_sweep = Instant::now();

        loop {
            let paired = self.drain().await;
            if paired > 0 {
                debug!(paired, waiting = self.queue.len(), "matcher round");
            }

            if let Some(timeout) = self.search_timeout {
                if last_sweep.elapsed() >= SWEEP_INTERVAL {
                    last_sweep = Instant::now();
                    if let Err(e) = self.engine.expire_searches(timeout).await {
                        warn!(error = %e, "search timeout sweep failed");
                    }
                }
            }

            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                () = self.queue.wait_for_pair() => {}
                () = tokio::time::sleep(self.idle) => {}
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(waiting = self.queue.len(), "matcher stopped");
    }

    /// Spawn [`Matcher::run`] on the current runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
