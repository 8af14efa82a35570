use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::digest::{DigestEngine, DigestOutcome};
use crate::error::RefreshError;
use crate::refresh::{RefreshOrchestrator, RefreshReport};

#[derive(Debug, Clone, Copy)]
pub struct ScheduleConfig {
    pub interval: Duration,
}

#[derive(Debug)]
pub struct CycleReport {
    pub refresh: Result<RefreshReport, RefreshError>,
    pub digest: DigestOutcome,
}

/// One refresh run followed by a digest pass. A failed refresh still lets the
/// digest reconcile or recompute.
pub async fn run_cycle(
    orchestrator: &RefreshOrchestrator,
    digest: &DigestEngine,
    cancel: &CancellationToken,
) -> CycleReport {
    let refresh = orchestrator.run(cancel).await;
    if let Err(err) = &refresh {
        warn!(error = %err, "refresh run failed");
    }
    let digest = digest.refresh().await;
    CycleReport { refresh, digest }
}

pub struct SchedulerHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops the loop, cancelling any refresh in progress.
    pub async fn stop(self) -> Result<(), RefreshError> {
        self.token.cancel();
        self.join.await.map_err(RefreshError::from)
    }
}

pub fn spawn_scheduler(
    orchestrator: RefreshOrchestrator,
    digest: Arc<DigestEngine>,
    config: ScheduleConfig,
) -> SchedulerHandle {
    let token = CancellationToken::new();
    let run_token = token.clone();
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = run_token.cancelled() => {
                    info!("scheduler shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    let report = run_cycle(&orchestrator, &digest, &run_token).await;
                    info!(digest = ?report.digest, "cycle finished");
                }
            }
        }
    });

    SchedulerHandle {
        token,
        join,
    }
}
