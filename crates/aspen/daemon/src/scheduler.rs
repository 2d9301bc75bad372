//! The recurring evaluation loop.
//!
//! Ticks on a fixed interval; each tick runs one engine cycle. Scheduled
//! agents are checked every tick, realtime agents become due on the
//! engine's own cadence. Shutdown is cooperative: an in-flight cycle
//! finishes before the loop exits so no platform mutation is abandoned
//! mid-flight.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use aspen_engine::Orchestrator;

/// Runs engine cycles until shutdown is signalled.
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, tick: Duration) -> Self {
        Self { orchestrator, tick }
    }

    /// Run the loop. Returns once `shutdown` flips to `true` and the
    /// current cycle (if any) has completed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(tick_secs = self.tick.as_secs(), "scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.orchestrator.run_cycle(Utc::now()).await {
                        Ok(report) => {
                            if report.agents_evaluated > 0 {
                                info!(
                                    agents = report.agents_evaluated,
                                    units = report.units_evaluated,
                                    triggers = report.triggers_fired,
                                    unit_errors = report.unit_errors,
                                    "cycle finished"
                                );
                            }
                        }
                        Err(e) => error!(error = %e, "cycle failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler stopping");
                        break;
                    }
                }
            }
        }
    }
}
