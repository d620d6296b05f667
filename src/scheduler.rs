//! Drives repeated scan cycles on a fixed interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use cidr_utils::cidr::IpCidr;
use log::debug;
use tokio::sync::watch;
use tokio::time;

use crate::address;
use crate::detail;
use crate::input::ScanOrder;
use crate::scanner::ScanCoordinator;
use crate::store::DiscoveryStore;

/// Final figures reported when the scheduler stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    /// Cycles that ran to completion and produced a summary.
    pub cycles_completed: u32,
    /// Distinct server identities seen over the whole run.
    pub unique_servers: usize,
}

/// Repeats coordinator cycles until the cycle budget or the shutdown
/// signal stops it: Idle -> Running -> (Sleeping -> Running)* -> Stopped.
pub struct ScanScheduler {
    coordinator: ScanCoordinator,
    store: Arc<DiscoveryStore>,
    ranges: Vec<IpCidr>,
    order: ScanOrder,
    interval: Duration,
    max_cycles: Option<u32>,
    shutdown: watch::Receiver<bool>,
    greppable: bool,
    accessible: bool,
}

#[allow(clippy::too_many_arguments)]
impl ScanScheduler {
    pub fn new(
        coordinator: ScanCoordinator,
        store: Arc<DiscoveryStore>,
        ranges: Vec<IpCidr>,
        order: ScanOrder,
        interval: Duration,
        max_cycles: Option<u32>,
        shutdown: watch::Receiver<bool>,
        greppable: bool,
        accessible: bool,
    ) -> Self {
        Self {
            coordinator,
            store,
            ranges,
            order,
            interval,
            max_cycles,
            shutdown,
            greppable,
            accessible,
        }
    }

    /// Runs until stopped. A cycle abandoned by cancellation is not
    /// counted; the wait between cycles is interruptible.
    pub async fn run(mut self) -> RunStats {
        let mut cycles_completed: u32 = 0;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            // Fresh expansion every cycle so a random order reshuffles.
            let targets = address::expand(&self.ranges, self.order);
            detail!(
                format!(
                    "Scan #{} - {} - {} targets",
                    cycles_completed + 1,
                    Local::now().format("%Y-%m-%d %H:%M:%S"),
                    targets.len()
                ),
                self.greppable,
                self.accessible
            );

            let started = Instant::now();
            let Some(summary) = self
                .coordinator
                .run_cycle(cycles_completed + 1, targets)
                .await
            else {
                debug!("scheduler stopping on an abandoned cycle");
                break;
            };
            cycles_completed += 1;

            let elapsed = started.elapsed().as_secs_f64();
            detail!(
                format!(
                    "Scan #{} completed in {elapsed:.2}s: {} found ({} new)",
                    summary.scan_number, summary.total_found, summary.total_new
                ),
                self.greppable,
                self.accessible
            );

            if let Some(max) = self.max_cycles {
                if cycles_completed >= max {
                    detail!(
                        format!("Reached maximum scan count ({max})."),
                        self.greppable,
                        self.accessible
                    );
                    break;
                }
            }

            if let Ok(delta) = chrono::TimeDelta::from_std(self.interval) {
                detail!(
                    format!(
                        "Next scan will start at {}",
                        (Local::now() + delta).format("%Y-%m-%d %H:%M:%S")
                    ),
                    self.greppable,
                    self.accessible
                );
            }

            // Sleeping state; any shutdown wake stops the run promptly.
            tokio::select! {
                () = time::sleep(self.interval) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        RunStats {
            cycles_completed,
            unique_servers: self.store.len(),
        }
    }
}
