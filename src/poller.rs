//! Periodic driver for the dispatcher and the reaper.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, error, info};

use crate::config::PipelineConfig;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::reaper::Reaper;
use crate::store::TaskStore;

/// Drives [`Dispatcher::dispatch_once`] and [`Reaper::reap_once`] at fixed
/// intervals. Deployments that trigger over HTTP instead (external cron
/// hitting `/tasks/process`) simply never start it.
pub struct Poller<S> {
    dispatcher: Arc<Dispatcher<S>>,
    reaper: Arc<Reaper<S>>,
    dispatch_interval: Duration,
    reap_interval: Duration,
}

impl<S: TaskStore + 'static> Poller<S> {
    pub fn new(
        dispatcher: Arc<Dispatcher<S>>,
        reaper: Arc<Reaper<S>>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            dispatcher,
            reaper,
            dispatch_interval: config.dispatch_interval,
            reap_interval: config.reap_interval,
        }
    }

    /// Run both loops indefinitely.
    pub async fn run(&self) -> ! {
        let dispatcher = self.dispatcher.clone();
        let dispatch_interval = self.dispatch_interval;
        let dispatch_handle =
            tokio::spawn(async move { Self::run_dispatch(dispatcher, dispatch_interval).await });

        let reaper = self.reaper.clone();
        let reap_interval = self.reap_interval;
        let reap_handle = tokio::spawn(async move { Self::run_reap(reaper, reap_interval).await });

        // Keep handles in scope to maintain task references
        let _ = (dispatch_handle, reap_handle);

        // Wait forever (both loops run indefinitely)
        futures::future::pending::<()>().await;
        unreachable!()
    }

    async fn run_dispatch(dispatcher: Arc<Dispatcher<S>>, every: Duration) {
        info!(interval_secs = every.as_secs(), "starting dispatch loop");

        let mut ticker = interval(every);
        ticker.tick().await; // consume the immediate first tick

        loop {
            ticker.tick().await;
            // Drain until idle; each iteration is an independent claim, so a
            // long task chain finishes within one tick rather than one task
            // per tick.
            loop {
                match dispatcher.dispatch_once().await {
                    Ok(DispatchOutcome::Processed { .. }) => continue,
                    Ok(DispatchOutcome::Idle) => break,
                    Err(e) => {
                        error!(error = %e, "dispatch attempt failed");
                        break;
                    }
                }
            }
        }
    }

    async fn run_reap(reaper: Arc<Reaper<S>>, every: Duration) {
        info!(interval_secs = every.as_secs(), "starting reaper loop");

        let mut ticker = interval(every);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match reaper.reap_once().await {
                Ok(report) if report.processed > 0 => {
                    debug!(processed = report.processed, "reaper sweep done");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "reaper sweep failed"),
            }
        }
    }
}
