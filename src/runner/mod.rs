//! Migration runner.
//!
//! Consumes the planner's channel in FIFO order and drives the database
//! driver. The first error element (or driver failure) aborts the run;
//! records still in the channel are dropped and their buffering tasks
//! drain into discarded buffers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::core::Result;
use crate::database::DatabaseDriver;
use crate::engine::stop::GracefulStop;
use crate::logging::Logger;
use crate::migration::Migration;
use crate::planner::PlanItem;

pub(crate) struct Runner {
    database: Arc<dyn DatabaseDriver>,
    stop: GracefulStop,
    log: Option<Arc<dyn Logger>>,
}

impl Runner {
    pub(crate) fn new(
        database: Arc<dyn DatabaseDriver>,
        stop: GracefulStop,
        log: Option<Arc<dyn Logger>>,
    ) -> Self {
        Self {
            database,
            stop,
            log,
        }
    }

    /// Apply records until the channel closes.
    ///
    /// A cooperative stop observed between records ends the run with
    /// `Ok(())`; whatever was applied before the stop stays applied.
    pub(crate) async fn run_migrations(&self, mut rx: mpsc::Receiver<PlanItem>) -> Result<()> {
        while let Some(item) = rx.recv().await {
            if self.stop.is_stopped() {
                tracing::debug!("graceful stop observed, ending run");
                return Ok(());
            }

            let mut migr = item?;

            if migr.has_body() {
                self.log_verbose(&format!("Read and execute {migr}"));
            } else {
                self.log_verbose(&format!("Execute {migr}"));
            }

            match migr.take_body().await? {
                Some((body, finished_reading)) => {
                    self.database.run(migr.target_version, Some(body)).await?;
                    let started = migr.started_buffering().unwrap_or(finished_reading);
                    let read_time = finished_reading.duration_since(started);
                    let run_time = finished_reading.elapsed();
                    self.log_applied(&migr, read_time, run_time);
                }
                None => {
                    let run_start = Instant::now();
                    self.database.run(migr.target_version, None).await?;
                    self.log_applied(&migr, Duration::ZERO, run_start.elapsed());
                }
            }
        }

        Ok(())
    }

    fn log_applied(&self, migr: &Migration, read_time: Duration, run_time: Duration) {
        tracing::debug!(migration = %migr, ?read_time, ?run_time, "applied");

        if let Some(log) = &self.log {
            if log.verbose() {
                log.log(&format!(
                    "Finished {migr} (read {read_time:?}, ran {run_time:?})"
                ));
            } else {
                log.log(&format!("{migr} ({:?})", read_time + run_time));
            }
        }
    }

    fn log_verbose(&self, line: &str) {
        if let Some(log) = &self.log {
            if log.verbose() {
                log.log(line);
            }
        }
    }
}
