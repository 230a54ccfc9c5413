//! Migration planner.
//!
//! Walks the source driver's version index from the database's current
//! version toward a target (absolute version or signed step limit) and
//! emits the ordered sequence of migration records through a bounded
//! channel. The channel element is a two-arm sum: a record to apply, or a
//! terminal error after which nothing further is sent.
//!
//! Planning runs as its own task; the bounded channel provides the
//! backpressure that keeps at most the prefetch depth of payloads in
//! flight.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::{Error, Result, NIL_VERSION};
use crate::engine::stop::GracefulStop;
use crate::logging::Logger;
use crate::migration::Migration;
use crate::source::SourceDriver;

/// One pipeline element: a planned record or a terminal error.
pub(crate) type PlanItem = Result<Migration>;

pub(crate) struct Planner {
    source: Arc<dyn SourceDriver>,
    stop: GracefulStop,
    prefetch: usize,
    log: Option<Arc<dyn Logger>>,
}

impl Planner {
    pub(crate) fn new(
        source: Arc<dyn SourceDriver>,
        stop: GracefulStop,
        prefetch: usize,
        log: Option<Arc<dyn Logger>>,
    ) -> Self {
        Self {
            source,
            stop,
            prefetch,
            log,
        }
    }

    /// Plan from `from` to the absolute version `to`.
    pub(crate) async fn plan_absolute(self, from: i64, to: i64, tx: mpsc::Sender<PlanItem>) {
        if let Err(e) = self.absolute_steps(from, to, &tx).await {
            let _ = tx.send(Err(e)).await;
        }
    }

    /// Plan up to `limit` upward steps; `limit == -1` means unbounded.
    pub(crate) async fn plan_up(self, from: i64, limit: i64, tx: mpsc::Sender<PlanItem>) {
        if let Err(e) = self.up_steps(from, limit, &tx).await {
            let _ = tx.send(Err(e)).await;
        }
    }

    /// Plan up to `limit` downward steps; `limit == -1` means unbounded.
    pub(crate) async fn plan_down(self, from: i64, limit: i64, tx: mpsc::Sender<PlanItem>) {
        if let Err(e) = self.down_steps(from, limit, &tx).await {
            let _ = tx.send(Err(e)).await;
        }
    }

    async fn absolute_steps(
        &self,
        mut from: i64,
        to: i64,
        tx: &mpsc::Sender<PlanItem>,
    ) -> Result<()> {
        if from >= 0 {
            self.version_exists(from as u64).await?;
        }
        if to >= 0 {
            self.version_exists(to as u64).await?;
        }
        if from == to {
            return Err(Error::NoChange);
        }

        if from < to {
            // Upward. An empty database first steps onto the smallest
            // known version.
            if from == NIL_VERSION {
                let first = self.source.first().await?;
                let migr = self.new_migration(first, first as i64).await?;
                if !self.emit(tx, migr).await {
                    return Ok(());
                }
                from = first as i64;
            }

            while from < to {
                if self.stop.is_stopped() {
                    return Ok(());
                }
                let next = self.source.next(from as u64).await?;
                let migr = self.new_migration(next, next as i64).await?;
                if !self.emit(tx, migr).await {
                    return Ok(());
                }
                from = next as i64;
            }
        } else {
            // Downward.
            while from > to && from >= 0 {
                if self.stop.is_stopped() {
                    return Ok(());
                }
                match self.source.prev(from as u64).await {
                    Ok(prev) => {
                        let migr = self.new_migration(from as u64, prev as i64).await?;
                        if !self.emit(tx, migr).await {
                            return Ok(());
                        }
                        from = prev as i64;
                    }
                    Err(Error::NotExist) if to == NIL_VERSION => {
                        // Fell off the beginning: one terminal record
                        // takes the database to the empty state.
                        let migr = self.new_migration(from as u64, NIL_VERSION).await?;
                        let _ = self.emit(tx, migr).await;
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(())
    }

    async fn up_steps(&self, mut from: i64, limit: i64, tx: &mpsc::Sender<PlanItem>) -> Result<()> {
        if limit == 0 {
            return Err(Error::NoChange);
        }
        if from >= 0 {
            self.version_exists(from as u64).await?;
        }

        let mut count: i64 = 0;
        while count < limit || limit == -1 {
            if self.stop.is_stopped() {
                return Ok(());
            }

            if from == NIL_VERSION {
                let first = self.source.first().await?;
                let migr = self.new_migration(first, first as i64).await?;
                if !self.emit(tx, migr).await {
                    return Ok(());
                }
                from = first as i64;
                count += 1;
                continue;
            }

            match self.source.next(from as u64).await {
                Ok(next) => {
                    let migr = self.new_migration(next, next as i64).await?;
                    if !self.emit(tx, migr).await {
                        return Ok(());
                    }
                    from = next as i64;
                    count += 1;
                }
                Err(Error::NotExist) => {
                    // Unbounded run with nothing applied is a no-op;
                    // unbounded run that did apply ends silently.
                    if limit == -1 && count == 0 {
                        return Err(Error::NoChange);
                    }
                    if limit == -1 {
                        return Ok(());
                    }
                    // Bounded run that never started references a
                    // missing version; a partial one reports the
                    // shortfall.
                    if count == 0 {
                        return Err(Error::NotExist);
                    }
                    return Err(Error::ShortLimit {
                        short: (limit - count) as u64,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    async fn down_steps(
        &self,
        mut from: i64,
        limit: i64,
        tx: &mpsc::Sender<PlanItem>,
    ) -> Result<()> {
        if limit == 0 {
            return Err(Error::NoChange);
        }
        if from >= 0 {
            self.version_exists(from as u64).await?;
        }
        if from == NIL_VERSION && limit == -1 {
            return Err(Error::NoChange);
        }
        if from == NIL_VERSION && limit > 0 {
            return Err(Error::NotExist);
        }

        let mut count: i64 = 0;
        while count < limit || limit == -1 {
            if self.stop.is_stopped() {
                return Ok(());
            }

            match self.source.prev(from as u64).await {
                Ok(prev) => {
                    let migr = self.new_migration(from as u64, prev as i64).await?;
                    if !self.emit(tx, migr).await {
                        return Ok(());
                    }
                    from = prev as i64;
                    count += 1;
                }
                Err(Error::NotExist) => {
                    if limit == -1 || limit - count > 0 {
                        let first = self.source.first().await?;
                        let migr = self.new_migration(first, NIL_VERSION).await?;
                        if !self.emit(tx, migr).await {
                            return Ok(());
                        }
                        count += 1;
                    }
                    if count < limit {
                        return Err(Error::ShortLimit {
                            short: (limit - count) as u64,
                        });
                    }
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Build the record for one step, reading the payload in the step's
    /// direction. A missing payload downgrades to an empty migration;
    /// other read failures abort the plan before any partial record is
    /// emitted.
    async fn new_migration(&self, version: u64, target_version: i64) -> Result<Migration> {
        let read = if target_version >= version as i64 {
            self.source.read_up(version).await
        } else {
            self.source.read_down(version).await
        };

        let migr = match read {
            Ok((body, identifier)) => Migration::new(Some(body), identifier, version, target_version),
            Err(Error::NotExist) => Migration::new(None, String::new(), version, target_version),
            Err(e) => return Err(e),
        };

        if self.prefetch > 0 && migr.has_body() {
            self.log_verbose(&format!("Start buffering {migr}"));
        } else {
            self.log_verbose(&format!("Scheduled {migr}"));
        }

        Ok(migr)
    }

    /// Start buffering (when prefetch is enabled) and send the record.
    /// Returns false when the runner is gone and planning should stop.
    ///
    /// Capacity is reserved before buffering starts, so the number of
    /// in-flight buffers never exceeds the prefetch depth.
    async fn emit(&self, tx: &mpsc::Sender<PlanItem>, mut migr: Migration) -> bool {
        let Ok(permit) = tx.reserve().await else {
            return false;
        };
        if self.prefetch > 0 {
            migr.start_buffering();
        }
        permit.send(Ok(migr));
        true
    }

    /// A version is present iff at least one payload direction exists.
    async fn version_exists(&self, version: u64) -> Result<()> {
        match self.source.read_up(version).await {
            Ok(_) => return Ok(()),
            Err(Error::NotExist) => {}
            Err(e) => return Err(e),
        }
        match self.source.read_down(version).await {
            Ok(_) => Ok(()),
            Err(Error::NotExist) => Err(Error::NotExist),
            Err(e) => Err(e),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn sparse_source() -> Arc<MemorySource> {
        let mut source = MemorySource::new();
        for v in [1u64, 3, 4, 5, 7] {
            source = source
                .with_up(v, &format!("step_{v}"), format!("u{v}"))
                .with_down(v, &format!("step_{v}"), format!("d{v}"));
        }
        Arc::new(source)
    }

    fn planner(source: Arc<MemorySource>) -> Planner {
        Planner::new(source, GracefulStop::new(), 1, None)
    }

    async fn drain(mut rx: mpsc::Receiver<PlanItem>) -> Vec<PlanItem> {
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    fn steps(items: &[PlanItem]) -> Vec<(u64, i64)> {
        items
            .iter()
            .filter_map(|item| {
                item.as_ref()
                    .ok()
                    .map(|m| (m.version, m.target_version))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_absolute_up_from_empty() {
        let (tx, rx) = mpsc::channel(64);
        planner(sparse_source()).plan_absolute(-1, 7, tx).await;
        let items = drain(rx).await;

        assert_eq!(steps(&items), vec![(1, 1), (3, 3), (4, 4), (5, 5), (7, 7)]);
        assert_eq!(items.len(), 5);
    }

    #[tokio::test]
    async fn test_absolute_down_between_versions() {
        let (tx, rx) = mpsc::channel(64);
        planner(sparse_source()).plan_absolute(7, 4, tx).await;
        let items = drain(rx).await;

        assert_eq!(steps(&items), vec![(7, 5), (5, 4)]);
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_absolute_same_version_is_no_change() {
        let (tx, rx) = mpsc::channel(64);
        planner(sparse_source()).plan_absolute(3, 3, tx).await;
        let items = drain(rx).await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(Error::NoChange)));
    }

    #[tokio::test]
    async fn test_absolute_missing_target() {
        let (tx, rx) = mpsc::channel(64);
        planner(sparse_source()).plan_absolute(-1, 9, tx).await;
        let items = drain(rx).await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(Error::NotExist)));
    }

    #[tokio::test]
    async fn test_absolute_missing_current_version() {
        let (tx, rx) = mpsc::channel(64);
        planner(sparse_source()).plan_absolute(2, 7, tx).await;
        let items = drain(rx).await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(Error::NotExist)));
    }

    #[tokio::test]
    async fn test_up_unbounded() {
        let (tx, rx) = mpsc::channel(64);
        planner(sparse_source()).plan_up(-1, -1, tx).await;
        let items = drain(rx).await;

        assert_eq!(steps(&items), vec![(1, 1), (3, 3), (4, 4), (5, 5), (7, 7)]);
        assert_eq!(items.len(), 5);
    }

    #[tokio::test]
    async fn test_up_bounded() {
        let (tx, rx) = mpsc::channel(64);
        planner(sparse_source()).plan_up(3, 2, tx).await;
        let items = drain(rx).await;

        assert_eq!(steps(&items), vec![(4, 4), (5, 5)]);
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_up_short_limit_reports_shortfall() {
        let (tx, rx) = mpsc::channel(64);
        planner(sparse_source()).plan_up(3, 10, tx).await;
        let items = drain(rx).await;

        assert_eq!(steps(&items), vec![(4, 4), (5, 5), (7, 7)]);
        assert_eq!(items.len(), 4);
        assert!(matches!(items[3], Err(Error::ShortLimit { short: 7 })));
    }

    #[tokio::test]
    async fn test_up_at_head_unbounded_is_no_change() {
        let (tx, rx) = mpsc::channel(64);
        planner(sparse_source()).plan_up(7, -1, tx).await;
        let items = drain(rx).await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(Error::NoChange)));
    }

    #[tokio::test]
    async fn test_up_at_head_bounded_is_not_exist() {
        let (tx, rx) = mpsc::channel(64);
        planner(sparse_source()).plan_up(7, 3, tx).await;
        let items = drain(rx).await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(Error::NotExist)));
    }

    #[tokio::test]
    async fn test_up_zero_limit_is_no_change() {
        let (tx, rx) = mpsc::channel(64);
        planner(sparse_source()).plan_up(3, 0, tx).await;
        let items = drain(rx).await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(Error::NoChange)));
    }

    #[tokio::test]
    async fn test_down_unbounded_reaches_empty_state() {
        let (tx, rx) = mpsc::channel(64);
        planner(sparse_source()).plan_down(7, -1, tx).await;
        let items = drain(rx).await;

        assert_eq!(
            steps(&items),
            vec![(7, 5), (5, 4), (4, 3), (3, 1), (1, -1)]
        );
        assert_eq!(items.len(), 5);
    }

    #[tokio::test]
    async fn test_down_bounded() {
        let (tx, rx) = mpsc::channel(64);
        planner(sparse_source()).plan_down(3, 1, tx).await;
        let items = drain(rx).await;

        assert_eq!(steps(&items), vec![(3, 1)]);
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn test_down_past_beginning_reports_shortfall() {
        let (tx, rx) = mpsc::channel(64);
        planner(sparse_source()).plan_down(1, 5, tx).await;
        let items = drain(rx).await;

        // The terminal record still lands on the empty state, then the
        // shortfall is reported.
        assert_eq!(steps(&items), vec![(1, -1)]);
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(Error::ShortLimit { short: 4 })));
    }

    #[tokio::test]
    async fn test_down_on_empty_database() {
        let (tx, rx) = mpsc::channel(64);
        planner(sparse_source()).plan_down(-1, -1, tx).await;
        let items = drain(rx).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(Error::NoChange)));

        let (tx, rx) = mpsc::channel(64);
        planner(sparse_source()).plan_down(-1, 2, tx).await;
        let items = drain(rx).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(Error::NotExist)));
    }

    #[tokio::test]
    async fn test_missing_payload_becomes_empty_migration() {
        // Version 2 is present through its down payload only, so the up
        // step to it is an empty migration.
        let source = Arc::new(
            MemorySource::new()
                .with_up(1, "one", "u1")
                .with_down(2, "two", "d2"),
        );

        let (tx, rx) = mpsc::channel(64);
        planner(source).plan_up(1, 1, tx).await;
        let items = drain(rx).await;

        assert_eq!(items.len(), 1);
        let migr = items[0].as_ref().unwrap();
        assert_eq!((migr.version, migr.target_version), (2, 2));
        assert!(!migr.has_body());
    }

    #[tokio::test]
    async fn test_stop_closes_channel_without_emitting() {
        let stop = GracefulStop::new();
        stop.stop();
        let planner = Planner::new(sparse_source(), stop, 1, None);

        let (tx, rx) = mpsc::channel(64);
        planner.plan_up(-1, -1, tx).await;
        let items = drain(rx).await;

        assert!(items.is_empty());
    }
}
