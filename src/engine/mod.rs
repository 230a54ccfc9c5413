//! The migration engine.
//!
//! Ties the pieces together: for every mutating operation it acquires the
//! advisory lock, reads the current version, starts the planner as a
//! background task feeding a bounded channel, consumes that channel with
//! the runner, and releases the lock on every exit path.

pub mod stop;

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::core::url::scheme_from_url;
use crate::core::{Error, Result, NIL_VERSION};
use crate::database::{self, DatabaseDriver};
use crate::logging::Logger;
use crate::planner::Planner;
use crate::runner::Runner;
use crate::source::{self, SourceDriver};

use stop::GracefulStop;

/// Default bound on migration bodies buffered ahead of execution.
pub const DEFAULT_PREFETCH_MIGRATIONS: usize = 10;

/// Migration engine over a source driver and a database driver.
///
/// All mutating operations hold the database's advisory lock for their
/// whole duration, so at most one migrator makes progress at a time,
/// across processes as far as the driver can enforce it.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use rustmigrate::{Migrate, MemorySource, StubDatabase};
///
/// # tokio_test::block_on(async {
/// let source = Arc::new(
///     MemorySource::new()
///         .with_up(1, "create_users", "CREATE TABLE users (id bigint);")
///         .with_down(1, "drop_users", "DROP TABLE users;"),
/// );
/// let database = Arc::new(StubDatabase::new());
///
/// let engine = Migrate::with_instances("memory", source, "stub", database.clone());
/// engine.up().await?;
///
/// assert_eq!(engine.version().await?, 1);
/// assert!(database.equal_sequence(&["CREATE TABLE users (id bigint);"]));
/// # Ok::<(), rustmigrate::Error>(())
/// # }).unwrap();
/// ```
pub struct Migrate {
    source_name: String,
    source: Arc<dyn SourceDriver>,
    database_name: String,
    database: Arc<dyn DatabaseDriver>,

    /// Optional progress logger; `None` keeps runs silent.
    pub log: Option<Arc<dyn Logger>>,

    /// Bound on in-flight body buffers; `0` disables prefetching and the
    /// runner reads each body inline.
    pub prefetch_migrations: usize,

    stop: GracefulStop,
    is_locked: Mutex<bool>,
}

impl Migrate {
    /// Open both drivers from URLs via the scheme registries.
    pub async fn new(source_url: &str, database_url: &str) -> Result<Self> {
        let source_name = scheme_from_url(source_url)?;
        let database_name = scheme_from_url(database_url)?;
        let source = source::registry::open(source_url).await?;
        let database = database::registry::open(database_url).await?;
        Ok(Self::assemble(source_name, source, database_name, database))
    }

    /// Open the source from a URL and pair it with a pre-opened database
    /// driver.
    pub async fn with_database_instance(
        source_url: &str,
        database_name: &str,
        database: Arc<dyn DatabaseDriver>,
    ) -> Result<Self> {
        let source_name = scheme_from_url(source_url)?;
        let source = source::registry::open(source_url).await?;
        Ok(Self::assemble(
            source_name,
            source,
            database_name.to_string(),
            database,
        ))
    }

    /// Pair a pre-opened source driver with a database opened from a URL.
    pub async fn with_source_instance(
        source_name: &str,
        source: Arc<dyn SourceDriver>,
        database_url: &str,
    ) -> Result<Self> {
        let database_name = scheme_from_url(database_url)?;
        let database = database::registry::open(database_url).await?;
        Ok(Self::assemble(
            source_name.to_string(),
            source,
            database_name,
            database,
        ))
    }

    /// Build an engine from two pre-opened driver instances.
    pub fn with_instances(
        source_name: &str,
        source: Arc<dyn SourceDriver>,
        database_name: &str,
        database: Arc<dyn DatabaseDriver>,
    ) -> Self {
        Self::assemble(
            source_name.to_string(),
            source,
            database_name.to_string(),
            database,
        )
    }

    fn assemble(
        source_name: String,
        source: Arc<dyn SourceDriver>,
        database_name: String,
        database: Arc<dyn DatabaseDriver>,
    ) -> Self {
        Self {
            source_name,
            source,
            database_name,
            database,
            log: None,
            prefetch_migrations: DEFAULT_PREFETCH_MIGRATIONS,
            stop: GracefulStop::new(),
            is_locked: Mutex::new(false),
        }
    }

    /// Name of the source driver (its URL scheme, for URL-opened
    /// drivers).
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Name of the database driver.
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Handle for requesting a cooperative stop of the running
    /// operation. The signal is one-shot and sticky: after a stop, every
    /// later operation on this engine also stops immediately.
    pub fn graceful_stop(&self) -> GracefulStop {
        self.stop.clone()
    }

    /// Migrate to an absolute target version, up or down from the
    /// current one.
    pub async fn migrate(&self, version: u64) -> Result<()> {
        self.lock().await?;

        let cur = match self.database.version().await {
            Ok(v) => v,
            Err(e) => return self.unlock_err(e).await,
        };

        let (tx, rx) = mpsc::channel(self.channel_capacity());
        let planner = self.planner();
        tokio::spawn(async move { planner.plan_absolute(cur, version as i64, tx).await });

        let result = self.runner().run_migrations(rx).await;
        self.unlock_res(result).await
    }

    /// Apply `n` migrations upward (`n > 0`) or downward (`n < 0`).
    pub async fn steps(&self, n: i64) -> Result<()> {
        if n == 0 {
            return Err(Error::NoChange);
        }

        self.lock().await?;

        let cur = match self.database.version().await {
            Ok(v) => v,
            Err(e) => return self.unlock_err(e).await,
        };

        let (tx, rx) = mpsc::channel(self.channel_capacity());
        let planner = self.planner();
        if n > 0 {
            tokio::spawn(async move { planner.plan_up(cur, n, tx).await });
        } else {
            tokio::spawn(async move { planner.plan_down(cur, -n, tx).await });
        }

        let result = self.runner().run_migrations(rx).await;
        self.unlock_res(result).await
    }

    /// Apply all remaining up migrations.
    pub async fn up(&self) -> Result<()> {
        self.lock().await?;

        let cur = match self.database.version().await {
            Ok(v) => v,
            Err(e) => return self.unlock_err(e).await,
        };

        let (tx, rx) = mpsc::channel(self.channel_capacity());
        let planner = self.planner();
        tokio::spawn(async move { planner.plan_up(cur, -1, tx).await });

        let result = self.runner().run_migrations(rx).await;
        self.unlock_res(result).await
    }

    /// Reverse everything, down to the empty database.
    pub async fn down(&self) -> Result<()> {
        self.lock().await?;

        let cur = match self.database.version().await {
            Ok(v) => v,
            Err(e) => return self.unlock_err(e).await,
        };

        let (tx, rx) = mpsc::channel(self.channel_capacity());
        let planner = self.planner();
        tokio::spawn(async move { planner.plan_down(cur, -1, tx).await });

        let result = self.runner().run_migrations(rx).await;
        self.unlock_res(result).await
    }

    /// Wipe the database via the driver, under the lock.
    pub async fn drop_database(&self) -> Result<()> {
        self.lock().await?;

        if let Err(e) = self.database.drop_database().await {
            return self.unlock_err(e).await;
        }

        self.unlock().await
    }

    /// Currently applied version, or
    /// [`Error::NilVersion`](crate::Error::NilVersion) for an empty
    /// database.
    pub async fn version(&self) -> Result<u64> {
        let v = self.database.version().await?;
        if v == NIL_VERSION {
            return Err(Error::NilVersion);
        }
        Ok(v as u64)
    }

    /// Close both drivers concurrently and report each outcome.
    ///
    /// Does not release the lock; callers are expected to have finished
    /// their operations first.
    pub async fn close(&self) -> (Result<()>, Result<()>) {
        tokio::join!(self.source.close(), self.database.close())
    }

    fn planner(&self) -> Planner {
        Planner::new(
            Arc::clone(&self.source),
            self.stop.clone(),
            self.prefetch_migrations,
            self.log.clone(),
        )
    }

    fn runner(&self) -> Runner {
        Runner::new(
            Arc::clone(&self.database),
            self.stop.clone(),
            self.log.clone(),
        )
    }

    // The channel always has room for at least the terminal element;
    // prefetch 0 only disables background buffering.
    fn channel_capacity(&self) -> usize {
        self.prefetch_migrations.max(1)
    }

    /// Take the process-local flag, then the database-side lock.
    async fn lock(&self) -> Result<()> {
        let mut locked = self.is_locked.lock().await;

        if *locked {
            return Err(Error::Locked);
        }

        self.database.lock().await?;
        *locked = true;
        tracing::debug!(database = %self.database_name, "acquired migration lock");
        Ok(())
    }

    async fn unlock(&self) -> Result<()> {
        let mut locked = self.is_locked.lock().await;

        if let Err(e) = self.database.unlock().await {
            // A driver that keeps failing here wedges the engine; see
            // the stub tests for how this surfaces.
            tracing::warn!(database = %self.database_name, error = %e, "unlock failed, lock flag stays set");
            return Err(e);
        }

        *locked = false;
        Ok(())
    }

    /// Release the lock and fold an unlock failure into the operation's
    /// result.
    async fn unlock_res(&self, result: Result<()>) -> Result<()> {
        match self.unlock().await {
            Ok(()) => result,
            Err(unlock_err) => match result {
                Ok(()) => Err(unlock_err),
                Err(prev) => Err(Error::multi(prev, unlock_err)),
            },
        }
    }

    async fn unlock_err(&self, prev: Error) -> Result<()> {
        self.unlock_res(Err(prev)).await
    }
}
