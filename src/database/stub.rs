//! In-memory stub database driver.
//!
//! Records every `run` call instead of executing anything, which makes it
//! the reference target for engine and planner tests: the journal exposes
//! the exact sequence of versions and bodies the engine produced.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::{Error, Result, NIL_VERSION};
use crate::database::{DatabaseDriver, DatabaseFactory};

/// Journal marker appended by [`StubDatabase::drop_database`].
pub const DROP_MARKER: &str = "DROP";

#[derive(Default)]
struct State {
    current_version: i64,
    run_versions: Vec<i64>,
    migration_sequence: Vec<String>,
    last_run_migration: Option<Bytes>,
    is_locked: bool,
    lock_calls: u64,
    unlock_calls: u64,
}

/// Database driver that applies migrations to an in-memory journal.
pub struct StubDatabase {
    state: Mutex<State>,
    fail_unlock: AtomicBool,
}

impl Default for StubDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl StubDatabase {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                current_version: NIL_VERSION,
                ..State::default()
            }),
            fail_unlock: AtomicBool::new(false),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Currently recorded version.
    pub fn current_version(&self) -> i64 {
        self.state().current_version
    }

    /// Target versions passed to `run`, in call order.
    pub fn run_versions(&self) -> Vec<i64> {
        self.state().run_versions.clone()
    }

    /// Bodies applied so far (UTF-8 lossy), plus [`DROP_MARKER`] entries.
    pub fn migration_sequence(&self) -> Vec<String> {
        self.state().migration_sequence.clone()
    }

    /// Compare the applied-body journal against an expected sequence.
    pub fn equal_sequence(&self, expected: &[&str]) -> bool {
        self.state().migration_sequence == expected
    }

    pub fn last_run_migration(&self) -> Option<Bytes> {
        self.state().last_run_migration.clone()
    }

    pub fn is_locked(&self) -> bool {
        self.state().is_locked
    }

    /// Number of `lock` invocations seen so far.
    pub fn lock_calls(&self) -> u64 {
        self.state().lock_calls
    }

    /// Number of `unlock` invocations seen so far.
    pub fn unlock_calls(&self) -> u64 {
        self.state().unlock_calls
    }

    /// Make subsequent `unlock` calls fail, for exercising error
    /// composition on the release path.
    pub fn set_fail_unlock(&self, fail: bool) {
        self.fail_unlock.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DatabaseDriver for StubDatabase {
    async fn version(&self) -> Result<i64> {
        let state = self.state();
        if state.current_version < 0 {
            return Ok(NIL_VERSION);
        }
        Ok(state.current_version)
    }

    async fn run(&self, target_version: i64, body: Option<Bytes>) -> Result<()> {
        let mut state = self.state();
        state.current_version = target_version;
        state.run_versions.push(target_version);

        if let Some(body) = body {
            state
                .migration_sequence
                .push(String::from_utf8_lossy(&body).into_owned());
            state.last_run_migration = Some(body);
        }

        Ok(())
    }

    async fn lock(&self) -> Result<()> {
        let mut state = self.state();
        state.lock_calls += 1;
        if state.is_locked {
            return Err(Error::Locked);
        }
        state.is_locked = true;
        Ok(())
    }

    async fn unlock(&self) -> Result<()> {
        let mut state = self.state();
        state.unlock_calls += 1;
        if self.fail_unlock.load(Ordering::SeqCst) {
            return Err(Error::Database("stub unlock failure".to_string()));
        }
        state.is_locked = false;
        Ok(())
    }

    async fn drop_database(&self) -> Result<()> {
        let mut state = self.state();
        state.current_version = NIL_VERSION;
        state.last_run_migration = None;
        state.migration_sequence.push(DROP_MARKER.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Factory for the `stub://` scheme.
pub struct StubDatabaseFactory;

#[async_trait]
impl DatabaseFactory for StubDatabaseFactory {
    async fn open(&self, _url: &str) -> Result<Arc<dyn DatabaseDriver>> {
        Ok(Arc::new(StubDatabase::new()))
    }
}
