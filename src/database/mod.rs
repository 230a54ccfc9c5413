pub mod registry;
pub mod stub;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::Result;

pub use stub::StubDatabase;

/// Abstract migration target: version bookkeeping, statement execution
/// and cross-process locking.
///
/// The engine serializes calls: `run` is only invoked between a
/// successful `lock` and the matching `unlock`, and never concurrently
/// with either.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Currently recorded version, or
    /// [`NIL_VERSION`](crate::NIL_VERSION) if no migration has ever been
    /// applied.
    async fn version(&self) -> Result<i64>;

    /// Apply `body` (if any) and atomically record `target_version`.
    ///
    /// An absent body still records the version change; that is how empty
    /// migrations advance the database.
    async fn run(&self, target_version: i64, body: Option<Bytes>) -> Result<()>;

    /// Acquire database-side mutual exclusion across processes.
    async fn lock(&self) -> Result<()>;

    /// Release the database-side lock.
    async fn unlock(&self) -> Result<()>;

    /// Wipe all state the driver manages.
    async fn drop_database(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Opens a database driver from a URL; registered per scheme in
/// [`registry`].
#[async_trait]
pub trait DatabaseFactory: Send + Sync {
    async fn open(&self, url: &str) -> Result<Arc<dyn DatabaseDriver>>;
}
