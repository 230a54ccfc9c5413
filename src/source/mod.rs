pub mod memory;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::core::Result;

pub use memory::MemorySource;

/// A readable migration payload as handed out by a source driver.
///
/// Bodies are streams so drivers can defer I/O; the prefetch pipeline
/// materializes them into buffers off the critical path.
pub type MigrationBody = Box<dyn AsyncRead + Send + Unpin>;

/// Abstract access to an ordered, sparse set of migration versions and
/// their up/down payloads.
///
/// Versions are non-negative integers totally ordered by the driver; gaps
/// are allowed. Absence of a version or payload is reported as
/// [`Error::NotExist`](crate::Error::NotExist), which the planner treats
/// as a distinguishable condition rather than a failure.
///
/// A version is *present* iff at least one of `read_up` or `read_down`
/// yields a stream. Drivers must tolerate concurrent reads: the planner
/// walks the index while buffering tasks drain previously returned
/// streams.
#[async_trait]
pub trait SourceDriver: Send + Sync {
    /// Smallest known version.
    async fn first(&self) -> Result<u64>;

    /// Strictly previous version before `version`.
    async fn prev(&self, version: u64) -> Result<u64>;

    /// Strictly next version after `version`.
    async fn next(&self, version: u64) -> Result<u64>;

    /// Up payload and identifier for `version`.
    async fn read_up(&self, version: u64) -> Result<(MigrationBody, String)>;

    /// Down payload and identifier for `version`.
    async fn read_down(&self, version: u64) -> Result<(MigrationBody, String)>;

    async fn close(&self) -> Result<()>;
}

/// Opens a source driver from a URL; registered per scheme in
/// [`registry`].
#[async_trait]
pub trait SourceFactory: Send + Sync {
    async fn open(&self, url: &str) -> Result<Arc<dyn SourceDriver>>;
}
