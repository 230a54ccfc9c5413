//! In-memory source driver.
//!
//! Holds an ordered, sparse version index with per-version up/down
//! payloads. Useful for embedding migration sets directly in a binary and
//! as the test vehicle for the planner.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::{Error, Result};
use crate::source::{MigrationBody, SourceDriver, SourceFactory};

#[derive(Default, Clone)]
struct Artifact {
    up: Option<(String, Bytes)>,
    down: Option<(String, Bytes)>,
}

/// Source driver over an in-memory migration set.
///
/// Built up front with [`with_up`](MemorySource::with_up) /
/// [`with_down`](MemorySource::with_down) and immutable afterwards, so
/// concurrent reads from the planner and buffering tasks are safe.
///
/// # Examples
///
/// ```
/// use rustmigrate::MemorySource;
/// use rustmigrate::source::SourceDriver;
///
/// # tokio_test::block_on(async {
/// let source = MemorySource::new()
///     .with_up(1, "create_users", "CREATE TABLE users (id bigint);")
///     .with_down(1, "drop_users", "DROP TABLE users;")
///     .with_up(3, "create_pets", "CREATE TABLE pets (id bigint);");
///
/// assert_eq!(source.first().await?, 1);
/// assert_eq!(source.next(1).await?, 3);
/// # Ok::<(), rustmigrate::Error>(())
/// # }).unwrap();
/// ```
#[derive(Default)]
pub struct MemorySource {
    artifacts: BTreeMap<u64, Artifact>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an up payload for `version`.
    pub fn with_up(mut self, version: u64, identifier: &str, body: impl Into<Bytes>) -> Self {
        self.artifacts.entry(version).or_default().up = Some((identifier.to_string(), body.into()));
        self
    }

    /// Add a down payload for `version`.
    pub fn with_down(mut self, version: u64, identifier: &str, body: impl Into<Bytes>) -> Self {
        self.artifacts.entry(version).or_default().down =
            Some((identifier.to_string(), body.into()));
        self
    }

    fn read(&self, slot: &Option<(String, Bytes)>) -> Result<(MigrationBody, String)> {
        match slot {
            Some((identifier, body)) => {
                let reader: MigrationBody = Box::new(Cursor::new(body.clone()));
                Ok((reader, identifier.clone()))
            }
            None => Err(Error::NotExist),
        }
    }
}

#[async_trait]
impl SourceDriver for MemorySource {
    async fn first(&self) -> Result<u64> {
        self.artifacts.keys().next().copied().ok_or(Error::NotExist)
    }

    async fn prev(&self, version: u64) -> Result<u64> {
        self.artifacts
            .range(..version)
            .next_back()
            .map(|(v, _)| *v)
            .ok_or(Error::NotExist)
    }

    async fn next(&self, version: u64) -> Result<u64> {
        self.artifacts
            .range((Excluded(version), Unbounded))
            .next()
            .map(|(v, _)| *v)
            .ok_or(Error::NotExist)
    }

    async fn read_up(&self, version: u64) -> Result<(MigrationBody, String)> {
        let artifact = self.artifacts.get(&version).ok_or(Error::NotExist)?;
        self.read(&artifact.up)
    }

    async fn read_down(&self, version: u64) -> Result<(MigrationBody, String)> {
        let artifact = self.artifacts.get(&version).ok_or(Error::NotExist)?;
        self.read(&artifact.down)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Factory for the `memory://` scheme; opens an empty migration set.
pub struct MemorySourceFactory;

#[async_trait]
impl SourceFactory for MemorySourceFactory {
    async fn open(&self, _url: &str) -> Result<Arc<dyn SourceDriver>> {
        Ok(Arc::new(MemorySource::new()))
    }
}
