// ============================================================================
// rustmigrate - database schema migration engine
// ============================================================================
//
// Moves a target database between versions using numbered up/down
// migration artifacts served by a source driver. Payloads for upcoming
// steps are buffered concurrently with the application of earlier ones,
// and every mutating operation runs under a distributed advisory lock.

pub mod core;
pub mod database;
pub mod engine;
pub mod logging;
pub mod migration;
mod planner;
mod runner;
pub mod source;

// Re-export the main types for convenience
pub use crate::core::{Error, Result, NIL_VERSION};
pub use crate::database::{DatabaseDriver, DatabaseFactory, StubDatabase};
pub use crate::engine::{stop::GracefulStop, Migrate, DEFAULT_PREFETCH_MIGRATIONS};
pub use crate::logging::Logger;
pub use crate::migration::Migration;
pub use crate::source::{MemorySource, MigrationBody, SourceDriver, SourceFactory};
