//! A single planned migration step.
//!
//! The planner creates records, the pipeline channel owns them in flight,
//! and the runner consumes each exactly once. A record's payload starts
//! out as a stream from the source driver; with prefetch enabled a
//! background task copies it into a buffer while earlier migrations are
//! still being applied.

use std::fmt;
use std::mem;
use std::time::Instant;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;

use crate::core::{Error, Result};
use crate::source::MigrationBody;

/// Payload bytes plus the moment the copy from the source finished.
pub(crate) struct Buffered {
    pub bytes: Bytes,
    pub finished_reading: Instant,
}

enum Body {
    /// No payload; the driver is still invoked to record the version
    /// change.
    Empty,
    /// Unread stream; the runner buffers it inline (prefetch disabled).
    Pending(MigrationBody),
    /// A background task owns the stream and resolves the receiver once
    /// the whole payload is in memory.
    Buffering(oneshot::Receiver<Result<Buffered>>),
}

/// One planned step: apply a payload (or nothing) and move the database
/// to `target_version`.
///
/// For an up step `target_version` equals `version`; for a down step it
/// is the preceding version, or [`NIL_VERSION`](crate::NIL_VERSION) when
/// the step falls off the beginning of the index.
pub struct Migration {
    pub version: u64,
    pub target_version: i64,
    pub identifier: String,
    body: Body,
    started_buffering: Option<Instant>,
}

impl Migration {
    /// Build a record from a source payload. `None` produces an empty
    /// migration.
    pub fn new(
        body: Option<MigrationBody>,
        identifier: String,
        version: u64,
        target_version: i64,
    ) -> Self {
        Self {
            version,
            target_version,
            identifier,
            body: match body {
                Some(reader) => Body::Pending(reader),
                None => Body::Empty,
            },
            started_buffering: None,
        }
    }

    pub fn has_body(&self) -> bool {
        !matches!(self.body, Body::Empty)
    }

    pub(crate) fn started_buffering(&self) -> Option<Instant> {
        self.started_buffering
    }

    /// Hand the stream to a background task that copies it into memory.
    ///
    /// Must be called before the record enters the pipeline channel so
    /// that buffering overlaps the application of earlier migrations.
    /// No-op for empty or already-buffering records.
    pub(crate) fn start_buffering(&mut self) {
        let mut reader = match mem::replace(&mut self.body, Body::Empty) {
            Body::Pending(reader) => reader,
            other => {
                self.body = other;
                return;
            }
        };

        let (tx, rx) = oneshot::channel();
        self.started_buffering = Some(Instant::now());

        tokio::spawn(async move {
            let mut buf = Vec::new();
            let result = match reader.read_to_end(&mut buf).await {
                Ok(_) => Ok(Buffered {
                    bytes: buf.into(),
                    finished_reading: Instant::now(),
                }),
                Err(e) => Err(Error::Io(e)),
            };
            // The receiver is gone when the run was aborted; the copy
            // just drains into a discarded buffer.
            let _ = tx.send(result);
        });

        self.body = Body::Buffering(rx);
    }

    /// Consume the payload, waiting for buffering to complete (or doing
    /// the read inline when prefetch was disabled).
    ///
    /// Returns `None` for empty migrations. Must not be called twice.
    pub(crate) async fn take_body(&mut self) -> Result<Option<(Bytes, Instant)>> {
        match mem::replace(&mut self.body, Body::Empty) {
            Body::Empty => Ok(None),
            Body::Pending(mut reader) => {
                self.started_buffering = Some(Instant::now());
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).await?;
                Ok(Some((buf.into(), Instant::now())))
            }
            Body::Buffering(rx) => {
                let buffered = rx.await.map_err(|_| {
                    Error::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "buffering task dropped before completing",
                    ))
                })??;
                Ok(Some((buffered.bytes, buffered.finished_reading)))
            }
        }
    }
}

impl fmt::Display for Migration {
    /// `"{version}/{u|d} {identifier}"`, with `<empty>` for records
    /// without an identifier.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = if self.target_version >= self.version as i64 {
            "u"
        } else {
            "d"
        };
        let identifier = if self.identifier.is_empty() {
            "<empty>"
        } else {
            self.identifier.as_str()
        };
        write!(f, "{}/{} {}", self.version, direction, identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn body_of(text: &'static str) -> MigrationBody {
        Box::new(Cursor::new(Bytes::from_static(text.as_bytes())))
    }

    #[tokio::test]
    async fn test_buffered_body_yields_source_bytes() {
        let mut migr = Migration::new(Some(body_of("CREATE TABLE t ();")), "t".to_string(), 1, 1);
        migr.start_buffering();
        assert!(migr.started_buffering().is_some());

        let (bytes, finished) = migr.take_body().await.unwrap().unwrap();
        assert_eq!(&bytes[..], b"CREATE TABLE t ();");
        assert!(finished >= migr.started_buffering().unwrap());
    }

    #[tokio::test]
    async fn test_inline_read_without_prefetch() {
        let mut migr = Migration::new(Some(body_of("x")), "t".to_string(), 2, 2);

        // No start_buffering call: the runner path reads inline.
        let (bytes, _) = migr.take_body().await.unwrap().unwrap();
        assert_eq!(&bytes[..], b"x");
    }

    #[tokio::test]
    async fn test_empty_migration_has_no_body() {
        let mut migr = Migration::new(None, String::new(), 5, 3);

        assert!(!migr.has_body());
        migr.start_buffering();
        assert!(migr.take_body().await.unwrap().is_none());
    }

    #[test]
    fn test_display_directions() {
        let up = Migration::new(None, "init".to_string(), 1, 1);
        assert_eq!(up.to_string(), "1/u init");

        let down = Migration::new(None, "init".to_string(), 3, 1);
        assert_eq!(down.to_string(), "3/d init");

        let terminal = Migration::new(None, String::new(), 1, -1);
        assert_eq!(terminal.to_string(), "1/d <empty>");
    }
}
