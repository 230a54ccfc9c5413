/// Progress reporting for migration runs.
///
/// Attached to the engine via its `log` field; when absent, runs are
/// silent. Loggers receive one line per applied migration; verbose
/// loggers additionally receive scheduling and buffering lines.
pub trait Logger: Send + Sync {
    /// Write one line of progress output.
    fn log(&self, line: &str);

    /// Whether scheduling and buffering details should be reported.
    fn verbose(&self) -> bool;
}
