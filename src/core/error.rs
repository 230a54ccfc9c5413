use thiserror::Error;

/// Errors surfaced by the migration engine and its drivers.
///
/// `NoChange`, `NilVersion` and `ShortLimit` are flow-control outcomes
/// rather than failures; callers usually match on them explicitly.
#[derive(Error, Debug)]
pub enum Error {
    /// The operation had nothing to do (target equals current version,
    /// or a zero step count).
    #[error("no change")]
    NoChange,

    /// `version()` was called but no migration has ever been applied.
    #[error("no migration")]
    NilVersion,

    /// The engine already holds the database lock.
    #[error("database locked")]
    Locked,

    /// A referenced version is absent from the source index.
    #[error("version does not exist")]
    NotExist,

    /// An up run with a step limit ran out of migrations; `short` is the
    /// number of steps that could not be applied.
    #[error("limit {short} short")]
    ShortLimit { short: u64 },

    /// Opaque source driver failure, propagated verbatim.
    #[error("source driver: {0}")]
    Source(String),

    /// Opaque database driver failure, propagated verbatim.
    #[error("database driver: {0}")]
    Database(String),

    /// Reading a migration body failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A driver URL is missing its scheme component.
    #[error("no scheme in URL '{0}'")]
    NoScheme(String),

    /// No driver is registered for the URL scheme.
    #[error("unknown driver '{0}' (missing registration?)")]
    UnknownDriver(String),

    /// Two errors from the same operation, typically the primary failure
    /// plus a failed unlock.
    #[error("{primary}; {secondary}")]
    Multi {
        primary: Box<Error>,
        secondary: Box<Error>,
    },
}

impl Error {
    /// Compose a primary error with a follow-up error into one value.
    pub fn multi(primary: Error, secondary: Error) -> Error {
        Error::Multi {
            primary: Box::new(primary),
            secondary: Box::new(secondary),
        }
    }

    /// True for the distinguishable "version absent from source" condition.
    pub fn is_not_exist(&self) -> bool {
        matches!(self, Error::NotExist)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_limit_message() {
        let err = Error::ShortLimit { short: 7 };
        assert_eq!(err.to_string(), "limit 7 short");
    }

    #[test]
    fn test_multi_contains_both_messages() {
        let err = Error::multi(
            Error::NotExist,
            Error::Database("unlock failed".to_string()),
        );

        let msg = err.to_string();
        assert!(msg.contains("version does not exist"));
        assert!(msg.contains("unlock failed"));
    }

    #[test]
    fn test_is_not_exist() {
        assert!(Error::NotExist.is_not_exist());
        assert!(!Error::NoChange.is_not_exist());
        assert!(!Error::Source("gone".to_string()).is_not_exist());
    }
}
