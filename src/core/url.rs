use super::{Error, Result};

/// Extract the scheme component of a driver URL.
///
/// The scheme selects the registered driver and is matched
/// case-sensitively; a URL without one is a construction error.
pub(crate) fn scheme_from_url(url: &str) -> Result<String> {
    match url.split_once("://") {
        Some((scheme, _)) if !scheme.is_empty() => Ok(scheme.to_string()),
        _ => Err(Error::NoScheme(url.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_from_url() {
        assert_eq!(scheme_from_url("stub://").unwrap(), "stub");
        assert_eq!(
            scheme_from_url("memory://migrations/v1").unwrap(),
            "memory"
        );
    }

    #[test]
    fn test_scheme_is_case_sensitive() {
        // No lowercasing; "Stub" and "stub" select different drivers.
        assert_eq!(scheme_from_url("Stub://x").unwrap(), "Stub");
    }

    #[test]
    fn test_missing_scheme() {
        assert!(matches!(
            scheme_from_url("just-a-path"),
            Err(Error::NoScheme(_))
        ));
        assert!(matches!(scheme_from_url("://x"), Err(Error::NoScheme(_))));
        assert!(matches!(scheme_from_url(""), Err(Error::NoScheme(_))));
    }
}
