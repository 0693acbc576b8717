use thiserror::Error;

/// Error type for resolvers that don't bring their own.
///
/// Resolver errors are never thrown out of the cache: they are stored on the
/// entry and shown to every subscriber until the next successful fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Fetch failed: {0}")]
    FetchError(String),

    #[error("Network error: {0}")]
    NetworkError(String),
}

/// Errors raised by cache bookkeeping rather than by resolvers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The identity is already bound to an entry of another data/error type.
    #[error("cache entry `{identity}` holds `{found}`, requested `{requested}`")]
    TypeMismatch {
        identity: String,
        found: &'static str,
        requested: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_display() {
        let err = QueryError::FetchError("test error".to_string());
        assert_eq!(err.to_string(), "Fetch failed: test error");

        let err = QueryError::NetworkError("network error".to_string());
        assert_eq!(err.to_string(), "Network error: network error");
    }

    #[test]
    fn test_type_mismatch_display() {
        let err = StoreError::TypeMismatch {
            identity: "user:1".to_string(),
            found: "u32",
            requested: "String",
        };
        assert_eq!(
            err.to_string(),
            "cache entry `user:1` holds `u32`, requested `String`"
        );
    }
}
