//! Error types for the index queue.

use thiserror::Error;

/// Main error type for index queue operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The record has no reachable site root (orphaned, broken or circular rootline)
    #[error("root page record not found for {table}:{uid}")]
    RootPageRecordNotFound { table: String, uid: i64 },

    /// The record itself does not exist
    #[error("record not found: {table}:{uid}")]
    RecordNotFound { table: String, uid: i64 },

    /// No site configuration exists for the root page
    #[error("no site configured for root page {0}")]
    SiteNotFound(i64),

    /// Operator-facing configuration problem (mount page, trigger rule, filter)
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// No initializer registered under this name
    #[error("unknown initializer: {0}")]
    UnknownInitializer(String),

    /// Datastore operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Search engine operation failed
    #[error("search engine error: {0}")]
    SearchEngine(#[from] SearchEngineError),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error only means "nothing to index here".
    ///
    /// Callers skip the record or garbage collect it instead of failing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::RootPageRecordNotFound { .. } | Error::RecordNotFound { .. } | Error::SiteNotFound(_)
        )
    }

    /// Whether the whole store is unusable and a bulk run must stop.
    #[must_use]
    pub fn is_store_wide(&self) -> bool {
        matches!(self, Error::Store(StoreError::Connection(_)))
    }

    /// Shorthand for [`Error::RootPageRecordNotFound`].
    #[must_use]
    pub fn root_not_found(table: &str, uid: i64) -> Self {
        Error::RootPageRecordNotFound {
            table: table.to_string(),
            uid,
        }
    }
}

/// Datastore errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection lost: {0}")]
    Connection(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("insert failed: {0}")]
    Insert(String),

    #[error("delete failed: {0}")]
    Delete(String),

    #[error("transaction failed: {0}")]
    Transaction(String),
}

/// Search engine errors.
#[derive(Error, Debug)]
pub enum SearchEngineError {
    #[error("search engine unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

/// Result type alias for index queue operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_page_record_not_found_display() {
        let err = Error::root_not_found("pages", 42);
        assert_eq!(err.to_string(), "root page record not found for pages:42");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_site_not_found_is_not_found() {
        assert!(Error::SiteNotFound(1).is_not_found());
        assert!(!Error::Other("x".to_string()).is_not_found());
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Constraint("duplicate queue item".to_string());
        assert_eq!(err.to_string(), "constraint violation: duplicate queue item");
    }

    #[test]
    fn test_connection_error_is_store_wide() {
        let err: Error = StoreError::Connection("gone".to_string()).into();
        assert!(err.is_store_wide());

        let err: Error = StoreError::Insert("bad row".to_string()).into();
        assert!(!err.is_store_wide());
    }

    #[test]
    fn test_search_engine_error_display() {
        let err = SearchEngineError::Rejected {
            status: 503,
            message: "core reloading".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "request rejected with status 503: core reloading"
        );
    }

    #[test]
    fn test_error_from_search_engine_error() {
        let err: Error = SearchEngineError::Unavailable("timeout".to_string()).into();
        assert!(matches!(err, Error::SearchEngine(_)));
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_invalid_configuration_display() {
        let err = Error::InvalidConfiguration("mount page 5 has no source".to_string());
        assert_eq!(
            err.to_string(),
            "invalid configuration: mount page 5 has no source"
        );
    }

    #[test]
    fn test_result_type_alias() {
        fn failing_function() -> Result<i32> {
            Err(Error::UnknownInitializer("custom".to_string()))
        }

        let err = failing_function().unwrap_err();
        assert_eq!(err.to_string(), "unknown initializer: custom");
    }
}
