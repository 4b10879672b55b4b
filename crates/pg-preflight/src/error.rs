//! Error types for the pre-flight library.

use thiserror::Error;

/// Main error type for pre-flight operations.
#[derive(Error, Debug)]
pub enum PreflightError {
    /// Configuration error (invalid YAML, missing fields, bad references).
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation named an instance that is not in the configuration.
    #[error("Configuration error: instance '{0}' not found in configuration")]
    UnknownInstance(String),

    /// A database named by the caller does not exist on the instance.
    #[error("Database '{database}' not found on instance '{instance}'")]
    DatabaseNotFound { instance: String, database: String },

    /// Opening a connection to an instance failed.
    #[error("Connection to instance '{instance}' failed: {source}")]
    Connection {
        instance: String,
        #[source]
        source: tokio_postgres::Error,
    },

    /// A query failed after the connection was already open.
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// TLS setup failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The operation was cancelled (SIGINT, caller abort).
    #[error("Operation cancelled")]
    Cancelled,
}

impl PreflightError {
    /// Create a Connection error for an instance.
    pub fn connection(instance: impl Into<String>, source: tokio_postgres::Error) -> Self {
        PreflightError::Connection {
            instance: instance.into(),
            source,
        }
    }

    /// Whether a failed connection open is worth retrying.
    ///
    /// Server-reported errors are transient only for the "try again later"
    /// states (startup, shutdown, connection limits, class 08). Without a
    /// server error, only a closed socket or an I/O failure somewhere in the
    /// source chain counts, and a rejected TLS handshake does not. Everything
    /// else is permanent: authentication failures, a server that refuses
    /// TLS, bad driver configuration.
    pub fn is_transient(&self) -> bool {
        match self {
            PreflightError::Connection { source, .. } => match source.as_db_error() {
                Some(db) => {
                    let code = db.code().code();
                    code.starts_with("08") || code == "57P03" || code == "53300"
                }
                None => {
                    source.is_closed() || io_cause(source).is_some_and(|io| !is_tls_failure(io))
                }
            },
            PreflightError::Io(_) => true,
            _ => false,
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            PreflightError::Config(_)
            | PreflightError::UnknownInstance(_)
            | PreflightError::Yaml(_) => 2,
            PreflightError::Connection { .. } | PreflightError::Tls(_) => 3,
            PreflightError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// First I/O error in the source chain of `err`.
fn io_cause(err: &tokio_postgres::Error) -> Option<&std::io::Error> {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return Some(io);
        }
        source = cause.source();
    }
    None
}

/// The TLS stack reports handshake rejections as I/O errors wrapping a
/// rustls error.
fn is_tls_failure(io: &std::io::Error) -> bool {
    io.get_ref()
        .is_some_and(|inner| inner.downcast_ref::<rustls::Error>().is_some())
}

impl From<crate::retry::Cancelled> for PreflightError {
    fn from(_: crate::retry::Cancelled) -> Self {
        PreflightError::Cancelled
    }
}

/// Result type alias for pre-flight operations.
pub type Result<T> = std::result::Result<T, PreflightError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_not_transient() {
        assert!(!PreflightError::Config("bad".into()).is_transient());
        assert!(!PreflightError::UnknownInstance("ghost".into()).is_transient());
        assert!(!PreflightError::Cancelled.is_transient());
    }

    #[test]
    fn test_io_errors_are_transient() {
        let err = PreflightError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(err.is_transient());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(PreflightError::Config("x".into()).exit_code(), 2);
        assert_eq!(PreflightError::UnknownInstance("x".into()).exit_code(), 2);
        assert_eq!(PreflightError::Tls("x".into()).exit_code(), 3);
        assert_eq!(PreflightError::Cancelled.exit_code(), 130);
    }

    #[test]
    fn test_missing_database_is_a_runtime_failure() {
        let err = PreflightError::DatabaseNotFound {
            instance: "legacy".into(),
            database: "orders".into(),
        };
        assert_eq!(err.exit_code(), 1);
        assert!(!err.is_transient());
        assert_eq!(
            err.to_string(),
            "Database 'orders' not found on instance 'legacy'"
        );
    }

    #[test]
    fn test_rustls_rejection_is_a_tls_failure() {
        let rejected = std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            rustls::Error::InvalidCertificate(rustls::CertificateError::NotValidForName),
        );
        assert!(is_tls_failure(&rejected));

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(!is_tls_failure(&reset));
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "config.yaml missing");
        let err = PreflightError::from(io);
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: IO error: config.yaml missing"));
    }

    #[test]
    fn test_unknown_instance_message() {
        let err = PreflightError::UnknownInstance("reporting".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: instance 'reporting' not found in configuration"
        );
    }
}
