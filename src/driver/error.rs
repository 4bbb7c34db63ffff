//! Driver error taxonomy.

use std::io;

use thiserror::Error;

use crate::bolt::{BoltError, Failure};

/// Result alias used across the driver API.
pub type DriverResult<T> = Result<T, DriverError>;

/// Every failure the driver surfaces to application code.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Protocol violation: bad handshake, malformed frame, a message the
    /// current server state does not allow. Fatal for the connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Structured server error with a `Neo.*` code.
    #[error("server error {code}: {message}")]
    Server {
        /// Code of the form `Neo.{Classification}.{Category}.{Title}`.
        code: String,
        /// Server-provided description.
        message: String,
    },

    /// Socket-level failure. The affected connection is defunct.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A pool permit could not be obtained within the acquisition
    /// timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// No server could satisfy the request.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Invalid URI, auth token or TLS combination.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Authentication was rejected by the server.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Misuse of a session: closed, or operated out of order.
    #[error("session error: {0}")]
    Session(String),

    /// Misuse of a transaction: already committed, rolled back, failed.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Misuse of a cursor, e.g. seeking backwards.
    #[error("usage error: {0}")]
    Usage(String),

    /// A record value could not be converted to the requested type.
    #[error("type conversion error: {0}")]
    TypeConversion(String),
}

impl DriverError {
    /// Shorthand constructors, mirroring the variants used most.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Structured server error.
    pub fn server(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Server {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Pool acquisition timeout.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// No server available.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// Invalid configuration.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Session misuse.
    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    /// Transaction misuse.
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Cursor misuse.
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    /// Record decoding failure.
    pub fn type_conversion(msg: impl Into<String>) -> Self {
        Self::TypeConversion(msg.into())
    }

    /// Whether a managed transaction may retry after this error.
    ///
    /// Connection loss, pool timeouts and transient or cluster-topology
    /// server codes are worth another attempt; client mistakes are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(_) | Self::Timeout(_) | Self::ServiceUnavailable(_) => true,
            Self::Server { code, .. } => is_retryable_code(code),
            _ => false,
        }
    }

    /// Whether this is a cluster-topology error that should invalidate
    /// the routing table before the next attempt.
    pub fn is_cluster_error(&self) -> bool {
        match self {
            Self::Server { code, .. } => is_cluster_code(code),
            _ => false,
        }
    }

    /// Whether the server classified this as a security failure.
    pub fn is_security_error(&self) -> bool {
        match self {
            Self::Authentication(_) => true,
            Self::Server { code, .. } => code.contains(".Security."),
            _ => false,
        }
    }
}

fn is_retryable_code(code: &str) -> bool {
    if code.starts_with("Neo.TransientError") {
        // These two are misclassified terminations, not real transients.
        return code != "Neo.TransientError.Transaction.Terminated"
            && code != "Neo.TransientError.Transaction.LockClientStopped";
    }
    code == "Neo.ClientError.Security.AuthorizationExpired" || is_cluster_code(code)
}

fn is_cluster_code(code: &str) -> bool {
    code == "Neo.ClientError.Cluster.NotALeader"
        || code == "Neo.ClientError.Cluster.RoutingTableChanged"
        || code == "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase"
        || code == "Neo.ClientError.Database.DatabaseUnavailable"
        || code.starts_with("Neo.ClientError.Cluster.")
        || code.starts_with("Neo.ClientError.Routing.")
}

impl From<Failure> for DriverError {
    fn from(f: Failure) -> Self {
        if f.code.contains(".Security.") && !is_retryable_code(&f.code) {
            DriverError::Authentication(format!("{}: {}", f.code, f.message))
        } else {
            DriverError::Server {
                code: f.code,
                message: f.message,
            }
        }
    }
}

impl From<BoltError> for DriverError {
    fn from(e: BoltError) -> Self {
        match e {
            BoltError::Io(io_err) => DriverError::Io(io_err),
            other => DriverError::Protocol(other.to_string()),
        }
    }
}
