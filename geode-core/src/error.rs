//! Error types for Geode client operations.

use std::io;
use thiserror::Error;

/// The main error type for Geode client operations.
#[derive(Debug, Error)]
pub enum GeodeError {
    /// The connection to a server was lost or could not be established.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// The server requires credentials that were not supplied.
    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    /// The server rejected the supplied credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The authenticated principal may not perform the operation.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The server demands a TLS channel or the TLS setup failed.
    #[error("ssl error: {0}")]
    Ssl(String),

    /// A durable client with the same id is already connected.
    #[error("duplicate durable client: {0}")]
    DuplicateDurableClient(String),

    /// The byte stream is desynchronized or a message is malformed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An operation did not complete within its deadline.
    #[error("timeout error: {0}")]
    Timeout(String),

    /// Every connection of the pool is in use and none was freed in time.
    #[error("pool exhausted: {0}")]
    PoolExhausted(String),

    /// None of the configured locators could be reached.
    #[error("no available locators: {0}")]
    NoAvailableLocators(String),

    /// The server refused the operation because its heap is critical.
    #[error("low memory: {0}")]
    LowMemory(String),

    /// The server cancelled a query because its heap is critical.
    #[error("query low memory: {0}")]
    QueryLowMemory(String),

    /// Another transaction committed conflicting changes first.
    #[error("commit conflict: {0}")]
    CommitConflict(String),

    /// The server hosting the transaction's data departed.
    #[error("transaction data node has departed: {0}")]
    TransactionDataNodeHasDeparted(String),

    /// The transaction's data moved to another server.
    #[error("transaction data rebalanced: {0}")]
    TransactionDataRebalanced(String),

    /// A server-side function failed or does not exist.
    #[error("function execution error: {0}")]
    FunctionExecution(String),

    /// A cache writer on the server vetoed the operation.
    #[error("cache writer error: {0}")]
    CacheWriter(String),

    /// Any other exception reported by the server.
    #[error("server exception {class_name}: {message}")]
    Server {
        /// Fully qualified class name of the server-side exception.
        class_name: String,
        /// Message carried by the exception.
        message: String,
    },

    /// The cache, pool or region has been closed.
    #[error("cache closed: {0}")]
    CacheClosed(String),

    /// The operation is not valid in the current state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// An argument was rejected.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// Configuration errors (invalid settings).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// I/O errors are not `Clone`; a clone keeps the kind and the message.
impl Clone for GeodeError {
    fn clone(&self) -> Self {
        match self {
            GeodeError::NotConnected(m) => GeodeError::NotConnected(m.clone()),
            GeodeError::AuthenticationRequired(m) => GeodeError::AuthenticationRequired(m.clone()),
            GeodeError::AuthenticationFailed(m) => GeodeError::AuthenticationFailed(m.clone()),
            GeodeError::NotAuthorized(m) => GeodeError::NotAuthorized(m.clone()),
            GeodeError::Ssl(m) => GeodeError::Ssl(m.clone()),
            GeodeError::DuplicateDurableClient(m) => GeodeError::DuplicateDurableClient(m.clone()),
            GeodeError::Protocol(m) => GeodeError::Protocol(m.clone()),
            GeodeError::Serialization(m) => GeodeError::Serialization(m.clone()),
            GeodeError::Timeout(m) => GeodeError::Timeout(m.clone()),
            GeodeError::PoolExhausted(m) => GeodeError::PoolExhausted(m.clone()),
            GeodeError::NoAvailableLocators(m) => GeodeError::NoAvailableLocators(m.clone()),
            GeodeError::LowMemory(m) => GeodeError::LowMemory(m.clone()),
            GeodeError::QueryLowMemory(m) => GeodeError::QueryLowMemory(m.clone()),
            GeodeError::CommitConflict(m) => GeodeError::CommitConflict(m.clone()),
            GeodeError::TransactionDataNodeHasDeparted(m) => GeodeError::TransactionDataNodeHasDeparted(m.clone()),
            GeodeError::TransactionDataRebalanced(m) => GeodeError::TransactionDataRebalanced(m.clone()),
            GeodeError::FunctionExecution(m) => GeodeError::FunctionExecution(m.clone()),
            GeodeError::CacheWriter(m) => GeodeError::CacheWriter(m.clone()),
            GeodeError::CacheClosed(m) => GeodeError::CacheClosed(m.clone()),
            GeodeError::IllegalState(m) => GeodeError::IllegalState(m.clone()),
            GeodeError::IllegalArgument(m) => GeodeError::IllegalArgument(m.clone()),
            GeodeError::Configuration(m) => GeodeError::Configuration(m.clone()),
            GeodeError::Server {
                class_name,
                message,
            } => GeodeError::Server {
                class_name: class_name.clone(),
                message: message.clone(),
            },
            GeodeError::Io(e) => GeodeError::Io(io::Error::new(e.kind(), e.to_string())),
        }
    }
}

impl GeodeError {
    /// Maps a server-side exception to a typed error.
    ///
    /// Matching is done on the simple class name so that both server
    /// package layouts are recognized.
    pub fn from_server_exception(class_name: &str, message: &str) -> Self {
        let simple = class_name.rsplit('.').next().unwrap_or(class_name);
        let message = message.to_string();
        match simple {
            "NotAuthorizedException" => GeodeError::NotAuthorized(message),
            "AuthenticationFailedException" => GeodeError::AuthenticationFailed(message),
            "AuthenticationRequiredException" => GeodeError::AuthenticationRequired(message),
            "CacheWriterException" => GeodeError::CacheWriter(message),
            "CommitConflictException" => GeodeError::CommitConflict(message),
            "TransactionDataNodeHasDepartedException" => {
                GeodeError::TransactionDataNodeHasDeparted(message)
            }
            "TransactionDataRebalancedException" => GeodeError::TransactionDataRebalanced(message),
            "FunctionException"
            | "FunctionInvocationTargetException"
            | "InternalFunctionInvocationTargetException" => {
                GeodeError::FunctionExecution(message)
            }
            "LowMemoryException" => GeodeError::LowMemory(message),
            "QueryExecutionLowMemoryException" => GeodeError::QueryLowMemory(message),
            _ => GeodeError::Server {
                class_name: class_name.to_string(),
                message,
            },
        }
    }

    /// Parses a `"<class name>: <message>"` string as sent in exception parts.
    pub fn from_exception_string(text: &str) -> Self {
        match text.split_once(": ") {
            Some((class_name, message)) => Self::from_server_exception(class_name, message),
            None => Self::from_server_exception(text.trim(), ""),
        }
    }

    /// Returns true for failures of a single connection that the pool may
    /// handle by trying another connection.
    pub fn is_transient(&self) -> bool {
        matches!(self, GeodeError::NotConnected(_) | GeodeError::Io(_))
    }

    /// Returns true if the connection that produced this error must not be
    /// reused.
    pub fn is_fatal_for_connection(&self) -> bool {
        matches!(
            self,
            GeodeError::NotConnected(_)
                | GeodeError::Io(_)
                | GeodeError::Protocol(_)
                | GeodeError::Timeout(_)
        )
    }

    /// Returns true for authentication and authorization failures, which are
    /// never retried with the same credentials.
    pub fn is_security_failure(&self) -> bool {
        matches!(
            self,
            GeodeError::AuthenticationRequired(_)
                | GeodeError::AuthenticationFailed(_)
                | GeodeError::NotAuthorized(_)
                | GeodeError::Ssl(_)
        )
    }
}

/// A specialized `Result` type for Geode client operations.
pub type Result<T> = std::result::Result<T, GeodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_keeps_kind() {
        let low = GeodeError::from_server_exception("org.apache.geode.cache.LowMemoryException", "heap critical");
        assert!(matches!(low.clone(), GeodeError::LowMemory(m) if m == "heap critical"));

        let io = GeodeError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        match io.clone() {
            GeodeError::Io(e) => {
                assert_eq!(e.kind(), io::ErrorKind::ConnectionReset);
                assert_eq!(e.to_string(), "reset");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_not_connected_display() {
        let err = GeodeError::NotConnected("peer closed the socket".to_string());
        assert_eq!(err.to_string(), "not connected: peer closed the socket");
    }

    #[test]
    fn test_server_error_display() {
        let err = GeodeError::Server {
            class_name: "java.lang.IllegalStateException".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "server exception java.lang.IllegalStateException: boom"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let err: GeodeError = io_err.into();
        assert!(matches!(err, GeodeError::Io(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_commit_conflict_mapping() {
        let err = GeodeError::from_server_exception(
            "org.apache.geode.cache.CommitConflictException",
            "key k1 was modified",
        );
        assert!(matches!(err, GeodeError::CommitConflict(ref m) if m == "key k1 was modified"));
    }

    #[test]
    fn test_exception_string_mapping() {
        let err = GeodeError::from_exception_string(
            "org.apache.geode.cache.TransactionDataNodeHasDepartedException: server gone",
        );
        assert!(matches!(err, GeodeError::TransactionDataNodeHasDeparted(ref m) if m == "server gone"));

        let err = GeodeError::from_exception_string(
            "org.apache.geode.cache.query.QueryExecutionLowMemoryException: heap critical",
        );
        assert!(matches!(err, GeodeError::QueryLowMemory(_)));
    }

    #[test]
    fn test_function_exception_keeps_message() {
        let err = GeodeError::from_exception_string(
            "org.apache.geode.cache.execute.FunctionException: Function named missing is not registered",
        );
        match err {
            GeodeError::FunctionExecution(m) => {
                assert_eq!(m, "Function named missing is not registered")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_exception_is_generic() {
        let err = GeodeError::from_exception_string("java.lang.NullPointerException: npe");
        assert!(matches!(
            err,
            GeodeError::Server { ref class_name, ref message }
                if class_name == "java.lang.NullPointerException" && message == "npe"
        ));
    }

    #[test]
    fn test_exception_string_without_message() {
        let err = GeodeError::from_exception_string("java.lang.RuntimeException");
        assert!(matches!(err, GeodeError::Server { ref message, .. } if message.is_empty()));
    }

    #[test]
    fn test_classification() {
        assert!(GeodeError::NotConnected("x".into()).is_transient());
        assert!(!GeodeError::Protocol("x".into()).is_transient());
        assert!(GeodeError::Protocol("x".into()).is_fatal_for_connection());
        assert!(!GeodeError::CommitConflict("x".into()).is_fatal_for_connection());
        assert!(GeodeError::AuthenticationFailed("x".into()).is_security_failure());
        assert!(!GeodeError::AuthenticationFailed("x".into()).is_transient());
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(GeodeError::Timeout("read".to_string()))
        }

        assert_eq!(returns_ok().unwrap(), 42);
        assert!(returns_err().is_err());
    }
}
