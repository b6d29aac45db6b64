//! Error types for the reconciliation engine

use std::fmt;

use thiserror::Error;

/// Phase of a micro-service sequence in which a child step failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Failure while validating children
    Validation,
    /// Failure while executing children
    Execution,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Validation => f.write_str("validation"),
            Stage::Execution => f.write_str("execution"),
        }
    }
}

/// Main error type for operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// A step's preconditions are not met
    #[error("validation error: {0}")]
    Validation(String),

    /// A leaf step's external call failed
    #[error("execution error: {0}")]
    Execution(String),

    /// Unexpected internal fault trapped at the pass boundary
    #[error("{message}")]
    Abrupt {
        /// Panic payload or fault description
        message: String,
        /// Diagnostic trace captured where the fault was trapped
        trace: String,
    },

    /// A targeted cluster object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Failure of the disaster-recovery workflow; only affects DR status
    #[error("disaster recovery error: {0}")]
    DisasterRecovery(String),

    /// A child of a micro-service sequence failed
    #[error("microservice {stage} exception in {service}: {source}")]
    MicroService {
        /// Name of the micro-service sequence
        service: String,
        /// Whether validation or execution failed
        stage: Stage,
        /// The child's error
        #[source]
        source: Box<Error>,
    },

    /// A bounded wait expired
    #[error("timed out: {0}")]
    Timeout(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid operator configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// A required execution context value was never set
    #[error("missing context value: {0}")]
    MissingContext(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an execution error with the given message
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create an abrupt failure with a diagnostic trace
    pub fn abrupt(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self::Abrupt {
            message: message.into(),
            trace: trace.into(),
        }
    }

    /// Create a not-found error with the given message
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a disaster-recovery error with the given message
    pub fn disaster_recovery(msg: impl Into<String>) -> Self {
        Self::DisasterRecovery(msg.into())
    }

    /// Wrap a child error of the named micro-service sequence
    pub fn micro_service(service: impl Into<String>, stage: Stage, source: Error) -> Self {
        Self::MicroService {
            service: service.into(),
            stage,
            source: Box::new(source),
        }
    }

    /// Create a timeout error with the given message
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for disaster-recovery failures, including ones wrapped by a micro-service sequence
    pub fn is_disaster_recovery(&self) -> bool {
        match self {
            Error::DisasterRecovery(_) => true,
            Error::MicroService { source, .. } => source.is_disaster_recovery(),
            _ => false,
        }
    }

    /// True when the object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }

    /// True for optimistic-concurrency conflicts reported by the API server
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 409)
    }

    /// Diagnostic trace attached to abrupt failures
    pub fn trace(&self) -> Option<&str> {
        match self {
            Error::Abrupt { trace, .. } => Some(trace),
            Error::MicroService { source, .. } => source.trace(),
            _ => None,
        }
    }
}
