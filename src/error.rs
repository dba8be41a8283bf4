use std::time::Duration;

/// Failure talking to the backing store.
///
/// Every variant counts as "store unavailable": the caller gets a generic
/// failure and pipeline jobs are dropped without retry.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Transport failure (connect, read, write, closed connection)
    Unavailable(String),
    /// The round trip did not finish before the deadline
    Timeout(Duration),
    /// The store answered with something we could not interpret
    Protocol(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
            StoreError::Timeout(d) => write!(f, "store round trip timed out after {:?}", d),
            StoreError::Protocol(msg) => write!(f, "store protocol error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A stored value that could not be parsed. Logged and skipped, never fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldParseError {
    pub field: String,
    pub value: String,
    pub reason: String,
}

impl FieldParseError {
    pub fn new(field: &str, value: &str, reason: impl Into<String>) -> Self {
        FieldParseError {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for FieldParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "could not parse field {:?} (value {:?}): {}",
            self.field, self.value, self.reason
        )
    }
}

impl std::error::Error for FieldParseError {}

/// A request parameter is missing or malformed.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Missing(&'static str),
    Malformed { param: &'static str, reason: String },
    /// Label collides with one of the reserved metadata keys
    Reserved(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Missing(param) => {
                write!(f, "Missing required parameter '{}'", param)
            }
            ValidationError::Malformed { param, reason } => {
                write!(f, "Could not parse '{}': {}", param, reason)
            }
            ValidationError::Reserved(field) => {
                write!(f, "Field '{}' uses a reserved prefix (_Z, _T, _R)", field)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Startup configuration failure. Fatal: the process must not serve.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Store endpoint is not of the form host:port:db
    Endpoint(String),
    /// Store could not be reached at startup
    Unreachable(String),
    /// Config file could not be read or parsed
    File(String),
    /// A value is out of range
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Endpoint(msg) => write!(f, "invalid store endpoint: {}", msg),
            ConfigError::Unreachable(msg) => write!(f, "store unreachable: {}", msg),
            ConfigError::File(msg) => write!(f, "config file error: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Enqueue failure on the update pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineError {
    /// Queue at capacity under the reject policy
    QueueFull,
    /// Pipeline is shutting down
    Closed,
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::QueueFull => write!(f, "update queue full, job rejected"),
            PipelineError::Closed => write!(f, "update pipeline closed"),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Error surfaced to the request layer
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceError {
    Validation(ValidationError),
    Store(StoreError),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Validation(e) => write!(f, "{}", e),
            ServiceError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::Validation(e) => Some(e),
            ServiceError::Store(e) => Some(e),
        }
    }
}

impl From<ValidationError> for ServiceError {
    fn from(e: ValidationError) -> Self {
        ServiceError::Validation(e)
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        ServiceError::Store(e)
    }
}
