use std::sync::Arc;
use std::{fmt, io};

/// Crate-wide `Result` type using [`MniamError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, MniamError>;

/// Error type accepted from caller-supplied item callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for mniam operations.
///
/// This type wraps more specific error kinds and provides a single
/// error type that can be used throughout the crate.
#[derive(Debug)]
pub enum MniamError {
    /// A shared resource could not be opened.
    ///
    /// The cause is shared by every caller that joined the failed attempt.
    /// Failures are never cached: the next acquire starts a new attempt.
    Initialization(Arc<MniamError>),

    /// An API contract was violated by the caller.
    Precondition(PreconditionError),

    /// Reading or processing a cursor stream failed.
    Stream(StreamError),

    /// Configuration errors.
    Config(ConfigError),

    /// I/O errors.
    Io(io::Error),

    /// MongoDB driver errors.
    MongoDb(mongodb::error::Error),

    /// Generic error with a free-form message.
    Generic(String),
}

/// Caller-side contract violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    /// `release` was called more often than `acquire`.
    UnbalancedRelease { handle: String },

    /// Concurrency limit below one.
    InvalidLimit(usize),

    /// Cursor batch size below one.
    InvalidBatchSize(u32),
}

/// Errors raised while a consumption job drains a cursor.
#[derive(Debug)]
pub enum StreamError {
    /// A batch fetch failed mid-stream.
    ReadFailed(Box<MniamError>),

    /// An item callback failed; wraps the caller's error.
    ItemFailed(BoxError),

    /// The consumer's cancellation token fired.
    Cancelled,
}

/// Configuration-specific errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Missing required field.
    MissingField(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },
}

impl MniamError {
    /// Wrap a failed fetch as a stream read error, leaving existing stream errors untouched.
    pub fn stream_read(err: MniamError) -> Self {
        match err {
            MniamError::Stream(_) => err,
            other => MniamError::Stream(StreamError::ReadFailed(Box::new(other))),
        }
    }

    /// Wrap a caller callback failure.
    pub fn item_failed(err: impl Into<BoxError>) -> Self {
        MniamError::Stream(StreamError::ItemFailed(err.into()))
    }

    /// True for errors raised by a failed open attempt.
    pub fn is_initialization(&self) -> bool {
        matches!(self, MniamError::Initialization(_))
    }

    /// True for caller contract violations.
    pub fn is_precondition(&self) -> bool {
        matches!(self, MniamError::Precondition(_))
    }

    /// True when a consumption job was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MniamError::Stream(StreamError::Cancelled))
    }
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for MniamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MniamError::Initialization(e) => write!(f, "Initialization failed: {e}"),
            MniamError::Precondition(e) => write!(f, "Precondition violated: {e}"),
            MniamError::Stream(e) => write!(f, "Stream error: {e}"),
            MniamError::Config(e) => write!(f, "Configuration error: {e}"),
            MniamError::Io(e) => write!(f, "I/O error: {e}"),
            MniamError::MongoDb(e) => write!(f, "MongoDB error: {e}"),
            MniamError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for PreconditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreconditionError::UnbalancedRelease { handle } => {
                write!(f, "'{handle}' released more times than acquired")
            }
            PreconditionError::InvalidLimit(limit) => {
                write!(f, "concurrency limit must be at least 1, got {limit}")
            }
            PreconditionError::InvalidBatchSize(size) => {
                write!(f, "batch size must be at least 1, got {size}")
            }
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::ReadFailed(e) => write!(f, "failed to read batch: {e}"),
            StreamError::ItemFailed(e) => write!(f, "item processing failed: {e}"),
            StreamError::Cancelled => write!(f, "consumption cancelled"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::MissingField(field) => write!(f, "Missing required field: {field}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
        }
    }
}

impl std::error::Error for MniamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MniamError::Initialization(e) => Some(e.as_ref()),
            MniamError::Precondition(e) => Some(e),
            MniamError::Stream(e) => Some(e),
            MniamError::Config(e) => Some(e),
            MniamError::Io(e) => Some(e),
            MniamError::MongoDb(e) => Some(e),
            MniamError::Generic(_) => None,
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::ReadFailed(e) => Some(e.as_ref()),
            StreamError::ItemFailed(e) => Some(e.as_ref()),
            StreamError::Cancelled => None,
        }
    }
}

impl std::error::Error for PreconditionError {}
impl std::error::Error for ConfigError {}

/* ========================= Conversions to MniamError ========================= */

impl From<io::Error> for MniamError {
    fn from(err: io::Error) -> Self {
        MniamError::Io(err)
    }
}

impl From<mongodb::error::Error> for MniamError {
    fn from(err: mongodb::error::Error) -> Self {
        MniamError::MongoDb(err)
    }
}

impl From<PreconditionError> for MniamError {
    fn from(err: PreconditionError) -> Self {
        MniamError::Precondition(err)
    }
}

impl From<StreamError> for MniamError {
    fn from(err: StreamError) -> Self {
        MniamError::Stream(err)
    }
}

impl From<ConfigError> for MniamError {
    fn from(err: ConfigError) -> Self {
        MniamError::Config(err)
    }
}

impl From<toml::de::Error> for MniamError {
    fn from(err: toml::de::Error) -> Self {
        MniamError::Config(ConfigError::InvalidFormat(err.to_string()))
    }
}

impl From<toml::ser::Error> for MniamError {
    fn from(err: toml::ser::Error) -> Self {
        MniamError::Config(ConfigError::InvalidFormat(err.to_string()))
    }
}

impl From<String> for MniamError {
    fn from(msg: String) -> Self {
        MniamError::Generic(msg)
    }
}

impl From<&str> for MniamError {
    fn from(msg: &str) -> Self {
        MniamError::Generic(msg.to_owned())
    }
}
