//! Error handling module.
//!
//! All fallible operations in the crate return [`Result`], whose error is the
//! [`MniamError`] taxonomy:
//! - `Initialization`: a shared connection or collection could not be opened
//! - `Precondition`: unbalanced release, invalid concurrency limit or batch size
//! - `Stream`: a batch fetch failed, an item callback failed, or the job was cancelled
//! - `Config`, `Io`, `MongoDb`, `Generic`: ambient failures
//!
//! # Example
//!
//! ```rust
//! use mniam::error::{MniamError, PreconditionError};
//!
//! let err: MniamError = PreconditionError::InvalidLimit(0).into();
//! assert!(err.is_precondition());
//! ```

pub mod kinds;

// Re-export commonly used types
pub use kinds::{BoxError, ConfigError, MniamError, PreconditionError, Result, StreamError};

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::sync::Arc;

    #[test]
    fn test_stream_read_wraps_once() {
        let err = MniamError::stream_read(MniamError::Generic("socket closed".into()));
        assert!(matches!(err, MniamError::Stream(StreamError::ReadFailed(_))));

        let again = MniamError::stream_read(err);
        match again {
            MniamError::Stream(StreamError::ReadFailed(inner)) => {
                assert!(matches!(*inner, MniamError::Generic(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_cancelled_is_not_rewrapped() {
        let err = MniamError::stream_read(StreamError::Cancelled.into());
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_item_failed_keeps_caller_error() {
        let err = MniamError::item_failed("bad item");
        assert_eq!(err.to_string(), "Stream error: item processing failed: bad item");
        let source = err.source().and_then(|s| s.source());
        assert_eq!(source.map(|s| s.to_string()).as_deref(), Some("bad item"));
    }

    #[test]
    fn test_initialization_display_and_source() {
        let cause = Arc::new(MniamError::Generic("connection refused".into()));
        let err = MniamError::Initialization(cause);
        assert!(err.is_initialization());
        assert_eq!(err.to_string(), "Initialization failed: connection refused");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_precondition_display() {
        let err: MniamError = PreconditionError::UnbalancedRelease {
            handle: "users".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Precondition violated: 'users' released more times than acquired"
        );
    }

    #[test]
    fn test_toml_error_maps_to_config() {
        let err: MniamError = toml::from_str::<toml::Table>("= nope").unwrap_err().into();
        assert!(matches!(err, MniamError::Config(ConfigError::InvalidFormat(_))));
    }
}
