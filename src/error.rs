//! Error types for the cache engine.
//!
//! All fallible engine operations return [`CacheResult`]. The manager layer
//! converts most failures into misses or no-ops (see `manager`), so callers
//! of the wrapped-function API never observe these directly; they exist for
//! code that talks to storages or serializers by hand.

use thiserror::Error;

/// Unified error type for the cache engine.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The external store was unreachable, timed out, or answered with a
    /// protocol error. Converted to a miss on reads and a silent drop on
    /// writes by the manager.
    #[error("cache transport error: {0}")]
    Transport(String),

    /// A value could not be encoded by the configured serializer, or stored
    /// bytes could not be decoded back.
    #[error("cache serialization error: {0}")]
    Serialization(String),

    /// Incompatible construction options. Raised when a manager is built,
    /// never at call time.
    #[error("invalid cache configuration: {0}")]
    Config(String),

    /// An argument could not be rendered into a cache key fragment.
    #[error("cache key derivation error: {0}")]
    KeyDerivation(String),

    /// The storage backend does not support the requested call style.
    #[error("{0} is not supported by this storage backend")]
    Unsupported(&'static str),
}

/// Convenience Result type used throughout the crate.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for CacheError {
    fn from(err: bincode::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = CacheError::Transport("connection refused".into());
        assert_eq!(err.to_string(), "cache transport error: connection refused");

        let err = CacheError::Config("lru capacity must be positive".into());
        assert_eq!(
            err.to_string(),
            "invalid cache configuration: lru capacity must be positive"
        );

        let err = CacheError::Unsupported("synchronous access");
        assert_eq!(
            err.to_string(),
            "synchronous access is not supported by this storage backend"
        );
    }

    #[test]
    fn test_from_serde_json() {
        let bad = serde_json::from_str::<u32>("not a number").unwrap_err();
        let err: CacheError = bad.into();
        assert!(matches!(err, CacheError::Serialization(_)));
    }
}
