//! Error types for the sidecar injector

use thiserror::Error;

/// Main error type for injection decisions
///
/// Every variant except [`Error::Config`] and [`Error::Io`] is scoped to a
/// single admission request and ends up as a rejected admission response.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The admission request did not carry a decodable Pod
    #[error("could not decode pod: {0}")]
    Decode(String),

    /// The opt-in annotation holds something other than true/false
    #[error("the acceptable values for {key:?} are 'True', 'true', 'false' or 'False', got {value:?}")]
    InvalidAnnotationValue {
        /// Annotation key
        key: String,
        /// Offending value
        value: String,
    },

    /// A resource override annotation is not a valid quantity
    #[error("failed to parse sidecar resource override {key:?}={value:?}: {reason}")]
    MalformedOverride {
        /// Annotation key
        key: String,
        /// Offending value
        value: String,
        /// Why the quantity parser refused it
        reason: String,
    },

    /// The placeholder container's image is not a valid image reference
    #[error("could not parse input image {reference:?}: {reason}")]
    InvalidImageReference {
        /// The image reference as supplied
        reference: String,
        /// Why the reference grammar refused it
        reason: String,
    },

    /// More than one placeholder container was supplied
    #[error("found {0} containers named {name:?}, at most one placeholder is allowed", name = crate::SIDECAR_CONTAINER_NAME)]
    DuplicatePlaceholder(usize),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid startup configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Listener or server I/O failure
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a decode error with the given message
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a malformed override error for an annotation
    pub fn malformed_override(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedOverride {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid image reference error
    pub fn invalid_image(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidImageReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}
