//! Sampler error types.

use runstat_core::ConfigurationError;
use thiserror::Error;

use crate::sampler::SamplerState;

/// A single runtime counter could not be read during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SampleReadError {
    #[error("{what} is not supported on this platform")]
    Unsupported { what: &'static str },

    #[error("failed to read {what}: {reason}")]
    Io { what: &'static str, reason: String },

    #[error("failed to parse {what}: {reason}")]
    Parse { what: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("sampler {name} cannot {action} while {state}")]
    InvalidTransition {
        name: String,
        state: SamplerState,
        action: &'static str,
    },

    #[error("sampler already registered: {0}")]
    AlreadyRegistered(String),

    #[error("sampler not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// Result type for sampler lifecycle operations.
pub type SamplerResult<T> = Result<T, SamplerError>;
