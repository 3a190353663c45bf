//! Error handling for the eegclean workspace
//!
//! Every fallible operation in the core, processing and simulation crates
//! returns [`EegResult`]. Errors are surfaced to the caller as-is; nothing in
//! the library retries or recovers.

use std::fmt;

/// Result type alias for eegclean operations
pub type EegResult<T> = Result<T, EegError>;

/// Error type shared by all eegclean crates
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum EegError {
    /// Recording shape or metadata is inconsistent
    InvalidRecording {
        reason: String,
    },

    /// A channel name was not found in the recording
    ChannelNotFound {
        name: String,
    },

    /// Channel index out of bounds
    InvalidChannelIndex {
        index: usize,
        count: usize,
    },

    /// Requested time range does not fit the recording
    InvalidTimeRange {
        tmin: f64,
        tmax: f64,
        duration: f64,
    },

    /// Filter parameters cannot produce a valid design
    InvalidFilter {
        reason: String,
    },

    /// File contents could not be parsed or written
    Format {
        reason: String,
    },

    /// Underlying I/O failure
    Io {
        reason: String,
    },

    /// Component decomposition failed or was misconfigured
    Decomposition {
        reason: String,
    },

    /// No events were detected on a reference channel
    NoEvents {
        channel: String,
    },

    /// Invalid configuration
    ConfigurationError {
        message: String,
    },

    /// A processing step failed
    ProcessingError {
        message: String,
    },
}

impl fmt::Display for EegError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EegError::InvalidRecording { reason } => {
                write!(f, "Invalid recording: {}", reason)
            }
            EegError::ChannelNotFound { name } => {
                write!(f, "Channel '{}' not found", name)
            }
            EegError::InvalidChannelIndex { index, count } => {
                write!(f, "Channel index {} out of bounds for {} channels", index, count)
            }
            EegError::InvalidTimeRange { tmin, tmax, duration } => {
                write!(f, "Invalid time range [{:.3}, {:.3}]s for recording of {:.3}s",
                       tmin, tmax, duration)
            }
            EegError::InvalidFilter { reason } => {
                write!(f, "Invalid filter: {}", reason)
            }
            EegError::Format { reason } => {
                write!(f, "Format error: {}", reason)
            }
            EegError::Io { reason } => {
                write!(f, "I/O error: {}", reason)
            }
            EegError::Decomposition { reason } => {
                write!(f, "Decomposition error: {}", reason)
            }
            EegError::NoEvents { channel } => {
                write!(f, "No events found on channel '{}'", channel)
            }
            EegError::ConfigurationError { message } => {
                write!(f, "Configuration error: {}", message)
            }
            EegError::ProcessingError { message } => {
                write!(f, "Processing error: {}", message)
            }
        }
    }
}

impl std::error::Error for EegError {}

impl From<std::io::Error> for EegError {
    fn from(err: std::io::Error) -> Self {
        EegError::Io { reason: err.to_string() }
    }
}

impl From<serde_json::Error> for EegError {
    fn from(err: serde_json::Error) -> Self {
        EegError::Format { reason: err.to_string() }
    }
}

/// Convenience macro for creating recording errors
#[macro_export]
macro_rules! recording_error {
    ($($arg:tt)+) => {
        $crate::error::EegError::InvalidRecording {
            reason: format!($($arg)+)
        }
    };
}

/// Convenience macro for creating format errors
#[macro_export]
macro_rules! format_error {
    ($($arg:tt)+) => {
        $crate::error::EegError::Format {
            reason: format!($($arg)+)
        }
    };
}
