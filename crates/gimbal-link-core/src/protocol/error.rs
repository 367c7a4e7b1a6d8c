//! Link errors

use thiserror::Error;

/// Errors that can occur while talking to the gimbal microcontroller
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Command '{0}' has no code in the command table")]
    InvalidCommand(String),

    #[error("{axis} value {value} is outside the allowed range [{min}, {max}]")]
    OutOfRange {
        axis: Axis,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("Timed out waiting for response ({} of {} bytes received)", .partial.len(), .expected)]
    Timeout { partial: Vec<u8>, expected: usize },

    #[error("Framing error: {0}")]
    FramingError(String),

    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumError { expected: u8, actual: u8 },

    #[error("Port unavailable: {port}: {reason}")]
    PortUnavailable { port: String, reason: String },

    #[error("Link is closed")]
    LinkClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dispatch failed after {attempts} attempt(s): {last}")]
    DispatchFailed {
        attempts: u32,
        #[source]
        last: Box<LinkError>,
    },
}

/// Which angle an [`LinkError::OutOfRange`] refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Horizontal
    Yaw,
    /// Vertical
    Pitch,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::Yaw => f.write_str("yaw"),
            Axis::Pitch => f.write_str("pitch"),
        }
    }
}

/// How the dispatcher treats an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller mistake; reported before any I/O
    Input,
    /// Line noise or a lost frame; worth another attempt
    Transient,
    /// The link itself is unusable
    Fatal,
}

impl LinkError {
    /// Classify this error for the retry loop
    pub fn class(&self) -> ErrorClass {
        match self {
            LinkError::InvalidCommand(_) | LinkError::OutOfRange { .. } => ErrorClass::Input,
            LinkError::Timeout { .. }
            | LinkError::FramingError(_)
            | LinkError::ChecksumError { .. } => ErrorClass::Transient,
            LinkError::PortUnavailable { .. } | LinkError::LinkClosed | LinkError::Io(_) => {
                ErrorClass::Fatal
            }
            LinkError::DispatchFailed { last, .. } => last.class(),
        }
    }

    /// True if another attempt on the same link could succeed
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// True if the link must be reopened before it can be used again
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// Number of attempts recorded, if this is a dispatch failure
    pub fn attempts(&self) -> Option<u32> {
        match self {
            LinkError::DispatchFailed { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}
