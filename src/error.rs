//! Error types for the capture core.
//!
//! One flat enum carries every failure; [`CaptureError::class`] groups the
//! variants into the broad classes an orchestrating layer needs for its
//! fatal-versus-retry policy. Nothing here retries anything: every error
//! is reported synchronously at the point of failure.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::stream::StreamState;
use crate::traits::FourCC;

/// Broad failure classes for caller-side policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Open or capability failures.
    Device,
    /// Format enumeration or negotiation failures.
    Format,
    /// Buffer allocation, mapping or ownership failures.
    Buffer,
    /// Stream start/stop failures.
    Stream,
    /// Per-control set failures.
    Control,
    /// A readiness or dequeue wait exceeded its budget.
    Timeout,
}

/// Error type for capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The device node could not be opened or queried.
    #[error("device {device} could not be opened or queried: {source}")]
    DeviceNotFound {
        /// Device node name.
        device: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// The device lacks video-capture capability.
    #[error("device {device} does not support video capture")]
    NotCaptureCapable {
        /// Device node name.
        device: String,
    },

    /// The device lacks streaming-I/O capability.
    #[error("device {device} does not support streaming I/O")]
    NotStreamable {
        /// Device node name.
        device: String,
    },

    /// An enumeration ioctl failed with something other than the
    /// end-of-enumeration signal.
    #[error("format enumeration failed: {0}")]
    EnumerationFailed(#[source] io::Error),

    /// The requested pixel format is absent from the catalog or has no
    /// usable resolutions.
    #[error("pixel format {0} is not supported by the device")]
    UnsupportedFormat(FourCC),

    /// The driver rejected the format get/set exchange.
    #[error("failed to apply format: {0}")]
    FormatApplyFailed(#[source] io::Error),

    /// The driver granted fewer buffers than requested.
    #[error("requested {requested} buffers but the driver granted {granted}")]
    BufferAllocationFailed {
        /// Buffers requested from the driver.
        requested: u32,
        /// Buffers the driver granted.
        granted: u32,
    },

    /// The ring needs at least two buffers to keep one in flight.
    #[error("buffer count {0} is below the minimum of 2")]
    BufferCountTooSmall(u32),

    /// Querying, mapping or initial queueing of a buffer failed.
    #[error("buffer setup failed: {0}")]
    BufferSetupFailed(#[source] io::Error),

    /// The buffer index is out of range or not application-owned.
    #[error("buffer index {0} is out of range or not application-owned")]
    InvalidBufferIndex(u32),

    /// The driver rejected stream start.
    #[error("driver rejected stream start: {0}")]
    StreamStartFailed(#[source] io::Error),

    /// An operation was invoked in the wrong stream state.
    #[error("{operation} requires stream state {required:?}, but the state is {actual:?}")]
    InvalidState {
        /// The operation that was attempted.
        operation: &'static str,
        /// The state the operation requires.
        required: StreamState,
        /// The state the controller was in.
        actual: StreamState,
    },

    /// No completed buffer became available within the wait budget.
    /// Buffer ownership and stream state are unchanged; the wait may be
    /// retried as-is.
    #[error("no frame became ready within {0:?}")]
    CaptureTimeout(Duration),

    /// The device did not signal readiness after stream start.
    #[error("device did not signal readiness within {0:?}")]
    DeviceNotReady(Duration),

    /// The driver rejected a control id or value.
    #[error("driver rejected control {id:#010x}: {source}")]
    ControlRejected {
        /// Numeric control identifier.
        id: u32,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// The control name table has no entry for this name.
    #[error("no control is named {0:?}")]
    UnknownControl(String),

    /// Any other device I/O failure.
    #[error("device I/O failed: {0}")]
    Io(#[from] io::Error),
}

impl CaptureError {
    /// The broad class this error belongs to.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::DeviceNotFound { .. }
            | Self::NotCaptureCapable { .. }
            | Self::NotStreamable { .. }
            | Self::Io(_) => ErrorClass::Device,
            Self::EnumerationFailed(_)
            | Self::UnsupportedFormat(_)
            | Self::FormatApplyFailed(_) => ErrorClass::Format,
            Self::BufferAllocationFailed { .. }
            | Self::BufferCountTooSmall(_)
            | Self::BufferSetupFailed(_)
            | Self::InvalidBufferIndex(_) => ErrorClass::Buffer,
            Self::StreamStartFailed(_) | Self::InvalidState { .. } => ErrorClass::Stream,
            Self::CaptureTimeout(_) | Self::DeviceNotReady(_) => ErrorClass::Timeout,
            Self::ControlRejected { .. } | Self::UnknownControl(_) => ErrorClass::Control,
        }
    }

    /// Whether this error is a wait-budget expiry.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.class(), ErrorClass::Timeout)
    }
}

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;
