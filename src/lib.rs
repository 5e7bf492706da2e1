//! Direct V4L2 video capture core.
//!
//! Drives a streaming-capture device at the ioctl level — capability
//! query, format enumeration and negotiation, a memory-mapped buffer
//! ring, the stream lifecycle, and per-control tuning — behind a
//! synchronous "get next frame" session API. General-purpose capture
//! libraries reset device state on open and cannot apply exposure
//! controls in the order some drivers require; talking to the driver
//! directly avoids both.
//!
//! The device-I/O boundary is the [`DeviceIo`] trait, with a real
//! raw-ioctl backend ([`V4l2Io`]) and an in-memory fake for tests, so the
//! state machine and buffer-ring logic are testable without hardware.

pub mod capture;
pub mod catalog;
pub mod controls;
pub mod device;
pub mod error;
pub mod negotiate;
pub mod ring;
pub mod stream;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use capture::{is_live_device, CaptureConfig, CaptureSession};
pub use catalog::{FormatCatalog, FormatEntry, ResolutionEntry};
pub use device::V4l2Io;
pub use error::{CaptureError, ErrorClass, Result};
pub use negotiate::{NegotiatedFormat, ResolutionPolicy};
pub use ring::{BufferOwner, BufferRing, Frame};
pub use stream::{StreamController, StreamState};
pub use traits::{DeviceCapabilities, DeviceIo, Format, FourCC, FrameInfo};
