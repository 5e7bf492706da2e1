//! Core types and the device-I/O boundary.
//!
//! [`DeviceIo`] mirrors the streaming-capture ioctl surface one operation
//! per method, so the catalog, ring and stream logic can run unchanged
//! against real hardware or the in-memory fake.

use std::fmt;
use std::io;
use std::time::Duration;

/// Pixel format identifier (e.g., YUYV, MJPG, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");

    /// The little-endian u32 encoding used on the wire.
    #[must_use]
    pub const fn code(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Decode a wire-encoded pixel format.
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        Self(code.to_le_bytes())
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in &self.0 {
            let c = if byte.is_ascii_graphic() || byte == b' ' {
                char::from(byte)
            } else {
                '.'
            };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// Video format as reported or applied on the device.
///
/// `stride` and `size` are driver-computed: meaningful on values read back
/// from the device, ignored on requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line.
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a format request; the driver fills `stride`/`size` on apply.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        Self {
            width,
            height,
            fourcc,
            stride: 0,
            size: 0,
        }
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming I/O.
    pub can_stream: bool,
}

/// A pixel format as advertised by the enumeration protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDesc {
    /// Pixel format identifier.
    pub fourcc: FourCC,
    /// Driver-provided description string.
    pub description: String,
}

/// A fraction of seconds, as the driver reports frame intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fract {
    /// Numerator of the interval in seconds.
    pub numerator: u32,
    /// Denominator of the interval in seconds.
    pub denominator: u32,
}

impl Fract {
    /// Frames per second for an interval of `numerator/denominator` seconds.
    #[must_use]
    pub fn as_rate(self) -> f64 {
        if self.numerator == 0 {
            return 0.0;
        }
        f64::from(self.denominator) / f64::from(self.numerator)
    }
}

/// A frame size reported by the driver, in one of its two encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSize {
    /// An exact width/height pair.
    Discrete {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },
    /// A min/max/step range.
    Stepwise {
        /// Minimum width in pixels.
        min_width: u32,
        /// Maximum width in pixels.
        max_width: u32,
        /// Width step in pixels.
        step_width: u32,
        /// Minimum height in pixels.
        min_height: u32,
        /// Maximum height in pixels.
        max_height: u32,
        /// Height step in pixels.
        step_height: u32,
    },
}

impl FrameSize {
    /// The representative resolution recorded in the catalog: the exact
    /// dimensions for a discrete entry, the maximum for a stepwise range.
    #[must_use]
    pub const fn representative(self) -> (u32, u32) {
        match self {
            Self::Discrete { width, height } => (width, height),
            Self::Stepwise {
                max_width,
                max_height,
                ..
            } => (max_width, max_height),
        }
    }
}

/// A frame interval reported by the driver, in one of its two encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameInterval {
    /// An exact interval.
    Discrete(Fract),
    /// A min/max/step range of intervals.
    Stepwise {
        /// Shortest interval.
        min: Fract,
        /// Longest interval.
        max: Fract,
        /// Interval step.
        step: Fract,
    },
}

impl FrameInterval {
    /// The frame rate recorded in the catalog: exact for a discrete
    /// interval; for a stepwise range, the rate of the longest interval
    /// (a conservative, lowest estimate).
    #[must_use]
    pub fn slowest_rate(self) -> f64 {
        match self {
            Self::Discrete(fract) => fract.as_rate(),
            Self::Stepwise { max, .. } => max.as_rate(),
        }
    }
}

/// Metadata for a dequeued buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Ring index of the completed buffer.
    pub index: u32,
    /// Bytes the driver wrote into the buffer.
    pub bytes_used: u32,
    /// Driver frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
}

/// Abstraction over the device driver's streaming-capture protocol.
///
/// Methods map one-to-one onto driver operations and report raw
/// [`io::Error`]s; semantic classification happens in the components built
/// on top. Enumeration methods return `Ok(None)` on the driver's
/// end-of-enumeration signal.
pub trait DeviceIo {
    /// Human-readable name of the device node, for diagnostics.
    fn display_name(&self) -> String;

    /// Query device capabilities.
    fn capabilities(&self) -> io::Result<DeviceCapabilities>;

    /// Enumerate the pixel format at `index`.
    fn enum_pixel_format(&self, index: u32) -> io::Result<Option<FormatDesc>>;

    /// Enumerate the frame size at `index` for a pixel format.
    fn enum_frame_size(&self, fourcc: FourCC, index: u32) -> io::Result<Option<FrameSize>>;

    /// Enumerate the frame interval at `index` for a (format, resolution) pair.
    fn enum_frame_interval(
        &self,
        fourcc: FourCC,
        width: u32,
        height: u32,
        index: u32,
    ) -> io::Result<Option<FrameInterval>>;

    /// Read the currently active format.
    fn format(&self) -> io::Result<Format>;

    /// Apply a format. Returns the format as adjusted by the driver.
    fn set_format(&mut self, format: &Format) -> io::Result<Format>;

    /// Request `count` driver-shared buffers. Returns the granted count.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    /// Query and map buffer `index` into the process. Returns its length.
    /// Buffers must be mapped in index order, starting at zero.
    fn map_buffer(&mut self, index: u32) -> io::Result<usize>;

    /// Hand buffer `index` to the driver for capture.
    fn queue_buffer(&mut self, index: u32) -> io::Result<()>;

    /// Take a completed buffer back from the driver.
    ///
    /// Callers must have observed readiness via [`Self::wait_readable`]
    /// first; the call is otherwise free to block or fail.
    fn dequeue_buffer(&mut self) -> io::Result<FrameInfo>;

    /// The bytes of mapped buffer `index`.
    ///
    /// Only meaningful while the buffer is not queued to the driver; the
    /// ring's ownership discipline enforces that.
    fn buffer(&self, index: u32) -> io::Result<&[u8]>;

    /// Start streaming.
    fn stream_on(&mut self) -> io::Result<()>;

    /// Stop streaming. The driver releases all queued buffers.
    fn stream_off(&mut self) -> io::Result<()>;

    /// Unmap every mapped buffer.
    fn release_buffers(&mut self) -> io::Result<()>;

    /// Wait up to `timeout` for a completed buffer.
    ///
    /// Returns `Ok(true)` on readiness, `Ok(false)` on expiry. May return
    /// `Ok(false)` early (e.g. on an interrupted wait); callers own the
    /// overall deadline.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Apply one numeric control. The driver validates id and range.
    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()>;
}
