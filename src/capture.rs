//! The capture session: components wired in dependency order behind a
//! synchronous "get next frame" contract.

use std::path::Path;
use std::time::Duration;

use crate::catalog::FormatCatalog;
use crate::controls::{self, ControlFailure};
use crate::device::V4l2Io;
use crate::error::{CaptureError, Result};
use crate::negotiate::{negotiate, NegotiatedFormat, ResolutionPolicy};
use crate::ring::{BufferRing, Frame};
use crate::stream::{StreamController, StreamState};
use crate::traits::{DeviceIo, FourCC, FrameInfo};

/// Session parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Pixel format to negotiate.
    pub pixel_format: FourCC,
    /// Buffers to request from the driver (minimum 2).
    pub buffer_count: u32,
    /// How to pick among the resolutions the catalog lists.
    pub resolution_policy: ResolutionPolicy,
    /// How long to wait for the first frame after stream start.
    pub ready_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            pixel_format: FourCC::MJPG,
            buffer_count: 2,
            resolution_policy: ResolutionPolicy::FirstReported,
            ready_timeout: Duration::from_secs(1),
        }
    }
}

/// Whether `path` names a live device node rather than a file-backed
/// source. A live device that fails to open may come back (a loose cable,
/// slow enumeration) and is worth retrying; a missing file never will be.
/// The retry itself is the caller's policy — the core performs none.
#[must_use]
pub fn is_live_device(path: &Path) -> bool {
    path.starts_with("/dev")
}

/// An open, streaming capture session.
///
/// Owns the device backend exclusively. Construction runs the whole
/// pipeline — capability validation, format enumeration, negotiation,
/// buffer allocation, stream start and the first readiness wait — so a
/// successfully built session is ready to produce frames.
#[derive(Debug)]
pub struct CaptureSession<D: DeviceIo> {
    io: D,
    catalog: FormatCatalog,
    format: NegotiatedFormat,
    ring: BufferRing,
    controller: StreamController,
}

impl CaptureSession<V4l2Io> {
    /// Open a device node and bring it to streaming.
    pub fn open(path: impl AsRef<Path>, config: &CaptureConfig) -> Result<Self> {
        let io = V4l2Io::open(path)?;
        Self::with_device(io, config)
    }
}

impl<D: DeviceIo> CaptureSession<D> {
    /// Bring an already-open device backend to streaming.
    pub fn with_device(mut io: D, config: &CaptureConfig) -> Result<Self> {
        let caps = io
            .capabilities()
            .map_err(|source| CaptureError::DeviceNotFound {
                device: io.display_name(),
                source,
            })?;
        if !caps.can_capture {
            return Err(CaptureError::NotCaptureCapable {
                device: io.display_name(),
            });
        }
        if !caps.can_stream {
            return Err(CaptureError::NotStreamable {
                device: io.display_name(),
            });
        }
        tracing::info!(card = %caps.card, driver = %caps.driver, "device opened");

        let catalog = FormatCatalog::scan(&io)?;

        let mut controller = StreamController::new();
        let format = negotiate(
            &mut io,
            &catalog,
            config.pixel_format,
            config.resolution_policy,
        )?;
        controller.mark_configured()?;

        let ring = BufferRing::allocate(&mut io, config.buffer_count)?;
        controller.mark_buffers_ready()?;

        controller.start(&mut io)?;
        controller.wait_ready(&mut io, config.ready_timeout)?;

        Ok(Self {
            io,
            catalog,
            format,
            ring,
            controller,
        })
    }

    /// Everything the device advertised during enumeration.
    #[must_use]
    pub fn catalog(&self) -> &FormatCatalog {
        &self.catalog
    }

    /// The format active for this session.
    #[must_use]
    pub fn format(&self) -> &NegotiatedFormat {
        &self.format
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.controller.state()
    }

    /// The buffer ring, for observing ownership.
    #[must_use]
    pub fn ring(&self) -> &BufferRing {
        &self.ring
    }

    /// Block until the next frame or `timeout`.
    ///
    /// The returned view stays valid until [`Self::release_frame`] is
    /// called for its index (or the ring is read again); copy the data out
    /// to keep it longer. On timeout, buffer ownership and stream state
    /// are unchanged and the call may simply be retried.
    pub fn next_frame(&mut self, timeout: Duration) -> Result<Frame<'_>> {
        self.ring.dequeue(&mut self.io, timeout)
    }

    /// Return frame `index` to the driver for the next capture.
    pub fn release_frame(&mut self, index: u32) -> Result<()> {
        self.ring.requeue(&mut self.io, index)
    }

    /// Copy the next frame into `buf`, then immediately release its buffer.
    ///
    /// The copy happens before the requeue, so the data in `buf` can never
    /// be overwritten by the driver mid-read.
    pub fn read_into(&mut self, timeout: Duration, buf: &mut Vec<u8>) -> Result<FrameInfo> {
        let (index, bytes_used, sequence, timestamp) = {
            let frame = self.ring.dequeue(&mut self.io, timeout)?;
            buf.clear();
            buf.extend_from_slice(frame.data);
            (
                frame.index,
                frame.data.len() as u32,
                frame.sequence,
                frame.timestamp,
            )
        };
        self.ring.requeue(&mut self.io, index)?;
        Ok(FrameInfo {
            index,
            bytes_used,
            sequence,
            timestamp,
        })
    }

    /// Apply one numeric control to the open device.
    pub fn set_control(&mut self, id: u32, value: i32) -> Result<()> {
        controls::set_control(&mut self.io, id, value)
    }

    /// Apply an ordered list of named controls; see
    /// [`controls::apply_named`] for the ordering contract. Failures are
    /// collected per control, never aborting the rest.
    pub fn apply_controls(&mut self, settings: &[(&str, i32)]) -> Vec<ControlFailure> {
        controls::apply_named(&mut self.io, settings)
    }

    /// Stop streaming, unmap every buffer, and close the device.
    pub fn close(mut self) -> Result<()> {
        self.controller.stop(&mut self.io)
    }
}

impl<D: DeviceIo> Drop for CaptureSession<D> {
    fn drop(&mut self) {
        if let Err(err) = self.controller.stop(&mut self.io) {
            tracing::warn!(error = %err, "capture teardown failed");
        }
    }
}
