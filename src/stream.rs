//! Stream lifecycle: the state machine and the bounded readiness wait.

use std::time::{Duration, Instant};

use crate::error::{CaptureError, Result};
use crate::traits::DeviceIo;

/// Lifecycle of a capture session.
///
/// Transitions are monotonic — `Closed → Configured → BuffersReady →
/// Streaming` — except for the terminal close, which is reachable from
/// every state and is the only way driver resources are released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No device state established.
    Closed,
    /// A format has been negotiated.
    Configured,
    /// All buffers are mapped and queued.
    BuffersReady,
    /// The driver is capturing.
    Streaming,
}

/// Drives the stream state machine over a device backend.
#[derive(Debug)]
pub struct StreamController {
    state: StreamState,
}

impl Default for StreamController {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamController {
    /// A controller in the `Closed` state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: StreamState::Closed,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    /// Record that format negotiation completed.
    pub fn mark_configured(&mut self) -> Result<()> {
        self.expect(StreamState::Closed, "format configuration")?;
        self.state = StreamState::Configured;
        Ok(())
    }

    /// Record that every buffer has been mapped and queued.
    pub fn mark_buffers_ready(&mut self) -> Result<()> {
        self.expect(StreamState::Configured, "buffer allocation")?;
        self.state = StreamState::BuffersReady;
        Ok(())
    }

    /// Issue stream-on. Requires `BuffersReady`; fails with
    /// [`CaptureError::StreamStartFailed`] when the driver rejects it.
    pub fn start<D: DeviceIo>(&mut self, io: &mut D) -> Result<()> {
        self.expect(StreamState::BuffersReady, "stream start")?;
        io.stream_on().map_err(CaptureError::StreamStartFailed)?;
        self.state = StreamState::Streaming;
        tracing::info!("streaming started");
        Ok(())
    }

    /// Wait until the device signals a completed buffer.
    ///
    /// The total wait never exceeds `timeout` (plus scheduling slack)
    /// regardless of how many polling rounds run underneath: the deadline
    /// is computed once at entry and each round only gets the remainder.
    pub fn wait_ready<D: DeviceIo>(&self, io: &mut D, timeout: Duration) -> Result<()> {
        if wait_deadline(io, timeout)? {
            Ok(())
        } else {
            Err(CaptureError::DeviceNotReady(timeout))
        }
    }

    /// Tear down: stream-off when streaming, unmap every buffer, and
    /// transition to `Closed`.
    ///
    /// This is the only path that releases driver resources, and it is
    /// safe to call from any state an error-recovery path may reach —
    /// including repeatedly.
    pub fn stop<D: DeviceIo>(&mut self, io: &mut D) -> Result<()> {
        if self.state == StreamState::Closed {
            return Ok(());
        }

        let mut first_error = None;
        if self.state == StreamState::Streaming {
            if let Err(err) = io.stream_off() {
                tracing::warn!(error = %err, "stream off failed");
                first_error = Some(err);
            }
        }
        if let Err(err) = io.release_buffers() {
            tracing::warn!(error = %err, "buffer release failed");
            first_error.get_or_insert(err);
        }

        self.state = StreamState::Closed;
        tracing::info!("capture stopped");
        match first_error {
            None => Ok(()),
            Some(err) => Err(CaptureError::Io(err)),
        }
    }

    fn expect(&self, required: StreamState, operation: &'static str) -> Result<()> {
        if self.state == required {
            Ok(())
        } else {
            Err(CaptureError::InvalidState {
                operation,
                required,
                actual: self.state,
            })
        }
    }
}

/// Wait for readiness within `timeout`, across as many polling rounds as
/// needed, without ever exceeding the budget in total. Returns `false`
/// once the deadline passes without readiness.
pub(crate) fn wait_deadline<D: DeviceIo>(io: &mut D, timeout: Duration) -> Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if io.wait_readable(remaining)? {
            return Ok(true);
        }
        if remaining.is_zero() {
            return Ok(false);
        }
    }
}
