//! Driver-shared buffer ring with explicit ownership handoff.
//!
//! Every buffer is owned by exactly one side at any instant: the driver
//! (queued, may be written to) or the application (dequeued, safe to
//! read). The ring tracks the tags; buffer bytes are only reachable
//! through the [`Frame`] borrow handed out while a buffer is
//! application-owned, so reading driver-owned memory is unrepresentable
//! rather than merely discouraged.

use std::time::Duration;

use crate::error::{CaptureError, Result};
use crate::stream::wait_deadline;
use crate::traits::DeviceIo;

/// Fewest buffers a ring can run with: one in flight while one is
/// being captured.
pub const MIN_BUFFERS: u32 = 2;

/// Which side of the driver boundary a buffer currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOwner {
    /// Queued; the driver may write into it.
    Driver,
    /// Dequeued; the application may read it.
    Application,
}

/// A dequeued frame: a view into driver-shared memory.
///
/// The view stays valid and stable until the buffer is requeued (or the
/// ring is read again) — both take the ring mutably, so the compiler
/// forces this view to be dropped first. Callers that need the data past
/// that point must copy it out.
#[derive(Debug)]
pub struct Frame<'a> {
    /// Ring index; pass to [`BufferRing::requeue`] to release the buffer.
    pub index: u32,
    /// The bytes the driver produced for this frame.
    pub data: &'a [u8],
    /// Driver frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
}

/// The fixed pool of driver-shared buffers and their ownership tags.
#[derive(Debug)]
pub struct BufferRing {
    owners: Vec<BufferOwner>,
}

impl BufferRing {
    /// Request, map and queue `count` buffers.
    ///
    /// Fails with [`CaptureError::BufferAllocationFailed`] when the driver
    /// grants fewer than requested. Some drivers round the count up; all
    /// granted buffers are then mapped and queued so streaming never
    /// starts with an unqueued buffer, and the ring count is the granted
    /// count.
    pub fn allocate<D: DeviceIo>(io: &mut D, count: u32) -> Result<Self> {
        if count < MIN_BUFFERS {
            return Err(CaptureError::BufferCountTooSmall(count));
        }

        let granted = io
            .request_buffers(count)
            .map_err(CaptureError::BufferSetupFailed)?;
        if granted < count {
            return Err(CaptureError::BufferAllocationFailed {
                requested: count,
                granted,
            });
        }
        if granted > count {
            tracing::debug!(requested = count, granted, "driver granted extra buffers");
        }

        let mut owners = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            let len = io
                .map_buffer(index)
                .map_err(CaptureError::BufferSetupFailed)?;
            io.queue_buffer(index)
                .map_err(CaptureError::BufferSetupFailed)?;
            tracing::trace!(index, len, "buffer mapped and queued");
            owners.push(BufferOwner::Driver);
        }

        Ok(Self { owners })
    }

    /// Number of buffers in the ring.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.owners.len() as u32
    }

    /// Ownership tag of buffer `index`, if the index is in range.
    #[must_use]
    pub fn owner(&self, index: u32) -> Option<BufferOwner> {
        self.owners.get(index as usize).copied()
    }

    /// Number of driver-owned buffers.
    #[must_use]
    pub fn driver_owned(&self) -> usize {
        self.owners
            .iter()
            .filter(|&&o| o == BufferOwner::Driver)
            .count()
    }

    /// Number of application-owned buffers.
    #[must_use]
    pub fn application_owned(&self) -> usize {
        self.owners
            .iter()
            .filter(|&&o| o == BufferOwner::Application)
            .count()
    }

    /// Block until the driver completes a buffer or `timeout` elapses.
    ///
    /// On success the buffer becomes application-owned and a view of its
    /// used bytes is returned. On expiry this fails with
    /// [`CaptureError::CaptureTimeout`] and every ownership tag is left
    /// unchanged, so the wait can simply be retried.
    pub fn dequeue<'a, D: DeviceIo>(
        &mut self,
        io: &'a mut D,
        timeout: Duration,
    ) -> Result<Frame<'a>> {
        if !wait_deadline(io, timeout)? {
            return Err(CaptureError::CaptureTimeout(timeout));
        }

        let info = io.dequeue_buffer()?;
        let slot = self
            .owners
            .get_mut(info.index as usize)
            .ok_or(CaptureError::InvalidBufferIndex(info.index))?;
        *slot = BufferOwner::Application;

        let data = io.buffer(info.index)?;
        let used = (info.bytes_used as usize).min(data.len());
        Ok(Frame {
            index: info.index,
            data: data.get(..used).unwrap_or(data),
            sequence: info.sequence,
            timestamp: info.timestamp,
        })
    }

    /// Hand buffer `index` back to the driver for the next capture.
    ///
    /// Fails with [`CaptureError::InvalidBufferIndex`] when the index is
    /// out of range or the buffer is already driver-owned.
    pub fn requeue<D: DeviceIo>(&mut self, io: &mut D, index: u32) -> Result<()> {
        match self.owner(index) {
            Some(BufferOwner::Application) => {}
            _ => return Err(CaptureError::InvalidBufferIndex(index)),
        }

        io.queue_buffer(index)?;
        self.owners[index as usize] = BufferOwner::Driver;
        Ok(())
    }
}
