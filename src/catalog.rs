//! Format enumeration and the format catalog.
//!
//! The driver advertises its capabilities through three nested
//! index-walking protocols: pixel formats, frame sizes per format, and
//! frame intervals per (format, size) pair. [`FormatScan`] walks them as
//! one lazy event sequence; [`FormatCatalog`] folds the events into an
//! ordered table. Entries keep the driver's enumeration order — this is a
//! deliberate pass-through, not a ranking.

use crate::error::{CaptureError, Result};
use crate::traits::{DeviceIo, FormatDesc, FourCC};

/// One step of the format scan.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// A pixel format reported by the driver.
    Format(FormatDesc),
    /// A frame size supported by the most recent format.
    Resolution {
        /// Representative width in pixels.
        width: u32,
        /// Representative height in pixels.
        height: u32,
    },
    /// A frame rate supported by the most recent resolution.
    Rate(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanLevel {
    Formats,
    Sizes,
    Intervals,
}

/// Lazy walk over the driver's nested enumeration protocols.
///
/// Each call to `next` issues at most one enumeration operation, the walk
/// is finite (every level ends on the driver's end signal), and it is
/// restartable by constructing a new scan. An empty inner level never
/// aborts the outer one: a format with no sizes, or a size with no
/// intervals, simply produces no inner events.
pub struct FormatScan<'a, D: DeviceIo> {
    io: &'a D,
    level: ScanLevel,
    format_index: u32,
    size_index: u32,
    interval_index: u32,
    fourcc: Option<FourCC>,
    resolution: (u32, u32),
    done: bool,
}

impl<'a, D: DeviceIo> FormatScan<'a, D> {
    /// Start a fresh scan against `io`. Scanning never mutates device state.
    #[must_use]
    pub fn new(io: &'a D) -> Self {
        Self {
            io,
            level: ScanLevel::Formats,
            format_index: 0,
            size_index: 0,
            interval_index: 0,
            fourcc: None,
            resolution: (0, 0),
            done: false,
        }
    }
}

impl<D: DeviceIo> Iterator for FormatScan<'_, D> {
    type Item = Result<ScanEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            match self.level {
                ScanLevel::Formats => {
                    match self.io.enum_pixel_format(self.format_index) {
                        Ok(Some(desc)) => {
                            self.format_index += 1;
                            self.size_index = 0;
                            self.fourcc = Some(desc.fourcc);
                            self.level = ScanLevel::Sizes;
                            return Some(Ok(ScanEvent::Format(desc)));
                        }
                        Ok(None) => {
                            self.done = true;
                            return None;
                        }
                        Err(err) => {
                            self.done = true;
                            return Some(Err(CaptureError::EnumerationFailed(err)));
                        }
                    }
                }
                ScanLevel::Sizes => {
                    let fourcc = self.fourcc?;
                    match self.io.enum_frame_size(fourcc, self.size_index) {
                        Ok(Some(size)) => {
                            self.size_index += 1;
                            self.interval_index = 0;
                            let (width, height) = size.representative();
                            self.resolution = (width, height);
                            self.level = ScanLevel::Intervals;
                            return Some(Ok(ScanEvent::Resolution { width, height }));
                        }
                        Ok(None) => {
                            self.level = ScanLevel::Formats;
                        }
                        Err(err) => {
                            self.done = true;
                            return Some(Err(CaptureError::EnumerationFailed(err)));
                        }
                    }
                }
                ScanLevel::Intervals => {
                    let fourcc = self.fourcc?;
                    let (width, height) = self.resolution;
                    match self
                        .io
                        .enum_frame_interval(fourcc, width, height, self.interval_index)
                    {
                        Ok(Some(interval)) => {
                            self.interval_index += 1;
                            return Some(Ok(ScanEvent::Rate(interval.slowest_rate())));
                        }
                        Ok(None) => {
                            self.level = ScanLevel::Sizes;
                        }
                        Err(err) => {
                            self.done = true;
                            return Some(Err(CaptureError::EnumerationFailed(err)));
                        }
                    }
                }
            }
        }
    }
}

/// One resolution of a catalog entry, with the frame rates the driver
/// reports for it. The rate list may be empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionEntry {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Frame rates in frames per second, in enumeration order.
    pub rates: Vec<f64>,
}

/// One pixel format and everything the driver advertises for it.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatEntry {
    /// Pixel format identifier.
    pub fourcc: FourCC,
    /// Driver-provided description string.
    pub description: String,
    /// Resolutions in enumeration order. May be empty.
    pub resolutions: Vec<ResolutionEntry>,
}

/// Everything the device advertises, in device enumeration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatCatalog {
    entries: Vec<FormatEntry>,
}

impl FormatCatalog {
    /// Walk the device's enumeration protocols and build the catalog.
    pub fn scan<D: DeviceIo>(io: &D) -> Result<Self> {
        let mut entries: Vec<FormatEntry> = Vec::new();

        for event in FormatScan::new(io) {
            match event? {
                ScanEvent::Format(desc) => {
                    tracing::debug!(format = %desc.fourcc, description = %desc.description, "advertised format");
                    entries.push(FormatEntry {
                        fourcc: desc.fourcc,
                        description: desc.description,
                        resolutions: Vec::new(),
                    });
                }
                ScanEvent::Resolution { width, height } => {
                    if let Some(entry) = entries.last_mut() {
                        entry.resolutions.push(ResolutionEntry {
                            width,
                            height,
                            rates: Vec::new(),
                        });
                    }
                }
                ScanEvent::Rate(rate) => {
                    if let Some(resolution) =
                        entries.last_mut().and_then(|e| e.resolutions.last_mut())
                    {
                        resolution.rates.push(rate);
                    }
                }
            }
        }

        Ok(Self { entries })
    }

    /// All entries, in device enumeration order.
    #[must_use]
    pub fn entries(&self) -> &[FormatEntry] {
        &self.entries
    }

    /// Look up the entry for a pixel format.
    #[must_use]
    pub fn get(&self, fourcc: FourCC) -> Option<&FormatEntry> {
        self.entries.iter().find(|e| e.fourcc == fourcc)
    }

    /// Whether the device advertised no formats at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of advertised formats.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
