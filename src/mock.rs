//! In-memory fake device for exercising the core without hardware.
//!
//! The fake implements [`DeviceIo`] over plain vectors: an advertised
//! format table drives the enumeration protocol, a queue of buffer
//! indices stands in for the driver's capture queue, and dequeued buffers
//! are filled with a YUYV test pattern. Builders configure the failure
//! modes the tests need (capability gaps, short buffer grants, a device
//! that never becomes ready, order-sensitive exposure controls).

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use crate::controls::{
    CID_BRIGHTNESS, CID_CONTRAST, CID_EXPOSURE_ABSOLUTE, CID_EXPOSURE_AUTO, CID_GAMMA,
    CID_SATURATION, CID_WHITE_BALANCE_TEMPERATURE, CID_WHITE_BALANCE_TEMPERATURE_AUTO,
};
use crate::traits::{
    DeviceCapabilities, DeviceIo, Format, FormatDesc, FourCC, Fract, FrameInfo, FrameInterval,
    FrameSize,
};

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

/// Test pattern written into dequeued buffers (YUYV-shaped bytes).
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with the given Y, U, V values.
    Solid(u8, u8, u8),
}

/// One frame size the fake advertises, with its frame intervals.
#[derive(Debug, Clone)]
pub struct FakeSize {
    /// The size, in either driver encoding.
    pub size: FrameSize,
    /// Intervals reported for this size. May be empty.
    pub intervals: Vec<FrameInterval>,
}

impl FakeSize {
    /// A discrete size with discrete per-second rates.
    #[must_use]
    pub fn discrete(width: u32, height: u32, rates: &[u32]) -> Self {
        Self {
            size: FrameSize::Discrete { width, height },
            intervals: rates
                .iter()
                .map(|&denominator| {
                    FrameInterval::Discrete(Fract {
                        numerator: 1,
                        denominator,
                    })
                })
                .collect(),
        }
    }
}

/// One pixel format the fake advertises.
#[derive(Debug, Clone)]
pub struct FakeFormat {
    /// Format identifier and description.
    pub desc: FormatDesc,
    /// Sizes in enumeration order. May be empty.
    pub sizes: Vec<FakeSize>,
}

impl FakeFormat {
    /// Build an advertised format entry.
    #[must_use]
    pub fn new(fourcc: FourCC, description: &str, sizes: Vec<FakeSize>) -> Self {
        Self {
            desc: FormatDesc {
                fourcc,
                description: description.to_owned(),
            },
            sizes,
        }
    }
}

#[derive(Debug)]
struct FakeControl {
    id: u32,
    min: i32,
    max: i32,
    value: i32,
}

/// Fake device backend for tests.
#[derive(Debug)]
pub struct FakeDevice {
    capabilities: DeviceCapabilities,
    formats: Vec<FakeFormat>,
    current: Format,
    size_rounding: Option<(u32, u32)>,
    buffer_grant: Option<u32>,
    controls: Vec<FakeControl>,
    applied: Vec<(u32, i32)>,
    ready: bool,
    fail_stream_on: bool,
    pattern: TestPattern,
    frames: Vec<Vec<u8>>,
    queued: VecDeque<u32>,
    streaming: bool,
    sequence: u32,
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDevice {
    /// A capture-capable, streaming-capable fake advertising MJPG and
    /// YUYV at common resolutions, with the usual user controls.
    #[must_use]
    pub fn new() -> Self {
        let range = |id, min, max| FakeControl {
            id,
            min,
            max,
            value: min,
        };
        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            formats: vec![
                FakeFormat::new(
                    FourCC::MJPG,
                    "Motion-JPEG",
                    vec![FakeSize::discrete(640, 480, &[30])],
                ),
                FakeFormat::new(
                    FourCC::YUYV,
                    "YUYV 4:2:2",
                    vec![
                        FakeSize::discrete(640, 480, &[30, 15]),
                        FakeSize::discrete(160, 120, &[30]),
                    ],
                ),
            ],
            current: Format {
                width: 640,
                height: 480,
                fourcc: FourCC::YUYV,
                stride: 1280,
                size: 614_400,
            },
            size_rounding: None,
            buffer_grant: None,
            controls: vec![
                range(CID_BRIGHTNESS, 0, 1000),
                range(CID_CONTRAST, 0, 255),
                range(CID_SATURATION, 0, 255),
                range(CID_GAMMA, 72, 500),
                range(CID_WHITE_BALANCE_TEMPERATURE_AUTO, 0, 1),
                range(CID_WHITE_BALANCE_TEMPERATURE, 2800, 6500),
                range(CID_EXPOSURE_AUTO, 0, 3),
                range(CID_EXPOSURE_ABSOLUTE, 1, 10_000),
            ],
            applied: Vec::new(),
            ready: true,
            fail_stream_on: false,
            pattern: TestPattern::ColorBars,
            frames: Vec::new(),
            queued: VecDeque::new(),
            streaming: false,
            sequence: 0,
        }
    }

    /// Replace the advertised format table.
    #[must_use]
    pub fn with_formats(mut self, formats: Vec<FakeFormat>) -> Self {
        self.formats = formats;
        self
    }

    /// Replace the reported capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Grant exactly this many buffers regardless of the requested count.
    #[must_use]
    pub fn with_buffer_grant(mut self, granted: u32) -> Self {
        self.buffer_grant = Some(granted);
        self
    }

    /// Round every applied format to these dimensions, the way drivers
    /// snap requests to supported sizes.
    #[must_use]
    pub fn with_size_rounding(mut self, width: u32, height: u32) -> Self {
        self.size_rounding = Some((width, height));
        self
    }

    /// Set the test pattern for generated frames.
    #[must_use]
    pub fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Never signal readiness, so waits run their full budget.
    #[must_use]
    pub fn never_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    /// Reject stream start.
    #[must_use]
    pub fn with_failing_stream_on(mut self) -> Self {
        self.fail_stream_on = true;
        self
    }

    /// Controls applied so far, in application order.
    #[must_use]
    pub fn applied_controls(&self) -> &[(u32, i32)] {
        &self.applied
    }

    /// Buffers currently queued to the fake driver.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    /// Buffers currently mapped.
    #[must_use]
    pub fn mapped_count(&self) -> usize {
        self.frames.len()
    }

    /// Whether streaming is on.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn control_value(&self, id: u32) -> Option<i32> {
        self.controls.iter().find(|c| c.id == id).map(|c| c.value)
    }
}

impl DeviceIo for FakeDevice {
    fn display_name(&self) -> String {
        "fake camera".to_owned()
    }

    fn capabilities(&self) -> io::Result<DeviceCapabilities> {
        Ok(self.capabilities.clone())
    }

    fn enum_pixel_format(&self, index: u32) -> io::Result<Option<FormatDesc>> {
        Ok(self
            .formats
            .get(index as usize)
            .map(|format| format.desc.clone()))
    }

    fn enum_frame_size(&self, fourcc: FourCC, index: u32) -> io::Result<Option<FrameSize>> {
        let Some(format) = self.formats.iter().find(|f| f.desc.fourcc == fourcc) else {
            return Ok(None);
        };
        Ok(format.sizes.get(index as usize).map(|size| size.size))
    }

    fn enum_frame_interval(
        &self,
        fourcc: FourCC,
        width: u32,
        height: u32,
        index: u32,
    ) -> io::Result<Option<FrameInterval>> {
        let Some(format) = self.formats.iter().find(|f| f.desc.fourcc == fourcc) else {
            return Ok(None);
        };
        let Some(size) = format
            .sizes
            .iter()
            .find(|s| s.size.representative() == (width, height))
        else {
            return Ok(None);
        };
        Ok(size.intervals.get(index as usize).copied())
    }

    fn format(&self) -> io::Result<Format> {
        Ok(self.current.clone())
    }

    fn set_format(&mut self, format: &Format) -> io::Result<Format> {
        let (width, height) = self
            .size_rounding
            .unwrap_or((format.width, format.height));
        // the fake is YUYV-shaped: two bytes per pixel
        let stride = width * 2;
        self.current = Format {
            width,
            height,
            fourcc: format.fourcc,
            stride,
            size: stride * height,
        };
        Ok(self.current.clone())
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let granted = self.buffer_grant.unwrap_or(count);
        self.frames.clear();
        self.queued.clear();
        self.sequence = 0;
        Ok(granted)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<usize> {
        if index as usize != self.frames.len() {
            return Err(errno(libc::EINVAL));
        }
        let len = self.current.size as usize;
        self.frames.push(vec![0_u8; len]);
        Ok(len)
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        if index as usize >= self.frames.len() || self.queued.contains(&index) {
            return Err(errno(libc::EINVAL));
        }
        self.queued.push_back(index);
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> io::Result<FrameInfo> {
        if !self.streaming {
            return Err(errno(libc::EINVAL));
        }
        let Some(index) = self.queued.pop_front() else {
            return Err(errno(libc::EAGAIN));
        };

        let format = self.current.clone();
        if let Some(frame) = self.frames.get_mut(index as usize) {
            generate_test_frame(frame, &format, self.pattern);
        }
        let sequence = self.sequence;
        self.sequence += 1;

        Ok(FrameInfo {
            index,
            bytes_used: self.current.size,
            sequence,
            timestamp: Duration::from_millis(u64::from(sequence) * 33), // ~30fps
        })
    }

    fn buffer(&self, index: u32) -> io::Result<&[u8]> {
        self.frames
            .get(index as usize)
            .map(Vec::as_slice)
            .ok_or_else(|| errno(libc::EINVAL))
    }

    fn stream_on(&mut self) -> io::Result<()> {
        if self.fail_stream_on {
            return Err(errno(libc::EIO));
        }
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.streaming = false;
        self.queued.clear();
        Ok(())
    }

    fn release_buffers(&mut self) -> io::Result<()> {
        self.frames.clear();
        self.queued.clear();
        Ok(())
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        if self.ready && self.streaming && !self.queued.is_empty() {
            return Ok(true);
        }
        // stand in for a blocking select: burn a slice of the budget so
        // deadline loops terminate without spinning
        std::thread::sleep(timeout.min(Duration::from_millis(2)));
        Ok(false)
    }

    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()> {
        // manual exposure is only writable once auto-exposure is off,
        // mirroring the order sensitivity of real camera drivers
        if id == CID_EXPOSURE_ABSOLUTE && self.control_value(CID_EXPOSURE_AUTO) != Some(1) {
            return Err(errno(libc::EBUSY));
        }

        let Some(control) = self.controls.iter_mut().find(|c| c.id == id) else {
            return Err(errno(libc::EINVAL));
        };
        if value < control.min || value > control.max {
            return Err(errno(libc::ERANGE));
        }
        control.value = value;
        self.applied.push((id, value));
        Ok(())
    }
}

/// Fill `data` with the requested test pattern.
fn generate_test_frame(data: &mut [u8], format: &Format, pattern: TestPattern) {
    match pattern {
        TestPattern::ColorBars => generate_color_bars(data, format.width, format.height),
        TestPattern::Gradient => generate_gradient(data, format.width, format.height),
        TestPattern::Solid(y, u, v) => generate_solid(data, y, u, v),
    }
}

/// Generate YUYV color bars.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    // 8 bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128),
        (210, 16, 146),
        (170, 166, 16),
        (145, 54, 34),
        (106, 202, 222),
        (81, 90, 240),
        (41, 240, 110),
        (16, 128, 128),
    ];

    let bar_width = (width / 8).max(1);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let bar_idx = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = bars[bar_idx];

            let offset = ((y * width + x) * 2) as usize;
            if offset + 3 < data.len() {
                data[offset] = y_val;
                data[offset + 1] = u_val;
                data[offset + 2] = y_val;
                data[offset + 3] = v_val;
            }
        }
    }
}

/// Generate a YUYV horizontal gradient.
fn generate_gradient(data: &mut [u8], width: u32, height: u32) {
    for y in 0..height {
        for x in (0..width).step_by(2) {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width.max(1)) as u8;
            let offset = ((y * width + x) * 2) as usize;

            if offset + 3 < data.len() {
                data[offset] = y_val;
                data[offset + 1] = 128;
                data[offset + 2] = y_val;
                data[offset + 3] = 128;
            }
        }
    }
}

/// Generate a solid YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for i in (0..data.len()).step_by(4) {
        if i + 3 < data.len() {
            data[i] = y;
            data[i + 1] = u;
            data[i + 2] = y;
            data[i + 3] = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_reports_capabilities() {
        let device = FakeDevice::new();
        let caps = device.capabilities().expect("capabilities failed");
        assert_eq!(caps.driver, "mock");
        assert!(caps.can_capture);
        assert!(caps.can_stream);
    }

    #[test]
    fn fake_walks_the_enumeration_protocol() {
        let device = FakeDevice::new();

        let first = device
            .enum_pixel_format(0)
            .expect("enum failed")
            .expect("no format at index 0");
        assert_eq!(first.fourcc, FourCC::MJPG);
        assert!(device.enum_pixel_format(9).expect("enum failed").is_none());

        let size = device
            .enum_frame_size(FourCC::YUYV, 0)
            .expect("enum failed")
            .expect("no size at index 0");
        assert_eq!(size.representative(), (640, 480));

        let interval = device
            .enum_frame_interval(FourCC::YUYV, 640, 480, 1)
            .expect("enum failed")
            .expect("no interval at index 1");
        assert!((interval.slowest_rate() - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn fake_capture_cycle_produces_frames() {
        let mut device = FakeDevice::new();
        let granted = device.request_buffers(2).expect("reqbufs failed");
        for index in 0..granted {
            device.map_buffer(index).expect("map failed");
            device.queue_buffer(index).expect("queue failed");
        }
        device.stream_on().expect("stream on failed");

        let info = device.dequeue_buffer().expect("dequeue failed");
        assert_eq!(info.sequence, 0);
        let data = device.buffer(info.index).expect("buffer failed");
        assert_eq!(data.len(), info.bytes_used as usize);

        let info = {
            device.queue_buffer(info.index).expect("requeue failed");
            device.dequeue_buffer().expect("dequeue failed")
        };
        assert_eq!(info.sequence, 1);
        assert_eq!(info.timestamp, Duration::from_millis(33));
    }

    #[test]
    fn double_queue_is_rejected() {
        let mut device = FakeDevice::new();
        device.request_buffers(2).expect("reqbufs failed");
        device.map_buffer(0).expect("map failed");
        device.queue_buffer(0).expect("queue failed");
        assert!(device.queue_buffer(0).is_err());
    }

    #[test]
    fn solid_pattern_fills_buffer() {
        let format = Format {
            width: 64,
            height: 64,
            fourcc: FourCC::YUYV,
            stride: 128,
            size: 8192,
        };
        let mut data = vec![0_u8; format.size as usize];
        generate_test_frame(&mut data, &format, TestPattern::Solid(128, 64, 192));

        assert_eq!(data[0], 128);
        assert_eq!(data[1], 64);
        assert_eq!(data[2], 128);
        assert_eq!(data[3], 192);
    }

    #[test]
    fn gradient_pattern_brightens_left_to_right() {
        let format = Format {
            width: 640,
            height: 480,
            fourcc: FourCC::YUYV,
            stride: 1280,
            size: 614_400,
        };
        let mut data = vec![0_u8; format.size as usize];
        generate_test_frame(&mut data, &format, TestPattern::Gradient);

        assert!(data[0] < 10);
        let last_row_start = (479 * 640 * 2) as usize;
        assert!(data[last_row_start + 638 * 2] > 200);
    }
}
