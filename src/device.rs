//! Raw V4L2 backend: ioctl marshaling, buffer mapping and readiness waits.
//!
//! This is the only module containing `unsafe`; everything above it works
//! through the [`DeviceIo`] trait. Request codes are computed the same way
//! `videodev2.h` computes them, from the direction, the `'V'` ioctl type,
//! the request number and the argument size, so they stay correct across
//! 32/64-bit layouts.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::slice;
use std::time::Duration;

use crate::error::CaptureError;
use crate::traits::{
    DeviceCapabilities, DeviceIo, Format, FormatDesc, FourCC, Fract, FrameInfo, FrameInterval,
    FrameSize,
};

const IOC_WRITE: u64 = 1;
const IOC_READ: u64 = 2;
const VIDIOC_TYPE: u64 = b'V' as u64;

const fn ioc(dir: u64, nr: u64, size: usize) -> u64 {
    (dir << 30) | ((size as u64) << 16) | (VIDIOC_TYPE << 8) | nr
}

const fn ior<T>(nr: u64) -> u64 {
    ioc(IOC_READ, nr, mem::size_of::<T>())
}

const fn iow<T>(nr: u64) -> u64 {
    ioc(IOC_WRITE, nr, mem::size_of::<T>())
}

const fn iowr<T>(nr: u64) -> u64 {
    ioc(IOC_READ | IOC_WRITE, nr, mem::size_of::<T>())
}

const VIDIOC_QUERYCAP: u64 = ior::<Capability>(0);
const VIDIOC_ENUM_FMT: u64 = iowr::<FmtDesc>(2);
const VIDIOC_G_FMT: u64 = iowr::<FormatArg>(4);
const VIDIOC_S_FMT: u64 = iowr::<FormatArg>(5);
const VIDIOC_REQBUFS: u64 = iowr::<RequestBuffers>(8);
const VIDIOC_QUERYBUF: u64 = iowr::<BufferArg>(9);
const VIDIOC_QBUF: u64 = iowr::<BufferArg>(15);
const VIDIOC_DQBUF: u64 = iowr::<BufferArg>(17);
const VIDIOC_STREAMON: u64 = iow::<libc::c_int>(18);
const VIDIOC_STREAMOFF: u64 = iow::<libc::c_int>(19);
const VIDIOC_S_CTRL: u64 = iowr::<ControlArg>(28);
const VIDIOC_ENUM_FRAMESIZES: u64 = iowr::<FrameSizeEnum>(74);
const VIDIOC_ENUM_FRAMEINTERVALS: u64 = iowr::<FrameIntervalEnum>(75);

const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
const V4L2_CAP_STREAMING: u32 = 0x0400_0000;
const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
const V4L2_MEMORY_MMAP: u32 = 1;
const V4L2_FRMSIZE_TYPE_DISCRETE: u32 = 1;
const V4L2_FRMIVAL_TYPE_DISCRETE: u32 = 1;

#[allow(dead_code)] // kernel writes fields we never read
#[repr(C)]
struct Capability {
    driver: [u8; 16],
    card: [u8; 32],
    bus_info: [u8; 32],
    version: u32,
    capabilities: u32,
    device_caps: u32,
    reserved: [u32; 3],
}

#[allow(dead_code)] // kernel writes fields we never read
#[repr(C)]
struct FmtDesc {
    index: u32,
    type_: u32,
    flags: u32,
    description: [u8; 32],
    pixelformat: u32,
    mbus_code: u32,
    reserved: [u32; 3],
}

#[allow(dead_code)] // kernel writes fields we never read
#[repr(C)]
struct FrameSizeEnum {
    index: u32,
    pixel_format: u32,
    type_: u32,
    // union of discrete { width, height } and stepwise
    // { min_width, max_width, step_width, min_height, max_height, step_height }
    m: [u32; 6],
    reserved: [u32; 2],
}

#[allow(dead_code)] // kernel writes fields we never read
#[repr(C)]
struct FrameIntervalEnum {
    index: u32,
    pixel_format: u32,
    width: u32,
    height: u32,
    type_: u32,
    // union of a discrete fract and stepwise { min, max, step } fracts
    m: [u32; 6],
    reserved: [u32; 2],
}

#[allow(dead_code)] // kernel writes fields we never read
#[repr(C)]
struct PixFormat {
    width: u32,
    height: u32,
    pixelformat: u32,
    field: u32,
    bytesperline: u32,
    sizeimage: u32,
    colorspace: u32,
    priv_: u32,
    flags: u32,
    ycbcr_enc: u32,
    quantization: u32,
    xfer_func: u32,
}

#[allow(dead_code)] // kernel writes fields we never read
#[repr(C)]
struct FormatArg {
    type_: u32,
    // the kernel union is pointer-aligned on LP64
    #[cfg(target_pointer_width = "64")]
    _align: u32,
    pix: PixFormat,
    // pads the kernel union out to its full 200 bytes
    _space: [u8; 152],
}

#[allow(dead_code)] // kernel writes fields we never read
#[repr(C)]
struct RequestBuffers {
    count: u32,
    type_: u32,
    memory: u32,
    capabilities: u32,
    flags: u8,
    reserved: [u8; 3],
}

#[allow(dead_code)] // kernel writes fields we never read
#[repr(C)]
struct Timecode {
    type_: u32,
    flags: u32,
    frames: u8,
    seconds: u8,
    minutes: u8,
    hours: u8,
    userbits: [u8; 4],
}

#[allow(dead_code)]
#[repr(C)]
union BufferM {
    offset: u32,
    userptr: libc::c_ulong,
    fd: libc::c_int,
}

#[allow(dead_code)] // kernel writes fields we never read
#[repr(C)]
struct BufferArg {
    index: u32,
    type_: u32,
    bytesused: u32,
    flags: u32,
    field: u32,
    timestamp: libc::timeval,
    timecode: Timecode,
    sequence: u32,
    memory: u32,
    m: BufferM,
    length: u32,
    reserved2: u32,
    request_fd: u32,
}

#[allow(dead_code)] // kernel writes fields we never read
#[repr(C)]
struct ControlArg {
    id: u32,
    value: i32,
}

/// Zero-initialize an ioctl argument.
fn zeroed<T>() -> T {
    // SAFETY: every argument type here is a plain integer aggregate, for
    // which the all-zero bit pattern is a valid value.
    unsafe { mem::zeroed() }
}

/// Whether an errno marks the end of an enumeration level rather than a
/// real failure. `ENOTTY` covers drivers that lack the enumeration ioctl.
fn is_enum_end(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EINVAL | libc::ENOTTY))
}

/// Trim a fixed-size, NUL-padded driver string.
fn fixed_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(bytes.get(..end).unwrap_or(bytes)).into_owned()
}

/// One buffer's worth of driver-shared memory.
struct MappedRegion {
    ptr: *mut libc::c_void,
    len: usize,
}

impl MappedRegion {
    fn as_slice(&self) -> &[u8] {
        // SAFETY: the region stays mapped for the lifetime of `self`, and
        // the ring's ownership discipline keeps the driver from writing
        // while the application reads.
        unsafe { slice::from_raw_parts(self.ptr.cast::<u8>(), self.len) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` came from a successful mmap of this length.
        unsafe {
            libc::munmap(self.ptr, self.len);
        }
    }
}

/// Real device backend speaking the streaming-capture ioctl protocol.
///
/// Owns the device node exclusively; dropping the backend closes it (and
/// unmaps any remaining buffers).
pub struct V4l2Io {
    fd: OwnedFd,
    path: PathBuf,
    buffers: Vec<MappedRegion>,
}

impl V4l2Io {
    /// Open a device node for capture.
    ///
    /// The node is opened read/write with no buffering layer in between.
    /// Open failures surface as [`CaptureError::DeviceNotFound`]; whether
    /// that is fatal or worth retrying is the caller's policy.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref().to_path_buf();
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|err| {
            CaptureError::DeviceNotFound {
                device: path.display().to_string(),
                source: io::Error::new(io::ErrorKind::InvalidInput, err),
            }
        })?;

        // SAFETY: c_path is a valid NUL-terminated string.
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR) };
        if fd < 0 {
            return Err(CaptureError::DeviceNotFound {
                device: path.display().to_string(),
                source: io::Error::last_os_error(),
            });
        }

        // SAFETY: fd is a freshly opened descriptor we own.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self {
            fd,
            path,
            buffers: Vec::new(),
        })
    }

    /// Issue an ioctl, retrying when a signal interrupts it.
    fn xioctl<T>(&self, request: u64, arg: &mut T) -> io::Result<()> {
        loop {
            // SAFETY: `request` encodes the size of `T` by construction of
            // the VIDIOC_* constants, so the kernel reads/writes within the
            // argument's bounds.
            let rc = unsafe { libc::ioctl(self.fd.as_raw_fd(), request as _, ptr::from_mut(arg)) };
            if rc == -1 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(err);
            }
            return Ok(());
        }
    }
}

impl DeviceIo for V4l2Io {
    fn display_name(&self) -> String {
        self.path.display().to_string()
    }

    fn capabilities(&self) -> io::Result<DeviceCapabilities> {
        let mut cap: Capability = zeroed();
        self.xioctl(VIDIOC_QUERYCAP, &mut cap)?;

        Ok(DeviceCapabilities {
            driver: fixed_str(&cap.driver),
            card: fixed_str(&cap.card),
            bus_info: fixed_str(&cap.bus_info),
            can_capture: cap.capabilities & V4L2_CAP_VIDEO_CAPTURE != 0,
            can_stream: cap.capabilities & V4L2_CAP_STREAMING != 0,
        })
    }

    fn enum_pixel_format(&self, index: u32) -> io::Result<Option<FormatDesc>> {
        let mut desc: FmtDesc = zeroed();
        desc.index = index;
        desc.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;

        match self.xioctl(VIDIOC_ENUM_FMT, &mut desc) {
            Ok(()) => Ok(Some(FormatDesc {
                fourcc: FourCC::from_code(desc.pixelformat),
                description: fixed_str(&desc.description),
            })),
            Err(err) if is_enum_end(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn enum_frame_size(&self, fourcc: FourCC, index: u32) -> io::Result<Option<FrameSize>> {
        let mut arg: FrameSizeEnum = zeroed();
        arg.index = index;
        arg.pixel_format = fourcc.code();

        match self.xioctl(VIDIOC_ENUM_FRAMESIZES, &mut arg) {
            Ok(()) => Ok(Some(if arg.type_ == V4L2_FRMSIZE_TYPE_DISCRETE {
                FrameSize::Discrete {
                    width: arg.m[0],
                    height: arg.m[1],
                }
            } else {
                // continuous ranges arrive as stepwise with step 1
                FrameSize::Stepwise {
                    min_width: arg.m[0],
                    max_width: arg.m[1],
                    step_width: arg.m[2],
                    min_height: arg.m[3],
                    max_height: arg.m[4],
                    step_height: arg.m[5],
                }
            })),
            Err(err) if is_enum_end(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn enum_frame_interval(
        &self,
        fourcc: FourCC,
        width: u32,
        height: u32,
        index: u32,
    ) -> io::Result<Option<FrameInterval>> {
        let mut arg: FrameIntervalEnum = zeroed();
        arg.index = index;
        arg.pixel_format = fourcc.code();
        arg.width = width;
        arg.height = height;

        match self.xioctl(VIDIOC_ENUM_FRAMEINTERVALS, &mut arg) {
            Ok(()) => Ok(Some(if arg.type_ == V4L2_FRMIVAL_TYPE_DISCRETE {
                FrameInterval::Discrete(Fract {
                    numerator: arg.m[0],
                    denominator: arg.m[1],
                })
            } else {
                FrameInterval::Stepwise {
                    min: Fract {
                        numerator: arg.m[0],
                        denominator: arg.m[1],
                    },
                    max: Fract {
                        numerator: arg.m[2],
                        denominator: arg.m[3],
                    },
                    step: Fract {
                        numerator: arg.m[4],
                        denominator: arg.m[5],
                    },
                }
            })),
            Err(err) if is_enum_end(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn format(&self) -> io::Result<Format> {
        let mut arg: FormatArg = zeroed();
        arg.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        self.xioctl(VIDIOC_G_FMT, &mut arg)?;

        Ok(Format {
            width: arg.pix.width,
            height: arg.pix.height,
            fourcc: FourCC::from_code(arg.pix.pixelformat),
            stride: arg.pix.bytesperline,
            size: arg.pix.sizeimage,
        })
    }

    fn set_format(&mut self, format: &Format) -> io::Result<Format> {
        // Start from the driver's current settings so fields the caller
        // does not control (field order, colorspace) are preserved.
        let mut arg: FormatArg = zeroed();
        arg.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        self.xioctl(VIDIOC_G_FMT, &mut arg)?;

        arg.pix.width = format.width;
        arg.pix.height = format.height;
        arg.pix.pixelformat = format.fourcc.code();
        self.xioctl(VIDIOC_S_FMT, &mut arg)?;

        Ok(Format {
            width: arg.pix.width,
            height: arg.pix.height,
            fourcc: FourCC::from_code(arg.pix.pixelformat),
            stride: arg.pix.bytesperline,
            size: arg.pix.sizeimage,
        })
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let mut arg: RequestBuffers = zeroed();
        arg.count = count;
        arg.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        arg.memory = V4L2_MEMORY_MMAP;
        self.xioctl(VIDIOC_REQBUFS, &mut arg)?;
        Ok(arg.count)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<usize> {
        if index as usize != self.buffers.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "buffers must be mapped in index order",
            ));
        }

        let mut arg: BufferArg = zeroed();
        arg.index = index;
        arg.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        arg.memory = V4L2_MEMORY_MMAP;
        self.xioctl(VIDIOC_QUERYBUF, &mut arg)?;

        let len = arg.length as usize;
        // SAFETY: reading the offset member matches the MMAP memory mode
        // requested above.
        let offset = unsafe { arg.m.offset };

        // SAFETY: length and offset come from QUERYBUF for this fd; the
        // mapping is shared with the driver as the protocol requires.
        #[allow(clippy::cast_possible_wrap)]
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd.as_raw_fd(),
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        self.buffers.push(MappedRegion { ptr, len });
        Ok(len)
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        let mut arg: BufferArg = zeroed();
        arg.index = index;
        arg.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        arg.memory = V4L2_MEMORY_MMAP;
        self.xioctl(VIDIOC_QBUF, &mut arg)
    }

    fn dequeue_buffer(&mut self) -> io::Result<FrameInfo> {
        let mut arg: BufferArg = zeroed();
        arg.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        arg.memory = V4L2_MEMORY_MMAP;
        self.xioctl(VIDIOC_DQBUF, &mut arg)?;

        // Driver timestamps are non-negative in practice.
        #[allow(clippy::cast_sign_loss)]
        let secs = arg.timestamp.tv_sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nanos = (arg.timestamp.tv_usec.max(0) as u32).saturating_mul(1000);

        Ok(FrameInfo {
            index: arg.index,
            bytes_used: arg.bytesused,
            sequence: arg.sequence,
            timestamp: Duration::new(secs, nanos),
        })
    }

    fn buffer(&self, index: u32) -> io::Result<&[u8]> {
        self.buffers
            .get(index as usize)
            .map(MappedRegion::as_slice)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "buffer is not mapped"))
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let mut kind = V4L2_BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        self.xioctl(VIDIOC_STREAMON, &mut kind)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let mut kind = V4L2_BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        self.xioctl(VIDIOC_STREAMOFF, &mut kind)
    }

    fn release_buffers(&mut self) -> io::Result<()> {
        // munmap happens in each region's Drop
        self.buffers.clear();
        Ok(())
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let fd = self.fd.as_raw_fd();
        let mut read_set: libc::fd_set = zeroed();
        // SAFETY: read_set is a valid fd_set and fd is an open descriptor
        // below FD_SETSIZE.
        unsafe {
            libc::FD_ZERO(&mut read_set);
            libc::FD_SET(fd, &mut read_set);
        }

        #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
        let mut tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };

        // SAFETY: all pointers are valid for the duration of the call.
        let rc = unsafe {
            libc::select(
                fd + 1,
                &mut read_set,
                ptr::null_mut(),
                ptr::null_mut(),
                &mut tv,
            )
        };
        match rc {
            -1 => {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    // spurious wake; the caller's deadline loop re-arms
                    // with the remaining budget
                    return Ok(false);
                }
                Err(err)
            }
            0 => Ok(false),
            _ => Ok(true),
        }
    }

    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()> {
        let mut arg = ControlArg { id, value };
        self.xioctl(VIDIOC_S_CTRL, &mut arg)
    }
}
