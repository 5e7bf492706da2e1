//! Format negotiation: picking a resolution and applying it to the device.

use crate::catalog::FormatCatalog;
use crate::error::{CaptureError, Result};
use crate::traits::{DeviceIo, Format, FourCC};

/// How to pick a resolution among those the catalog lists for a format.
///
/// The original behavior took whichever resolution the driver happened to
/// report first; whether that was intent or accident is unknowable, so the
/// choice is a policy rather than a constant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolutionPolicy {
    /// The first resolution in device enumeration order.
    #[default]
    FirstReported,
    /// The resolution with the largest pixel area.
    Largest,
}

/// The single format active on the device, as confirmed by the driver.
/// Set once before buffer allocation; immutable for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedFormat {
    /// Pixel format.
    pub fourcc: FourCC,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Bytes per line, as computed by the driver.
    pub stride: u32,
    /// Frame size in bytes, as computed by the driver.
    pub size: u32,
}

/// Select a resolution for `fourcc` from the catalog and apply it.
///
/// Fails with [`CaptureError::UnsupportedFormat`] when the format is absent
/// from the catalog or has no resolutions; nothing is applied in that case.
/// After applying, the active format is read back from the driver; a
/// read-back that differs from the request is logged and accepted, since
/// driver rounding is common and non-fatal.
pub fn negotiate<D: DeviceIo>(
    io: &mut D,
    catalog: &FormatCatalog,
    fourcc: FourCC,
    policy: ResolutionPolicy,
) -> Result<NegotiatedFormat> {
    let entry = catalog
        .get(fourcc)
        .ok_or(CaptureError::UnsupportedFormat(fourcc))?;

    let chosen = match policy {
        ResolutionPolicy::FirstReported => entry.resolutions.first(),
        ResolutionPolicy::Largest => entry
            .resolutions
            .iter()
            .max_by_key(|r| u64::from(r.width) * u64::from(r.height)),
    }
    .ok_or(CaptureError::UnsupportedFormat(fourcc))?;

    let request = Format::new(chosen.width, chosen.height, fourcc);
    io.set_format(&request)
        .map_err(CaptureError::FormatApplyFailed)?;

    // Confirm what actually took effect.
    let applied = io.format().map_err(CaptureError::FormatApplyFailed)?;
    if applied.fourcc != fourcc || applied.width != chosen.width || applied.height != chosen.height
    {
        tracing::warn!(
            requested_width = chosen.width,
            requested_height = chosen.height,
            requested_format = %fourcc,
            applied_width = applied.width,
            applied_height = applied.height,
            applied_format = %applied.fourcc,
            "driver adjusted the applied format"
        );
    }
    tracing::info!(
        width = applied.width,
        height = applied.height,
        format = %applied.fourcc,
        "capture format negotiated"
    );

    Ok(NegotiatedFormat {
        fourcc: applied.fourcc,
        width: applied.width,
        height: applied.height,
        stride: applied.stride,
        size: applied.size,
    })
}
