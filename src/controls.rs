//! Numeric device controls and the name table.
//!
//! Controls are applied one at a time and validated entirely by the
//! driver. The core enforces no ordering between controls — the valid
//! order is device-specific and not discoverable — but the application
//! contract is explicit: in an ordered list, an "auto" toggle must come
//! before its manual counterpart (`exposure_auto` before
//! `exposure_absolute`, `white_balance_temperature_auto` before
//! `white_balance_temperature`), or the driver will reject the manual
//! value.

use crate::error::{CaptureError, Result};
use crate::traits::DeviceIo;

/// Brightness (user control class).
pub const CID_BRIGHTNESS: u32 = 0x0098_0900;
/// Contrast.
pub const CID_CONTRAST: u32 = 0x0098_0901;
/// Saturation.
pub const CID_SATURATION: u32 = 0x0098_0902;
/// Hue.
pub const CID_HUE: u32 = 0x0098_0903;
/// Automatic white balance toggle.
pub const CID_WHITE_BALANCE_TEMPERATURE_AUTO: u32 = 0x0098_090c;
/// Gamma.
pub const CID_GAMMA: u32 = 0x0098_0910;
/// Manual white balance temperature.
pub const CID_WHITE_BALANCE_TEMPERATURE: u32 = 0x0098_091a;
/// Sharpness.
pub const CID_SHARPNESS: u32 = 0x0098_091b;
/// Backlight compensation.
pub const CID_BACKLIGHT_COMPENSATION: u32 = 0x0098_091c;
/// Exposure mode (camera control class).
pub const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
/// Manual exposure time, in 100 µs units.
pub const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;

/// Map a human-readable control name to its numeric id.
///
/// Returns `None` for names the table does not know — the "no such
/// control" sentinel. Callers should surface that as a non-fatal,
/// per-control failure and keep configuring the rest.
#[must_use]
pub fn control_id(name: &str) -> Option<u32> {
    match name.to_ascii_lowercase().as_str() {
        "brightness" => Some(CID_BRIGHTNESS),
        "contrast" => Some(CID_CONTRAST),
        "saturation" => Some(CID_SATURATION),
        "hue" => Some(CID_HUE),
        "white_balance_temperature_auto" => Some(CID_WHITE_BALANCE_TEMPERATURE_AUTO),
        "gamma" => Some(CID_GAMMA),
        "white_balance_temperature" => Some(CID_WHITE_BALANCE_TEMPERATURE),
        "sharpness" => Some(CID_SHARPNESS),
        "backlight_compensation" => Some(CID_BACKLIGHT_COMPENSATION),
        "exposure_auto" => Some(CID_EXPOSURE_AUTO),
        "exposure_absolute" => Some(CID_EXPOSURE_ABSOLUTE),
        _ => None,
    }
}

/// Apply one numeric control.
///
/// Fails with [`CaptureError::ControlRejected`] when the driver reports
/// the id unknown or the value out of range.
pub fn set_control<D: DeviceIo>(io: &mut D, id: u32, value: i32) -> Result<()> {
    io.set_control(id, value)
        .map_err(|source| CaptureError::ControlRejected { id, source })
}

/// One entry of an ordered control list that could not be applied.
#[derive(Debug)]
pub struct ControlFailure {
    /// The name from the caller's list.
    pub name: String,
    /// Why it was not applied.
    pub error: CaptureError,
}

/// Apply an ordered list of named controls.
///
/// Entries are applied in list order and independently: a rejected or
/// unknown control is logged and collected without aborting the rest.
/// Returns the failures; an empty vector means everything applied.
pub fn apply_named<D: DeviceIo>(io: &mut D, settings: &[(&str, i32)]) -> Vec<ControlFailure> {
    let mut failures = Vec::new();

    for &(name, value) in settings {
        let result = match control_id(name) {
            Some(id) => set_control(io, id, value),
            None => Err(CaptureError::UnknownControl(name.to_owned())),
        };
        match result {
            Ok(()) => tracing::info!(name, value, "control applied"),
            Err(error) => {
                tracing::warn!(name, value, error = %error, "control not applied, skipping");
                failures.push(ControlFailure {
                    name: name.to_owned(),
                    error,
                });
            }
        }
    }

    failures
}
