//! Capture binary: open a device, apply controls, and stream frames.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use vision_capture::{is_live_device, CaptureConfig, CaptureSession};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(err) = run() {
        tracing::error!(error = %err, "capture failed");
        std::process::exit(1);
    }
}

fn run() -> vision_capture::Result<()> {
    let path = PathBuf::from(
        std::env::args()
            .nth(1)
            .unwrap_or_else(|| "/dev/video0".to_owned()),
    );
    let config = CaptureConfig::default();

    // A live camera that fails to open may just be slow to enumerate or
    // briefly unplugged; keep trying. A file-backed source that fails to
    // open never will succeed, so bail immediately.
    let mut session = loop {
        match CaptureSession::open(&path, &config) {
            Ok(session) => break session,
            Err(err) if is_live_device(&path) => {
                tracing::warn!(error = %err, "opening capture failed, retrying in 3s");
                thread::sleep(Duration::from_secs(3));
            }
            Err(err) => return Err(err),
        }
    };

    for entry in session.catalog().entries() {
        tracing::info!(
            format = %entry.fourcc,
            description = %entry.description,
            resolutions = entry.resolutions.len(),
            "advertised format"
        );
    }

    let failures = session.apply_controls(&[
        ("exposure_auto", 1),
        ("exposure_absolute", 100),
        ("brightness", 128),
    ]);
    if !failures.is_empty() {
        tracing::warn!(count = failures.len(), "some controls were not applied");
    }

    let format = session.format().clone();
    tracing::info!(
        width = format.width,
        height = format.height,
        format = %format.fourcc,
        "capturing"
    );

    let mut scratch = Vec::new();
    loop {
        let info = session.read_into(Duration::from_secs(1), &mut scratch)?;
        tracing::info!(
            sequence = info.sequence,
            bytes = scratch.len(),
            timestamp = ?info.timestamp,
            "frame"
        );
    }
}
