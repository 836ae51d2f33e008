//! Timing command for showing each device's clock as recorded.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use oe_core::{Timing, resolve_local_timing};

pub fn run<W: Write>(writer: &mut W, recording: &Path, device: Option<&str>) -> Result<()> {
    let timings = resolve_local_timing(recording, device)
        .with_context(|| format!("failed to read {}", recording.display()))?;

    let mut found = false;
    for timing in timings {
        let timing = timing.context("failed to resolve device timing")?;
        found = true;
        let duration = match timing.stop_time() {
            Ok(stop) => format!("{:.3} s", stop - timing.start_time()),
            Err(e) => {
                tracing::debug!(
                    device = %timing.device.name,
                    error = %e,
                    "sample count unavailable"
                );
                "unknown".to_string()
            }
        };
        writeln!(writer, "{}", timing.device.name)?;
        writeln!(writer, "  Sampling rate: {} Hz", timing.sampling_rate())?;
        writeln!(writer, "  First sample: {}", timing.start_sample)?;
        if timing.logged_start_sample != timing.start_sample {
            writeln!(writer, "  Logged first sample: {}", timing.logged_start_sample)?;
        }
        writeln!(writer, "  TTL events: {}", timing.device.ttl_sample_numbers.len())?;
        writeln!(writer, "  Duration: {duration}")?;
        if let Some(compressed) = &timing.device.compressed {
            writeln!(writer, "  Compressed: {}", compressed.display())?;
        }
    }
    if !found {
        writeln!(writer, "No devices found.")?;
    }
    Ok(())
}
