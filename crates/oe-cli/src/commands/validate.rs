//! Validate command for checking recordings across one or more roots.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use rayon::prelude::*;

use oe_core::validate::DeviceOutcome;
use oe_core::{RecordingReport, ValidateOptions, ValidationError, validate_roots};

fn write_report<W: Write>(writer: &mut W, report: &RecordingReport) -> Result<()> {
    match &report.error {
        Some(e) => writeln!(writer, "{}: {} ({e})", report.recording.display(), report.state())?,
        None => writeln!(writer, "{}: {}", report.recording.display(), report.state())?,
    }
    for check in &report.devices {
        match &check.outcome {
            DeviceOutcome::Invalid(e) => {
                writeln!(writer, "  {}: {} ({e})", check.device, check.state())?;
            }
            DeviceOutcome::SyncVerified {
                sampling_rate,
                start_time,
            } => writeln!(
                writer,
                "  {}: {} ({sampling_rate} Hz, starts at {start_time:.6} s)",
                check.device,
                check.state()
            )?,
            DeviceOutcome::NoSyncRequested => {
                writeln!(writer, "  {}: {}", check.device, check.state())?;
            }
        }
    }
    Ok(())
}

/// Validates each root in parallel, then prints reports in the order given.
pub fn run<W: Write>(writer: &mut W, roots: &[PathBuf], options: ValidateOptions) -> Result<()> {
    let results: Vec<Result<Vec<RecordingReport>, ValidationError>> = roots
        .par_iter()
        .map(|root| validate_roots(std::slice::from_ref(root), None, options))
        .collect();

    let mut failed = 0usize;
    for (root, result) in roots.iter().zip(results) {
        let reports = result.with_context(|| format!("failed to validate {}", root.display()))?;
        for report in &reports {
            if !report.is_valid() {
                failed += 1;
            }
            write_report(writer, report)?;
        }
    }

    if failed > 0 {
        bail!("{failed} recording(s) failed validation");
    }
    Ok(())
}
