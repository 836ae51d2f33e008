//! End-to-end checks that a recording's devices can be found and, optionally,
//! aligned to the reference clock.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::device::resolve_local_timing;
use crate::oebin::{Manifest, MergeError, find_manifest_in};
use crate::reconcile::{BarcodeAligner, EdgeTimes, SyncError, reconcile};
use crate::timing::{LocalTiming, ReconciledTiming, TimingError};
use crate::topology::{TopologyError, find_manifests, select_authoritative_manifest};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("could not find {device} data in {recording}")]
    DeviceNotFound { device: String, recording: PathBuf },
    #[error("could not validate {device} in {recording} against the reference clock")]
    SyncValidationFailed {
        device: String,
        recording: PathBuf,
        #[source]
        source: SyncError,
    },
    #[error(transparent)]
    Timing(#[from] TimingError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// Where a device, or a whole recording, ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Discovered,
    DeviceFound,
    SyncVerified,
    NoSyncRequested,
    Validated,
    Invalid,
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discovered => "discovered",
            Self::DeviceFound => "device found",
            Self::SyncVerified => "sync verified",
            Self::NoSyncRequested => "no sync requested",
            Self::Validated => "validated",
            Self::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub enum DeviceOutcome {
    NoSyncRequested,
    SyncVerified { sampling_rate: f64, start_time: f64 },
    Invalid(ValidationError),
}

#[derive(Debug)]
pub struct DeviceCheck {
    pub device: String,
    pub outcome: DeviceOutcome,
}

impl DeviceCheck {
    pub const fn state(&self) -> RecordingState {
        match self.outcome {
            DeviceOutcome::NoSyncRequested => RecordingState::NoSyncRequested,
            DeviceOutcome::SyncVerified { .. } => RecordingState::SyncVerified,
            DeviceOutcome::Invalid(_) => RecordingState::Invalid,
        }
    }
}

#[derive(Debug)]
pub struct RecordingReport {
    pub recording: PathBuf,
    pub devices: Vec<DeviceCheck>,
    /// Set when the recording could not be inspected at all.
    pub error: Option<ValidationError>,
}

impl RecordingReport {
    fn failed(recording: &Path, error: ValidationError) -> Self {
        Self {
            recording: recording.to_path_buf(),
            devices: Vec::new(),
            error: Some(error),
        }
    }

    pub fn state(&self) -> RecordingState {
        let device_failed = self
            .devices
            .iter()
            .any(|d| d.state() == RecordingState::Invalid);
        if self.error.is_some() || device_failed {
            RecordingState::Invalid
        } else {
            RecordingState::Validated
        }
    }

    pub fn is_valid(&self) -> bool {
        self.state() == RecordingState::Validated
    }

    /// The first failure, if any.
    pub fn into_error(self) -> Option<ValidationError> {
        self.error.or_else(|| {
            self.devices.into_iter().find_map(|d| match d.outcome {
                DeviceOutcome::Invalid(e) => Some(e),
                _ => None,
            })
        })
    }
}

/// A reference clock to align devices against.
#[derive(Clone, Copy)]
pub struct SyncReference<'a> {
    pub aligner: &'a (dyn BarcodeAligner + Sync),
    pub edges: &'a EdgeTimes,
}

impl fmt::Debug for SyncReference<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncReference")
            .field("edges", &self.edges)
            .finish_non_exhaustive()
    }
}

fn invalid(device: String, e: ValidationError) -> DeviceCheck {
    DeviceCheck {
        device,
        outcome: DeviceOutcome::Invalid(e),
    }
}

/// Finds a device's local timing, or the check that records why it is missing.
fn find_device(recording: &Path, name: &str) -> Result<LocalTiming, DeviceCheck> {
    tracing::trace!(device = %name, state = %RecordingState::Discovered, "checking device");
    match resolve_local_timing(recording, Some(name))
        .and_then(|mut timings| timings.next().transpose())
    {
        Ok(Some(timing)) => {
            tracing::trace!(
                device = %name,
                state = %RecordingState::DeviceFound,
                "resolved device"
            );
            Ok(timing)
        }
        Ok(None) => {
            let e = ValidationError::DeviceNotFound {
                device: name.to_string(),
                recording: recording.to_path_buf(),
            };
            Err(invalid(name.to_string(), e))
        }
        Err(e) => Err(invalid(name.to_string(), e.into())),
    }
}

fn sync_check(
    recording: &Path,
    name: String,
    result: Result<ReconciledTiming, SyncError>,
) -> DeviceCheck {
    match result {
        Ok(t) => {
            tracing::debug!(device = %t.device.name, "validated with sync");
            DeviceCheck {
                device: name,
                outcome: DeviceOutcome::SyncVerified {
                    sampling_rate: t.sampling_rate,
                    start_time: t.start_time,
                },
            }
        }
        Err(source) => {
            let e = ValidationError::SyncValidationFailed {
                device: name.clone(),
                recording: recording.to_path_buf(),
                source,
            };
            invalid(name, e)
        }
    }
}

/// Aligns the found devices, decoding the reference barcodes once.
fn sync_checks(
    recording: &Path,
    reference: SyncReference<'_>,
    found: Vec<(String, LocalTiming)>,
) -> Vec<DeviceCheck> {
    let (names, timings): (Vec<String>, Vec<LocalTiming>) = found.into_iter().unzip();
    match reconcile(reference.aligner, reference.edges, timings) {
        Ok(reconciled) => names
            .into_iter()
            .zip(reconciled)
            .map(|(name, result)| sync_check(recording, name, result))
            .collect(),
        Err(e) => {
            tracing::warn!(recording = ?recording, error = %e, "reference barcodes unusable");
            // every found device fails with the same reference error
            let message = match e {
                SyncError::Reference(inner) => inner.to_string(),
                other => other.to_string(),
            };
            names
                .into_iter()
                .map(|name| {
                    let source = SyncError::Reference(message.clone().into());
                    sync_check(recording, name, Err(source))
                })
                .collect()
        }
    }
}

/// Checks every continuous stream listed in a recording folder's manifest.
///
/// Devices are all checked even after one fails; the report says which.
/// An error is returned only when the manifest itself cannot be read.
pub fn validate_recording(
    recording_dir: &Path,
    reference: Option<SyncReference<'_>>,
) -> Result<RecordingReport, ValidationError> {
    tracing::debug!(recording = ?recording_dir, "validating ephys data");
    let manifest = Manifest::load(&find_manifest_in(recording_dir)?)?;

    let mut slots: Vec<Option<DeviceCheck>> = Vec::new();
    let mut found = Vec::new();
    for stream in manifest.continuous_streams()? {
        let name = stream.device_name().to_string();
        match find_device(recording_dir, &name) {
            Ok(timing) => {
                slots.push(None);
                found.push((name, timing));
            }
            Err(check) => slots.push(Some(check)),
        }
    }

    let mut checks = match reference {
        Some(reference) => sync_checks(recording_dir, reference, found),
        None => found
            .into_iter()
            .map(|(name, timing)| {
                tracing::debug!(device = %timing.device.name, "validated without sync");
                DeviceCheck {
                    device: name,
                    outcome: DeviceOutcome::NoSyncRequested,
                }
            })
            .collect(),
    }
    .into_iter();
    let devices = slots
        .into_iter()
        .filter_map(|slot| slot.or_else(|| checks.next()))
        .collect();

    Ok(RecordingReport {
        recording: recording_dir.to_path_buf(),
        devices,
        error: None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop at the first recording that fails.
    #[default]
    Abort,
    /// Record the failure and carry on with the remaining recordings.
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidateOptions {
    /// Only check the largest recording below each root.
    pub ignore_small_folders: bool,
    pub policy: FailurePolicy,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            ignore_small_folders: true,
            policy: FailurePolicy::Abort,
        }
    }
}

fn manifests_for(root: &Path, ignore_small_folders: bool) -> Result<Vec<PathBuf>, TopologyError> {
    if ignore_small_folders {
        Ok(vec![select_authoritative_manifest(root)?])
    } else {
        find_manifests(root)
    }
}

/// Validates the recordings below each root.
pub fn validate_roots<P: AsRef<Path>>(
    roots: &[P],
    reference: Option<SyncReference<'_>>,
    options: ValidateOptions,
) -> Result<Vec<RecordingReport>, ValidationError> {
    let abort = options.policy == FailurePolicy::Abort;
    let mut reports = Vec::new();
    for root in roots {
        let root = root.as_ref();
        let manifests = match manifests_for(root, options.ignore_small_folders) {
            Ok(manifests) => manifests,
            Err(e) if abort => return Err(e.into()),
            Err(e) => {
                tracing::warn!(root = ?root, error = %e, "could not find recordings");
                reports.push(RecordingReport::failed(root, e.into()));
                continue;
            }
        };

        let mut root_valid = true;
        for manifest in manifests {
            let recording = manifest.parent().unwrap_or(root);
            let report = validate_recording(recording, reference)
                .unwrap_or_else(|e| RecordingReport::failed(recording, e));
            if !report.is_valid() {
                root_valid = false;
                if abort {
                    if let Some(e) = report.into_error() {
                        return Err(e);
                    }
                    continue;
                }
                tracing::warn!(recording = ?report.recording, "recording failed validation");
            }
            reports.push(report);
        }
        if root_valid {
            tracing::info!(root = ?root, "validated ephys data");
        }
    }
    Ok(reports)
}
