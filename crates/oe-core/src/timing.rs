//! Device timing in the device's own clock frame and in the reference clock frame.

use std::path::PathBuf;

use thiserror::Error;

use crate::device::Device;
use crate::npy::NpyError;
use crate::oebin::MergeError;

#[derive(Debug, Error)]
pub enum TimingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Npy(#[from] NpyError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error("malformed line in sync_messages.txt: {line:?}")]
    MalformedSyncMessage { line: String },
    #[error("expected integer samples in {0}")]
    NonIntegerArray(PathBuf),
    #[error("{device}: {samples} TTL sample numbers but {states} states")]
    PulseLengthMismatch {
        device: String,
        samples: usize,
        states: usize,
    },
    #[error("{device}: TTL sample numbers decrease at index {index}")]
    PulsesNotMonotonic { device: String, index: usize },
    #[error("{device} not listed in manifest for {recording}")]
    DeviceNotInManifest { device: String, recording: PathBuf },
    #[error("{device} has no channels in manifest for {recording}")]
    NoChannels { device: String, recording: PathBuf },
    #[error("malformed zarr metadata at {path}: {reason}")]
    MalformedZarray { path: PathBuf, reason: String },
    #[error("frames {start}..{end} out of bounds for {device} with {len} samples")]
    FramesOutOfBounds {
        device: String,
        start: u64,
        end: u64,
        len: u64,
    },
    #[error("no continuous/NI-DAQmx-*/ folder found in {0}")]
    NoNidaqDevice(PathBuf),
    #[error("expected a single NI-DAQmx folder in {recording}, found {devices:?}")]
    MultipleNidaqDevices {
        recording: PathBuf,
        devices: Vec<PathBuf>,
    },
}

/// Common read-only view of a device's timing, whatever clock it is expressed on.
pub trait Timing {
    fn device(&self) -> &Device;

    /// Samples per second.
    fn sampling_rate(&self) -> f64;

    /// Seconds, relative to the start of the clock this timing is expressed on.
    fn start_time(&self) -> f64;

    /// Seconds, relative to the start of the clock this timing is expressed on.
    #[expect(
        clippy::cast_precision_loss,
        reason = "sample counts stay far below 2^52"
    )]
    fn stop_time(&self) -> Result<f64, TimingError> {
        let samples = self.device().num_samples()?;
        Ok(self.start_time() + samples as f64 / self.sampling_rate())
    }
}

/// Timing on the acquisition system's own clock, with no external reference.
#[derive(Debug, Clone)]
pub struct LocalTiming {
    pub device: Device,
    /// First sample number, as written to the device's `sample_numbers.npy`.
    pub start_sample: i64,
    /// First sample number reported in `sync_messages.txt`.
    pub logged_start_sample: i64,
    /// Nominal rate reported in `sync_messages.txt`.
    pub sampling_rate: f64,
}

impl Timing for LocalTiming {
    fn device(&self) -> &Device {
        &self.device
    }

    fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    /// Without a reference clock the start is meaningless, so it is always zero.
    fn start_time(&self) -> f64 {
        0.0
    }
}

/// Timing aligned to the reference clock.
#[derive(Debug, Clone)]
pub struct ReconciledTiming {
    pub device: Device,
    /// Rate measured against the reference clock.
    pub sampling_rate: f64,
    /// Time of the device's first sample on the reference clock, in seconds.
    pub start_time: f64,
}

impl Timing for ReconciledTiming {
    fn device(&self) -> &Device {
        &self.device
    }

    fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    fn start_time(&self) -> f64 {
        self.start_time
    }
}
