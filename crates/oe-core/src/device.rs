//! Discovery of acquisition devices in a recording folder.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, OnceLock};

use regex::Regex;
use serde::Deserialize;

use crate::npy::{self, ByteSource, LocalFile};
use crate::oebin::{Manifest, find_manifest_in};
use crate::sync_messages::{SyncMessage, read_sync_messages};
use crate::timing::{LocalTiming, TimingError};

/// Folder holding raw data copied off the acquisition machine.
pub const CLIPPED_DIR: &str = "ecephys_clipped";
/// Sibling of [`CLIPPED_DIR`] holding compressed zarr copies.
pub const COMPRESSED_DIR: &str = "ecephys_compressed";

const NIDAQ_MARKER: &str = "NI-DAQmx-";

/// `continuous.dat` holds interleaved little-endian `i16` samples.
const BYTES_PER_SAMPLE: u64 = 2;

static EXPERIMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^experiment\d+$").expect("valid regex"));
static RECORD_NODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Record Node \d+$").expect("valid regex"));

/// One acquisition device (probe or NI-DAQ) in a recording.
#[derive(Debug, Clone)]
pub struct Device {
    pub name: String,
    /// The device's folder within `continuous/`.
    pub continuous: PathBuf,
    /// The device's folder within `events/`.
    pub events: PathBuf,
    /// The device's `TTL*` folder within `events/`.
    pub ttl: PathBuf,
    /// The device's zarr store within `ecephys_compressed/`, if one exists.
    pub compressed: Option<PathBuf>,
    /// TTL sample numbers after subtracting the device's first sample.
    pub ttl_sample_numbers: Vec<i64>,
    /// Contents of the TTL folder's `states.npy`: positive for rising edges.
    pub ttl_states: Vec<i64>,
    num_samples: OnceLock<u64>,
}

impl Device {
    pub fn new(
        name: impl Into<String>,
        continuous: PathBuf,
        events: PathBuf,
        ttl: PathBuf,
        compressed: Option<PathBuf>,
        ttl_sample_numbers: Vec<i64>,
        ttl_states: Vec<i64>,
    ) -> Result<Self, TimingError> {
        let name = name.into();
        if ttl_sample_numbers.len() != ttl_states.len() {
            return Err(TimingError::PulseLengthMismatch {
                device: name,
                samples: ttl_sample_numbers.len(),
                states: ttl_states.len(),
            });
        }
        if let Some(index) = ttl_sample_numbers.windows(2).position(|w| w[1] < w[0]) {
            return Err(TimingError::PulsesNotMonotonic {
                device: name,
                index: index + 1,
            });
        }
        Ok(Self {
            name,
            continuous,
            events,
            ttl,
            compressed,
            ttl_sample_numbers,
            ttl_states,
            num_samples: OnceLock::new(),
        })
    }

    /// The `recording*` folder this device was found in.
    pub fn recording_dir(&self) -> &Path {
        self.continuous
            .parent()
            .and_then(Path::parent)
            .unwrap_or(&self.continuous)
    }

    /// Number of samples per channel. Computed on first use, then cached.
    pub fn num_samples(&self) -> Result<u64, TimingError> {
        if let Some(n) = self.num_samples.get() {
            return Ok(*n);
        }
        let n = self.count_samples()?;
        Ok(*self.num_samples.get_or_init(|| n))
    }

    fn count_samples(&self) -> Result<u64, TimingError> {
        if let Some(compressed) = &self.compressed {
            return zarr_length(compressed);
        }
        let channels = self.num_channels()?;
        let bytes = std::fs::metadata(self.continuous.join("continuous.dat"))?.len();
        Ok(bytes / (channels * BYTES_PER_SAMPLE))
    }

    fn num_channels(&self) -> Result<u64, TimingError> {
        let recording = self.recording_dir();
        let manifest = Manifest::load(&find_manifest_in(recording)?)?;
        let stream = manifest.find_continuous(&self.name)?.ok_or_else(|| {
            TimingError::DeviceNotInManifest {
                device: self.name.clone(),
                recording: recording.to_path_buf(),
            }
        })?;
        if stream.num_channels == 0 {
            return Err(TimingError::NoChannels {
                device: self.name.clone(),
                recording: recording.to_path_buf(),
            });
        }
        Ok(u64::from(stream.num_channels))
    }

    /// TTL edge times in seconds on the device clock: `(rising, falling)`.
    #[expect(
        clippy::cast_precision_loss,
        reason = "sample numbers stay far below 2^52"
    )]
    pub fn edge_times(&self, sampling_rate: f64) -> (Vec<f64>, Vec<f64>) {
        let mut rising = Vec::new();
        let mut falling = Vec::new();
        for (&sample, &state) in self.ttl_sample_numbers.iter().zip(&self.ttl_states) {
            let t = sample as f64 / sampling_rate;
            if state > 0 {
                rising.push(t);
            } else if state < 0 {
                falling.push(t);
            }
        }
        (rising, falling)
    }
}

#[derive(Debug, Deserialize)]
struct Zarray {
    shape: Vec<u64>,
}

/// Length of the first axis of the zarr array holding the device's traces.
fn zarr_length(store: &Path) -> Result<u64, TimingError> {
    let path = store.join("traces_seg0").join(".zarray");
    let text = std::fs::read_to_string(&path)?;
    let meta: Zarray = serde_json::from_str(&text).map_err(|e| TimingError::MalformedZarray {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    meta.shape
        .first()
        .copied()
        .ok_or_else(|| TimingError::MalformedZarray {
            path,
            reason: "empty shape".to_string(),
        })
}

/// A block of interleaved samples, `frames.len() * num_channels` long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuousBlock {
    pub num_channels: usize,
    pub frames: Range<u64>,
    pub samples: Vec<i16>,
}

impl ContinuousBlock {
    /// Samples of a single channel.
    pub fn channel(&self, index: usize) -> impl Iterator<Item = i16> + '_ {
        self.samples
            .iter()
            .copied()
            .skip(index)
            .step_by(self.num_channels.max(1))
    }
}

/// Reads frames `frames` of the device's uncompressed `continuous.dat` in one range read.
pub fn read_continuous(
    device: &Device,
    frames: Range<u64>,
) -> Result<ContinuousBlock, TimingError> {
    let channels = device.num_channels()?;
    let len = device.num_samples()?;
    if frames.start > frames.end || frames.end > len {
        return Err(TimingError::FramesOutOfBounds {
            device: device.name.clone(),
            start: frames.start,
            end: frames.end,
            len,
        });
    }
    let frame_bytes = channels * BYTES_PER_SAMPLE;
    let source = LocalFile::new(device.continuous.join("continuous.dat"));
    let bytes = source.read_range(frames.start * frame_bytes, frames.end * frame_bytes)?;
    let samples = bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();
    Ok(ContinuousBlock {
        num_channels: usize::try_from(channels).unwrap_or(usize::MAX),
        frames,
        samples,
    })
}

fn nearest_ancestor_name(path: &Path, re: &Regex) -> Option<String> {
    path.ancestors()
        .filter_map(|p| p.file_name()?.to_str())
        .find(|name| re.is_match(name))
        .map(String::from)
}

/// Finds the compressed copy of a device's continuous data.
///
/// Compressed stores are named `<experiment>_<Record Node>#<device>.zarr` and live in
/// `ecephys_compressed/` next to `ecephys_clipped/`. The `#` makes the name unsafe to
/// build as a URL path, so the directory is listed and matched instead.
pub fn locate_compressed(continuous: &Path) -> Result<Option<PathBuf>, TimingError> {
    let Some(clipped) = continuous
        .ancestors()
        .find(|p| p.file_name().is_some_and(|n| n == CLIPPED_DIR))
    else {
        tracing::debug!(path = ?continuous, "path is not below {CLIPPED_DIR}");
        return Ok(None);
    };
    let (Some(experiment), Some(node), Some(device)) = (
        nearest_ancestor_name(continuous, &EXPERIMENT_RE),
        nearest_ancestor_name(continuous, &RECORD_NODE_RE),
        continuous.file_name().and_then(|n| n.to_str()),
    ) else {
        tracing::debug!(path = ?continuous, "could not parse experiment and record node");
        return Ok(None);
    };

    let expected = format!("{experiment}_{node}#{device}.zarr");
    let compressed_root = clipped.with_file_name(COMPRESSED_DIR);
    if !compressed_root.is_dir() {
        return Ok(None);
    }
    for entry in std::fs::read_dir(&compressed_root)? {
        let entry = entry?;
        if entry.file_name() == expected.as_str() {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

fn read_integers(path: &Path) -> Result<Vec<i64>, TimingError> {
    npy::read_all(&LocalFile::new(path))?
        .into_i64()
        .ok_or_else(|| TimingError::NonIntegerArray(path.to_path_buf()))
}

fn find_ttl_dir(events: &Path) -> Result<Option<PathBuf>, TimingError> {
    if !events.is_dir() {
        return Ok(None);
    }
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(events)?
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("TTL"))
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    candidates.sort();
    Ok(candidates.into_iter().next())
}

fn resolve_device(
    recording_dir: &Path,
    message: SyncMessage,
) -> Result<Option<LocalTiming>, TimingError> {
    let continuous = recording_dir.join("continuous").join(&message.label);
    if !continuous.exists() {
        tracing::trace!(device = %message.label, "no continuous folder, skipping");
        return Ok(None);
    }
    let events = recording_dir.join("events").join(&message.label);
    let Some(ttl) = find_ttl_dir(&events)? else {
        // drives get reassigned between sessions, so listed devices may be missing
        tracing::info!(
            device = %message.label,
            events = ?events,
            "no TTL folder found, skipping device"
        );
        return Ok(None);
    };

    let sample_numbers = continuous.join("sample_numbers.npy");
    let first_sample = npy::read_element(&LocalFile::new(&sample_numbers), 0)?
        .into_i64()
        .and_then(|v| v.first().copied())
        .ok_or(TimingError::NonIntegerArray(sample_numbers))?;
    if first_sample != message.start {
        tracing::debug!(
            device = %message.label,
            logged = message.start,
            on_disk = first_sample,
            "first sample differs from sync_messages.txt, using sample_numbers.npy"
        );
    }

    let ttl_sample_numbers = read_integers(&ttl.join("sample_numbers.npy"))?
        .into_iter()
        .map(|s| s - first_sample)
        .collect();
    let ttl_states = read_integers(&ttl.join("states.npy"))?;

    let compressed = match locate_compressed(&continuous) {
        Ok(Some(path)) => Some(path),
        Ok(None) => {
            tracing::info!(path = ?continuous, "no compressed data found");
            None
        }
        Err(e) => {
            tracing::info!(path = ?continuous, error = %e, "could not search for compressed data");
            None
        }
    };

    let device = Device::new(
        message.label,
        continuous,
        events,
        ttl,
        compressed,
        ttl_sample_numbers,
        ttl_states,
    )?;
    Ok(Some(LocalTiming {
        device,
        start_sample: first_sample,
        logged_start_sample: message.start,
        sampling_rate: message.rate,
    }))
}

/// Lazy iterator returned by [`resolve_local_timing`].
#[derive(Debug)]
pub struct LocalTimings {
    recording_dir: PathBuf,
    messages: std::vec::IntoIter<SyncMessage>,
}

impl Iterator for LocalTimings {
    type Item = Result<LocalTiming, TimingError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let message = self.messages.next()?;
            match resolve_device(&self.recording_dir, message) {
                Ok(Some(timing)) => return Some(Ok(timing)),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Devices in a `recording*` folder with timing on their own clock.
///
/// Devices are taken from `sync_messages.txt`; `name_filter` keeps only labels
/// containing it (case-insensitive). Devices without recorded data are skipped.
pub fn resolve_local_timing(
    recording_dir: &Path,
    name_filter: Option<&str>,
) -> Result<LocalTimings, TimingError> {
    let mut messages = read_sync_messages(&recording_dir.join("sync_messages.txt"))?;
    if let Some(filter) = name_filter {
        let filter = filter.to_lowercase();
        messages.retain(|m| m.label.to_lowercase().contains(&filter));
    }
    Ok(LocalTimings {
        recording_dir: recording_dir.to_path_buf(),
        messages: messages.into_iter(),
    })
}

/// The one NI-DAQ device in a recording.
pub fn nidaq_timing(recording_dir: &Path) -> Result<LocalTiming, TimingError> {
    let mut found = resolve_local_timing(recording_dir, Some(NIDAQ_MARKER))?
        .collect::<Result<Vec<_>, _>>()?;
    match found.len() {
        0 => Err(TimingError::NoNidaqDevice(recording_dir.to_path_buf())),
        1 => Ok(found.remove(0)),
        _ => Err(TimingError::MultipleNidaqDevices {
            recording: recording_dir.to_path_buf(),
            devices: found.into_iter().map(|t| t.device.continuous).collect(),
        }),
    }
}
