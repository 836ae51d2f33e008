//! Core logic for Open Ephys recordings.
//!
//! This crate contains the fundamental types and logic for:
//! - Partial reads: decoding `.npy` headers and fetching element ranges only
//! - Topology: recognising Record Node folders and picking the real recording
//! - Manifests: loading and merging `structure.oebin` across Record Nodes
//! - Timing: per-device clocks from `sync_messages.txt` and TTL events
//! - Reconciliation: mapping device clocks onto an external reference clock
//! - Validation: checking every listed device can be found and aligned

pub mod device;
pub mod npy;
pub mod oebin;
pub mod reconcile;
pub mod settings;
pub mod sync_messages;
pub mod timing;
pub mod topology;
pub mod validate;

pub use device::{Device, LocalTimings, nidaq_timing, resolve_local_timing};
pub use oebin::{Manifest, MergeError, StreamCategory, StreamDescriptor, merge};
pub use reconcile::{BarcodeAligner, Barcodes, ClockFit, EdgeTimes, SyncError, reconcile};
pub use timing::{LocalTiming, ReconciledTiming, Timing, TimingError};
pub use topology::{KeptPath, TopologyError, enumerate_kept_paths, list_recording_roots};
pub use validate::{
    FailurePolicy, RecordingReport, RecordingState, SyncReference, ValidateOptions,
    ValidationError, validate_recording, validate_roots,
};
