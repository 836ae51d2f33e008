//! Alignment of device clocks to an external reference clock.
//!
//! Every device and the reference record the same train of barcode pulses. Matching
//! barcodes between the two gives a linear map from device samples to reference
//! seconds: an offset, plus a corrected sampling rate.
//!
//! The barcode decoding and the regression are supplied by a [`BarcodeAligner`].

use std::error::Error;

use thiserror::Error;

use crate::timing::{LocalTiming, ReconciledTiming};

pub type AlignerError = Box<dyn Error + Send + Sync + 'static>;

/// Digital edge times on one line, in seconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeTimes {
    pub rising: Vec<f64>,
    pub falling: Vec<f64>,
    /// Length of the observation window in seconds.
    pub total_seconds: f64,
}

impl EdgeTimes {
    /// Edge times of a device's TTL line at its nominal rate.
    #[expect(
        clippy::cast_precision_loss,
        reason = "sample numbers stay far below 2^52"
    )]
    pub fn from_local(timing: &LocalTiming) -> Self {
        let rate = timing.sampling_rate;
        let (rising, falling) = timing.device.edge_times(rate);
        let total_seconds = timing
            .device
            .ttl_sample_numbers
            .last()
            .map_or(0.0, |&s| s as f64 / rate);
        Self {
            rising,
            falling,
            total_seconds,
        }
    }
}

/// Decoded barcodes: parallel sequences of start times and ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Barcodes {
    pub times: Vec<f64>,
    pub ids: Vec<u64>,
}

/// Linear map from device time to reference time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockFit {
    /// Subtracted from the device start to get its start on the reference clock.
    pub time_offset: f64,
    /// Device sampling rate measured against the reference.
    pub sampling_rate: f64,
}

/// Barcode decoding and clock regression.
pub trait BarcodeAligner {
    fn extract_barcodes(&self, edges: &EdgeTimes) -> Result<Barcodes, AlignerError>;

    fn estimate_offset(
        &self,
        reference: &Barcodes,
        device: &Barcodes,
        acquisition_start_index: u64,
        local_rate: f64,
    ) -> Result<ClockFit, AlignerError>;
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("could not decode reference barcodes: {0}")]
    Reference(#[source] AlignerError),
    #[error("could not align {device} to the reference clock: {source}")]
    Aligner {
        device: String,
        #[source]
        source: AlignerError,
    },
}

fn reconcile_one<A: BarcodeAligner + ?Sized>(
    aligner: &A,
    reference: &Barcodes,
    timing: LocalTiming,
) -> Result<ReconciledTiming, SyncError> {
    let wrap = |source| SyncError::Aligner {
        device: timing.device.name.clone(),
        source,
    };
    let edges = EdgeTimes::from_local(&timing);
    let barcodes = aligner.extract_barcodes(&edges).map_err(wrap)?;
    let fit = aligner
        .estimate_offset(reference, &barcodes, 0, timing.sampling_rate)
        .map_err(wrap)?;

    let sampling_rate = if fit.sampling_rate.is_finite() {
        fit.sampling_rate
    } else {
        tracing::warn!(
            device = %timing.device.name,
            nominal = timing.sampling_rate,
            "measured sampling rate is not finite, using nominal rate"
        );
        timing.sampling_rate
    };
    tracing::debug!(
        device = %timing.device.name,
        start_time = -fit.time_offset,
        sampling_rate,
        "reconciled device clock"
    );
    Ok(ReconciledTiming {
        device: timing.device,
        sampling_rate,
        start_time: -fit.time_offset,
    })
}

/// Lazy iterator returned by [`reconcile`].
#[derive(Debug)]
pub struct Reconciled<'a, A: ?Sized, I> {
    aligner: &'a A,
    reference: Barcodes,
    devices: I,
}

impl<A, I> Iterator for Reconciled<'_, A, I>
where
    A: BarcodeAligner + ?Sized,
    I: Iterator<Item = LocalTiming>,
{
    type Item = Result<ReconciledTiming, SyncError>;

    fn next(&mut self) -> Option<Self::Item> {
        let timing = self.devices.next()?;
        Some(reconcile_one(self.aligner, &self.reference, timing))
    }
}

/// Maps each device's timing onto the reference clock.
///
/// Reference barcodes are decoded up front; devices are aligned as the result is
/// consumed, and a failure for one device does not stop the others.
pub fn reconcile<'a, A, I>(
    aligner: &'a A,
    reference: &EdgeTimes,
    devices: I,
) -> Result<Reconciled<'a, A, I::IntoIter>, SyncError>
where
    A: BarcodeAligner + ?Sized,
    I: IntoIterator<Item = LocalTiming>,
{
    let reference = aligner
        .extract_barcodes(reference)
        .map_err(SyncError::Reference)?;
    tracing::debug!(barcodes = reference.ids.len(), "decoded reference barcodes");
    Ok(Reconciled {
        aligner,
        reference,
        devices: devices.into_iter(),
    })
}

/// Maps a single device's timing onto the reference clock.
pub fn reconcile_device<A: BarcodeAligner + ?Sized>(
    aligner: &A,
    reference: &EdgeTimes,
    timing: LocalTiming,
) -> Result<ReconciledTiming, SyncError> {
    let reference = aligner
        .extract_barcodes(reference)
        .map_err(SyncError::Reference)?;
    reconcile_one(aligner, &reference, timing)
}


#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::testing::{LinearAligner, reference_edges};
    use super::*;

    use crate::device::Device;
    use crate::timing::Timing;

    const NOMINAL: f64 = 30000.0;

    fn local(name: &str, rising_samples: &[i64]) -> LocalTiming {
        let mut samples = Vec::new();
        let mut states = Vec::new();
        for &s in rising_samples {
            samples.extend([s, s + 300]);
            states.extend([1, -1]);
        }
        let device = Device::new(
            name,
            PathBuf::from(name),
            PathBuf::new(),
            PathBuf::new(),
            None,
            samples,
            states,
        )
        .unwrap();
        LocalTiming {
            device,
            start_sample: 0,
            logged_start_sample: 0,
            sampling_rate: NOMINAL,
        }
    }

    fn pulse_samples() -> Vec<i64> {
        (0..40).map(|k| 15_000 + k * 937_431).collect()
    }

    #[test]
    fn test_recovers_offset_and_rate() {
        let start_time = 20.080_209_634;
        let scale = 1.000_002_35;
        let samples = pulse_samples();
        let reference = reference_edges(&samples, start_time, NOMINAL * scale);

        let aligner = LinearAligner::default();
        let timings: Vec<ReconciledTiming> =
            reconcile(&aligner, &reference, vec![local("ProbeA", &samples)])
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap();

        assert_eq!(timings.len(), 1);
        assert!((timings[0].start_time() - start_time).abs() < 1e-6);
        assert!((timings[0].sampling_rate() - NOMINAL * scale).abs() < 1e-4);
        assert_eq!(timings[0].device().name, "ProbeA");
    }

    #[test]
    fn test_single_device_matches_batch() {
        let samples = pulse_samples();
        let reference = reference_edges(&samples, 4.25, NOMINAL);
        let aligner = LinearAligner::default();

        let single = reconcile_device(&aligner, &reference, local("ProbeA", &samples)).unwrap();
        let batch = reconcile(&aligner, &reference, [local("ProbeA", &samples)])
            .unwrap()
            .next()
            .unwrap()
            .unwrap();

        assert!((single.start_time - batch.start_time).abs() < f64::EPSILON);
        assert!((single.sampling_rate - batch.sampling_rate).abs() < f64::EPSILON);
    }

    #[test]
    fn test_edge_times_from_local() {
        let edges = EdgeTimes::from_local(&local("ProbeA", &[0, 30000]));
        assert_eq!(edges.rising, vec![0.0, 1.0]);
        assert_eq!(edges.falling, vec![0.01, 1.01]);
        assert!((edges.total_seconds - 1.01).abs() < 1e-12);
    }

    #[test]
    fn test_no_pulses_total_is_zero() {
        let edges = EdgeTimes::from_local(&local("ProbeA", &[]));
        assert!(edges.total_seconds.abs() < f64::EPSILON);
    }

    struct NanRate;

    impl BarcodeAligner for NanRate {
        fn extract_barcodes(&self, _edges: &EdgeTimes) -> Result<Barcodes, AlignerError> {
            Ok(Barcodes::default())
        }

        fn estimate_offset(
            &self,
            _reference: &Barcodes,
            _device: &Barcodes,
            _acquisition_start_index: u64,
            _local_rate: f64,
        ) -> Result<ClockFit, AlignerError> {
            Ok(ClockFit {
                time_offset: -3.5,
                sampling_rate: f64::NAN,
            })
        }
    }

    #[test]
    fn test_non_finite_rate_falls_back_to_nominal() {
        let timing = reconcile(&NanRate, &EdgeTimes::default(), [local("ProbeA", &[0])])
            .unwrap()
            .next()
            .unwrap()
            .unwrap();

        assert!((timing.sampling_rate - NOMINAL).abs() < f64::EPSILON);
        assert!((timing.start_time - 3.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failure_is_per_device() {
        let aligner = LinearAligner {
            fail_on_empty: true,
        };
        let samples = pulse_samples();
        let reference = reference_edges(&samples, 1.0, NOMINAL);

        let results: Vec<_> = reconcile(
            &aligner,
            &reference,
            vec![local("ProbeA", &[]), local("ProbeB", &samples)],
        )
        .unwrap()
        .collect();

        assert!(
            matches!(&results[0], Err(SyncError::Aligner { device, .. }) if device == "ProbeA")
        );
        assert!(results[1].is_ok());
    }

    #[test]
    fn test_reference_failure_returned_eagerly() {
        let aligner = LinearAligner {
            fail_on_empty: true,
        };
        let result = reconcile(&aligner, &EdgeTimes::default(), Vec::new());
        assert!(matches!(result, Err(SyncError::Reference(_))));
    }
}
