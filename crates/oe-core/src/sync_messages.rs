//! Parsing of `sync_messages.txt`, the per-recording acquisition log.
//!
//! ```text
//! Software Time (milliseconds since midnight Jan 1st 1970 UTC): 1691089455612
//! Start Time for Neuropix-PXI (107) - ProbeA-AP @ 30000 Hz: 210069564
//! Start Time for Neuropix-PXI (107) - ProbeA-LFP @ 2500 Hz: 17505797
//! Start Time for NI-DAQmx (109) - PXI-6133 @ 30000 Hz: 210265001
//! ```

use std::path::Path;

use crate::timing::TimingError;

const LINE_PREFIX: &str = "Start Time for ";

/// One device entry from the acquisition log.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncMessage {
    /// Device label normalized to its folder name, e.g. `Neuropix-PXI-107.ProbeA-AP`.
    pub label: String,
    /// Nominal sampling rate in Hz.
    pub rate: f64,
    /// First sample number as logged.
    pub start: i64,
}

/// Turns `Neuropix-PXI (107) - ProbeA-AP` into `Neuropix-PXI-107.ProbeA-AP`.
pub fn normalize_label(raw: &str) -> String {
    raw.replace(") - ", ".").replace(" (", "-")
}

fn parse_line(line: &str) -> Option<SyncMessage> {
    let rest = line.split(LINE_PREFIX).last()?;
    let (raw_label, rest) = rest.split_once(" @")?;
    let (rate_text, start_text) = rest.split_once("Hz:")?;
    let rate = rate_text.trim().parse().ok()?;
    let start = start_text.trim().parse().ok()?;
    Some(SyncMessage {
        label: normalize_label(raw_label.trim()),
        rate,
        start,
    })
}

/// Parses log text, skipping the header line.
///
/// Entries keep the order of first appearance; a repeated label replaces the
/// earlier values.
pub fn parse_sync_messages(text: &str) -> Result<Vec<SyncMessage>, TimingError> {
    let mut messages: Vec<SyncMessage> = Vec::new();
    for line in text.lines().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let message = parse_line(line).ok_or_else(|| TimingError::MalformedSyncMessage {
            line: line.to_string(),
        })?;
        if let Some(existing) = messages.iter_mut().find(|m| m.label == message.label) {
            *existing = message;
        } else {
            messages.push(message);
        }
    }
    Ok(messages)
}

pub fn read_sync_messages(path: &Path) -> Result<Vec<SyncMessage>, TimingError> {
    parse_sync_messages(&std::fs::read_to_string(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_already_normalized_label() {
        let text = "Software Time: 1691089455612\n\
                    Start Time for NI-DAQmx-105.PXI-6133 @ 30000 Hz: 257417001\n";
        let messages = parse_sync_messages(text).unwrap();

        assert_eq!(
            messages,
            vec![SyncMessage {
                label: "NI-DAQmx-105.PXI-6133".to_string(),
                rate: 30000.0,
                start: 257_417_001,
            }]
        );
    }

    #[test]
    fn test_normalizes_processor_labels() {
        let text = "header\n\
            Start Time for Neuropix-PXI (107) - ProbeA-AP @ 30000 Hz: 210069564\n\
            Start Time for Neuropix-PXI (107) - ProbeA-LFP @ 2500 Hz: 17505797\n\
            Start Time for NI-DAQmx (109) - PXI-6133 @ 30000 Hz: 210265001";
        let messages = parse_sync_messages(text).unwrap();

        let labels: Vec<&str> = messages.iter().map(|m| m.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "Neuropix-PXI-107.ProbeA-AP",
                "Neuropix-PXI-107.ProbeA-LFP",
                "NI-DAQmx-109.PXI-6133",
            ]
        );
        assert!((messages[1].rate - 2500.0).abs() < f64::EPSILON);
        assert_eq!(messages[1].start, 17_505_797);
    }

    #[test]
    fn test_first_line_always_ignored() {
        let text = "Start Time for ProbeA @ 30000 Hz: 1\nStart Time for ProbeB @ 30000 Hz: 2";
        let messages = parse_sync_messages(text).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].label, "ProbeB");
    }

    #[test]
    fn test_duplicate_label_last_wins() {
        let text = "header\n\
            Start Time for ProbeA @ 30000 Hz: 1\n\
            Start Time for ProbeB @ 30000 Hz: 2\n\
            Start Time for ProbeA @ 30000 Hz: 3";
        let messages = parse_sync_messages(text).unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].label, "ProbeA");
        assert_eq!(messages[0].start, 3);
    }

    #[test]
    fn test_blank_lines_skipped() {
        let text = "header\n\nStart Time for ProbeA @ 30000 Hz: 1\n\n";
        assert_eq!(parse_sync_messages(text).unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_line_errors() {
        let text = "header\nProcessor started at some point";
        let err = parse_sync_messages(text).unwrap_err();
        assert!(matches!(
            err,
            TimingError::MalformedSyncMessage { ref line } if line.contains("Processor")
        ));
    }

    #[test]
    fn test_header_only_is_empty() {
        assert!(parse_sync_messages("Software Time: 1").unwrap().is_empty());
    }
}
