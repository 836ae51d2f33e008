//! Comparison of `settings.xml` files across Record Nodes.
//!
//! A recording split across drives has one `settings.xml` per node. They should be
//! identical, except that each node stamps its own creation `<DATE>`.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::oebin::MergeError;

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<DATE\s*/>|<DATE>.*?</DATE>").expect("valid regex"));
static BETWEEN_TAGS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s+<").expect("valid regex"));

/// Reduces settings XML to a form that only differs when the acquisition setup does.
///
/// Only `<DATE>` (empty or not) and whitespace between tags are ignored. The text is
/// not parsed, so reordered attributes or a different quote style still differ.
pub fn normalize_settings(xml: &str) -> String {
    let without_date = DATE_RE.replace_all(xml, "");
    BETWEEN_TAGS_RE
        .replace_all(without_date.trim(), "><")
        .into_owned()
}

fn checksum(path: &Path) -> Result<blake3::Hash, MergeError> {
    Ok(blake3::hash(&std::fs::read(path)?))
}

/// Fails unless every settings file describes the same acquisition setup.
pub fn assert_settings_match(paths: &[PathBuf]) -> Result<(), MergeError> {
    if let Some(bad) = paths
        .iter()
        .find(|p| p.extension().is_none_or(|e| e != "xml"))
    {
        return Err(MergeError::NotASettingsFile(bad.clone()));
    }
    if let Some(missing) = paths.iter().find(|p| !p.is_file()) {
        return Err(MergeError::SettingsNotFound(missing.clone()));
    }
    let Some((first, rest)) = paths.split_first() else {
        return Ok(());
    };

    let reference = checksum(first)?;
    let mut checksums_match = true;
    for path in rest {
        if checksum(path)? != reference {
            checksums_match = false;
            break;
        }
    }
    if checksums_match {
        return Ok(());
    }

    tracing::debug!(paths = ?paths, "settings checksums differ, comparing contents");
    let expected = normalize_settings(&std::fs::read_to_string(first)?);
    for path in rest {
        if normalize_settings(&std::fs::read_to_string(path)?) != expected {
            return Err(MergeError::SettingsMismatch(paths.to_vec()));
        }
    }
    Ok(())
}
