//! `structure.oebin` manifests and merging them across Record Nodes.
//!
//! A recording split across drives (e.g. `A:/*_probeABC`, `B:/*_probeDEF`) has one
//! manifest per node. Merging them gives a single logical recording that can be
//! processed as one session.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::settings::assert_settings_match;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid stream descriptor: {0}")]
    Descriptor(#[source] serde_json::Error),
    #[error("no .oebin manifest found in {0}")]
    NoManifestFound(PathBuf),
    #[error("not all paths are .oebin files: {0:?}")]
    NotAManifest(Vec<PathBuf>),
    #[error("not a settings .xml file: {0}")]
    NotASettingsFile(PathBuf),
    #[error("settings file does not exist: {0}")]
    SettingsNotFound(PathBuf),
    #[error("settings files do not match: {0:?}")]
    SettingsMismatch(Vec<PathBuf>),
    #[error("no streams found in manifests {0:?}")]
    EmptyMerge(Vec<PathBuf>),
}

/// Stream categories listed in a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCategory {
    Continuous,
    Events,
    Spikes,
}

impl StreamCategory {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Continuous => "continuous",
            Self::Events => "events",
            Self::Spikes => "spikes",
        }
    }
}

impl fmt::Display for StreamCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed view of a continuous stream entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamDescriptor {
    pub folder_name: String,
    pub num_channels: u32,
    #[serde(default)]
    pub sample_rate: Option<f64>,
    #[serde(default)]
    pub stream_name: Option<String>,
}

impl StreamDescriptor {
    /// Folder name without the trailing `/` the acquisition software writes.
    pub fn device_name(&self) -> &str {
        self.folder_name.trim_matches('/')
    }
}

/// Parsed contents of one or more `structure.oebin` files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Map<String, Value>);

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, MergeError> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|source| MergeError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw descriptors of one category, empty if the category is absent.
    pub fn streams(&self, category: StreamCategory) -> &[Value] {
        self.0
            .get(category.as_str())
            .and_then(Value::as_array)
            .map_or(&[], Vec::as_slice)
    }

    pub fn continuous_streams(&self) -> Result<Vec<StreamDescriptor>, MergeError> {
        self.streams(StreamCategory::Continuous)
            .iter()
            .map(|v| serde_json::from_value(v.clone()).map_err(MergeError::Descriptor))
            .collect()
    }

    /// First continuous stream whose folder name contains `device_name`.
    pub fn find_continuous(
        &self,
        device_name: &str,
    ) -> Result<Option<StreamDescriptor>, MergeError> {
        Ok(self
            .continuous_streams()?
            .into_iter()
            .find(|s| s.folder_name.contains(device_name)))
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// First `*.oebin` file directly inside a recording folder.
pub fn find_manifest_in(recording_dir: &Path) -> Result<PathBuf, MergeError> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(recording_dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "oebin"))
        .collect();
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| MergeError::NoManifestFound(recording_dir.to_path_buf()))
}

/// `settings.xml` belonging to a manifest: it sits in the `Record Node *` folder.
fn settings_path_for(manifest: &Path) -> PathBuf {
    manifest
        .ancestors()
        .nth(3)
        .unwrap_or_else(|| Path::new(""))
        .join("settings.xml")
}

fn is_excluded(item: &Value, exclude: &[String]) -> bool {
    let folder = item
        .get("folder_name")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_lowercase();
    exclude.iter().any(|name| folder.contains(name.as_str()))
}

/// Merges manifests from several Record Nodes into one.
///
/// A single manifest is returned unchanged. Otherwise all settings files must
/// match, and list entries are concatenated in path order without duplicates,
/// dropping entries whose `folder_name` contains any of `exclude_names`
/// (case-insensitive).
pub fn merge<P, S>(paths: &[P], exclude_names: &[S]) -> Result<Manifest, MergeError>
where
    P: AsRef<Path>,
    S: AsRef<str>,
{
    let mut paths: Vec<PathBuf> = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
    if let [single] = paths.as_slice() {
        return Manifest::load(single);
    }

    if paths.iter().any(|p| p.extension().is_none_or(|e| e != "oebin")) {
        return Err(MergeError::NotAManifest(paths));
    }
    let settings: Vec<PathBuf> = paths.iter().map(|p| settings_path_for(p)).collect();
    assert_settings_match(&settings)?;

    let exclude: Vec<String> = exclude_names
        .iter()
        .map(|s| s.as_ref().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();

    tracing::debug!(paths = ?paths, "creating merged manifest");
    paths.sort();
    let mut merged: Map<String, Value> = Map::new();
    for path in &paths {
        for (key, value) in Manifest::load(path)?.into_inner() {
            if merged.get(&key) == Some(&value) {
                continue;
            }
            let Value::Array(items) = value else {
                continue;
            };
            for item in items {
                let present = merged
                    .get(&key)
                    .and_then(Value::as_array)
                    .is_some_and(|existing| existing.contains(&item));
                if present || is_excluded(&item, &exclude) {
                    continue;
                }
                if let Value::Array(existing) = merged
                    .entry(key.clone())
                    .or_insert_with(|| Value::Array(Vec::new()))
                {
                    existing.push(item);
                }
            }
        }
    }

    if merged.is_empty() {
        return Err(MergeError::EmptyMerge(paths));
    }
    Ok(Manifest(merged))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::{Path, PathBuf};

    use serde_json::json;

    use crate::settings::testing::settings_xml;

    pub fn continuous_entry(folder: &str, channels: u32) -> serde_json::Value {
        json!({
            "folder_name": format!("{folder}/"),
            "sample_rate": 30000.0,
            "source_processor_name": "Neuropix-PXI",
            "num_channels": channels,
        })
    }

    /// Writes `<root>/Record Node <node>/experiment1/recording1/structure.oebin` and
    /// the node's `settings.xml`, returning the manifest path.
    pub fn write_node(
        root: &Path,
        node: u32,
        continuous: &[serde_json::Value],
        settings: &str,
    ) -> PathBuf {
        let node_dir = root.join(format!("Record Node {node}"));
        let recording = node_dir.join("experiment1").join("recording1");
        std::fs::create_dir_all(&recording).unwrap();
        std::fs::write(node_dir.join("settings.xml"), settings).unwrap();
        let manifest = json!({
            "GUI version": "0.6.4",
            "continuous": continuous,
            "events": [{"folder_name": "Neuropix-PXI-100.ProbeA-AP/TTL/", "channel_name": "TTL"}],
            "spikes": [],
        });
        let path = recording.join("structure.oebin");
        std::fs::write(&path, serde_json::to_string_pretty(&manifest).unwrap()).unwrap();
        path
    }

    pub fn default_settings() -> String {
        settings_xml("3 Aug 2023 12:04:15", "30000")
    }
}
