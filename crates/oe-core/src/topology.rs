//! Recognition of Open Ephys folder layouts.
//!
//! Recordings are written as `<root>/Record Node <N>/experiment<N>/recording<N>/...`,
//! possibly split across several roots (one per drive). Aborted recordings during
//! setup leave extra, smaller `recording*` folders next to the real one; those are
//! treated as superfluous.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

/// Folder-name prefix written by each acquisition node.
pub const RECORD_NODE_PREFIX: &str = "Record Node";

/// Files that only exist once an acquisition has finished and been sorted.
const COMPLETE_HALLMARKS: &[&str] = &["continuous.dat", "spike_times.npy", "spike_clusters.npy"];

/// Path fragments marking downstream processing outputs rather than raw data.
const PROCESSED_MARKERS: &[&str] = &["sorted", "extracted", "curated"];

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("malformed recording path {path}: {reason}")]
    MalformedPath { path: PathBuf, reason: String },
    #[error("no structure.oebin file found in {0}")]
    NoManifestFound(PathBuf),
}

/// A path kept for restructuring, with its location relative to the node folder's parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeptPath {
    pub absolute: PathBuf,
    /// Always starts with the `Record Node *` folder name.
    pub relative: PathBuf,
}

pub(crate) fn is_record_node_name(name: &OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with(RECORD_NODE_PREFIX))
}

pub(crate) fn is_manifest_name(name: &OsStr) -> bool {
    name.to_str()
        .is_some_and(|n| n.starts_with("structure") && n.ends_with(".oebin"))
}

fn sorted_walk(path: &Path) -> walkdir::IntoIter {
    WalkDir::new(path).sort_by_file_name().into_iter()
}

fn any_descendant(path: &Path, predicate: impl Fn(&OsStr) -> bool) -> bool {
    WalkDir::new(path)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .any(|entry| predicate(entry.file_name()))
}

/// Looks for any hallmark of a v0.6+ Open Ephys recording in the path or below it.
pub fn looks_like_recording(path: &Path) -> bool {
    let text = path.to_string_lossy().to_lowercase();
    if text.contains(&RECORD_NODE_PREFIX.to_lowercase()) || text.contains("structure.oebin") {
        return true;
    }
    any_descendant(path, |name| is_record_node_name(name) || is_manifest_name(name))
}

/// Looks for all hallmarks of a finished, sorted recording.
pub fn looks_complete(path: &Path) -> bool {
    if !looks_like_recording(path) {
        return false;
    }
    for hallmark in COMPLETE_HALLMARKS {
        if !any_descendant(path, |name| name == *hallmark) {
            tracing::debug!(path = ?path, hallmark, "missing completion hallmark");
            return false;
        }
    }
    true
}

/// Checks a single folder of raw data for recording hallmarks and, optionally, size.
pub fn is_valid_recording_dir(path: &Path, min_size_gb: Option<f64>) -> bool {
    if !path.is_dir() || !looks_like_recording(path) {
        return false;
    }
    match min_size_gb {
        Some(min) => dir_size(path).is_ok_and(|size| size_gb(size) >= min),
        None => true,
    }
}

/// Total size in bytes of every file below `path`.
pub fn dir_size(path: &Path) -> Result<u64, TopologyError> {
    let mut total = 0u64;
    for entry in WalkDir::new(path) {
        let entry = entry?;
        if entry.file_type().is_file() {
            total = total.saturating_add(entry.metadata()?.len());
        }
    }
    Ok(total)
}

#[expect(
    clippy::cast_precision_loss,
    reason = "sizes are compared against a coarse GB threshold"
)]
fn size_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

/// Returns the parent of the nearest `Record Node *` ancestor of `path`.
///
/// This is the root the acquisition software records into, e.g.
/// `A:/1233245678_366122_20220618_probeABC`.
pub fn node_parent(path: &Path) -> Result<PathBuf, TopologyError> {
    let marker = RECORD_NODE_PREFIX.to_lowercase();
    path.ancestors()
        .skip(1)
        .find(|p| {
            p.file_name()
                .is_some_and(|n| n.to_string_lossy().to_lowercase().contains(&marker))
        })
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .ok_or_else(|| TopologyError::MalformedPath {
            path: path.to_path_buf(),
            reason: format!("no '{RECORD_NODE_PREFIX}' ancestor - is this raw ephys data?"),
        })
}

/// Finds the folders that recordings were written into below `path`.
///
/// Outputs of spike sorting and other processing are ignored.
pub fn list_recording_roots(
    path: &Path,
    min_size_gb: Option<f64>,
) -> Result<BTreeSet<PathBuf>, TopologyError> {
    let mut roots = BTreeSet::new();
    for entry in WalkDir::new(path) {
        let entry = entry?;
        if entry.file_name() != "continuous.dat" {
            continue;
        }
        let text = entry.path().to_string_lossy().to_lowercase();
        if PROCESSED_MARKERS.iter().any(|m| text.contains(m)) {
            tracing::trace!(path = ?entry.path(), "skipping processed data");
            continue;
        }
        roots.insert(node_parent(entry.path())?);
    }

    if let Some(min) = min_size_gb {
        let mut kept = BTreeSet::new();
        for root in roots {
            if size_gb(dir_size(&root)?) >= min {
                kept.insert(root);
            } else {
                tracing::debug!(root = ?root, min_size_gb = min, "skipping small recording root");
            }
        }
        roots = kept;
    }
    Ok(roots)
}

/// Every `structure*.oebin` below `path`, in sorted order.
pub fn find_manifests(path: &Path) -> Result<Vec<PathBuf>, TopologyError> {
    let mut manifests = Vec::new();
    for entry in sorted_walk(path) {
        let entry = entry?;
        if entry.file_type().is_file() && is_manifest_name(entry.file_name()) {
            manifests.push(entry.into_path());
        }
    }
    Ok(manifests)
}

/// Picks the one `structure.oebin` that describes the real recording below `path`.
///
/// Raw data folders may hold several `recording*` folders; the largest is assumed
/// to be the real one and the rest short, aborted recordings.
pub fn select_authoritative_manifest(path: &Path) -> Result<PathBuf, TopologyError> {
    if !path.is_dir() {
        return Err(TopologyError::MalformedPath {
            path: path.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }
    let manifests = find_manifests(path)?;
    pick_largest(path, manifests)
}

fn pick_largest(path: &Path, manifests: Vec<PathBuf>) -> Result<PathBuf, TopologyError> {
    if manifests.len() <= 1 {
        return manifests
            .into_iter()
            .next()
            .ok_or_else(|| TopologyError::NoManifestFound(path.to_path_buf()));
    }

    let mut best: Option<(u64, PathBuf)> = None;
    for manifest in manifests {
        let folder = manifest.parent().unwrap_or(path);
        let size = dir_size(folder)?;
        // strictly greater, so the first of equal sizes wins
        if best.as_ref().is_none_or(|(largest, _)| size > *largest) {
            best = Some((size, manifest));
        }
    }
    best.map(|(_, manifest)| manifest)
        .ok_or_else(|| TopologyError::NoManifestFound(path.to_path_buf()))
}

/// Every manifest below `path` except the authoritative one.
pub fn superfluous_manifests(path: &Path) -> Result<Vec<PathBuf>, TopologyError> {
    without_authoritative(path, find_manifests(path)?)
}

fn without_authoritative(
    path: &Path,
    manifests: Vec<PathBuf>,
) -> Result<Vec<PathBuf>, TopologyError> {
    if manifests.len() == 1 {
        return Ok(Vec::new());
    }
    let keep = pick_largest(path, manifests.clone())?;
    Ok(manifests.into_iter().filter(|m| *m != keep).collect())
}

/// Walks every `Record Node *` folder below `root`, skipping superfluous recordings.
///
/// Each node is expected to hold one real recording, e.g.
/// `/session/ephys_probeABC/Record Node 101/experiment1/recording1/...`.
/// Restructuring code copies the yielded paths to `relative` under a new parent,
/// so only the "good" data survives with the node-relative layout intact.
pub fn enumerate_kept_paths(root: &Path) -> KeptPaths {
    KeptPaths {
        nodes: sorted_walk(root),
        current: None,
    }
}

/// Lazy iterator returned by [`enumerate_kept_paths`].
pub struct KeptPaths {
    nodes: walkdir::IntoIter,
    current: Option<NodeWalk>,
}

struct NodeWalk {
    anchor: PathBuf,
    superfluous: Vec<PathBuf>,
    entries: walkdir::IntoIter,
}

impl NodeWalk {
    fn new(node: PathBuf) -> Result<Self, TopologyError> {
        let manifests = find_manifests(&node)?;
        if manifests.is_empty() {
            return Err(TopologyError::NoManifestFound(node));
        }
        let superfluous: Vec<PathBuf> = without_authoritative(&node, manifests)?
            .into_iter()
            .filter_map(|m| m.parent().map(Path::to_path_buf))
            .collect();
        tracing::debug!(
            node = ?node,
            count = superfluous.len(),
            excluded = ?superfluous,
            "found superfluous recording dirs to exclude"
        );
        let anchor = node.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self {
            anchor,
            superfluous,
            entries: WalkDir::new(&node).min_depth(1).sort_by_file_name().into_iter(),
        })
    }

    fn is_superfluous(&self, path: &Path) -> bool {
        self.superfluous.iter().any(|dir| path.starts_with(dir))
    }
}

impl Iterator for KeptPaths {
    type Item = Result<KeptPath, TopologyError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(walk) = &mut self.current {
                match walk.entries.next() {
                    Some(Ok(entry)) => {
                        if walk.is_superfluous(entry.path()) {
                            if entry.file_type().is_dir() {
                                walk.entries.skip_current_dir();
                            }
                            continue;
                        }
                        let absolute = entry.into_path();
                        let relative = absolute
                            .strip_prefix(&walk.anchor)
                            .map_or_else(|_| absolute.clone(), Path::to_path_buf);
                        return Some(Ok(KeptPath { absolute, relative }));
                    }
                    Some(Err(e)) => return Some(Err(e.into())),
                    None => self.current = None,
                }
            }

            let node = loop {
                match self.nodes.next()? {
                    Ok(entry)
                        if entry.file_type().is_dir() && is_record_node_name(entry.file_name()) =>
                    {
                        break entry.into_path();
                    }
                    Ok(_) => {}
                    Err(e) => return Some(Err(e.into())),
                }
            };
            match NodeWalk::new(node) {
                Ok(walk) => self.current = Some(walk),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
