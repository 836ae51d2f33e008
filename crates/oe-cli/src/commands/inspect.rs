//! Inspect command for describing what a folder holds.

use std::io::Write;
use std::path::Path;

use anyhow::Result;

use oe_core::topology::{
    looks_complete, looks_like_recording, select_authoritative_manifest, superfluous_manifests,
};

const fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

pub fn run<W: Write>(writer: &mut W, path: &Path) -> Result<()> {
    let recording = looks_like_recording(path);
    writeln!(writer, "Path: {}", path.display())?;
    writeln!(writer, "Looks like a recording: {}", yes_no(recording))?;
    writeln!(writer, "Looks complete: {}", yes_no(looks_complete(path)))?;
    if !recording {
        return Ok(());
    }

    match select_authoritative_manifest(path) {
        Ok(manifest) => {
            writeln!(writer, "Manifest: {}", manifest.display())?;
            let superfluous = superfluous_manifests(path)?;
            if !superfluous.is_empty() {
                writeln!(writer, "Ignored manifests:")?;
                for manifest in superfluous {
                    writeln!(writer, "- {}", manifest.display())?;
                }
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "no authoritative manifest");
            writeln!(writer, "Manifest: none")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;

    fn recording(root: &Path, n: u32, payload: usize) {
        let dir = root.join(format!("Record Node 101/experiment1/recording{n}"));
        let continuous = dir.join("continuous/Neuropix-PXI-100.ProbeA-AP");
        std::fs::create_dir_all(&continuous).unwrap();
        std::fs::write(dir.join("structure.oebin"), "{}").unwrap();
        std::fs::write(continuous.join("continuous.dat"), vec![0u8; payload]).unwrap();
    }

    fn inspect(path: &Path) -> String {
        let mut output = Vec::new();
        run(&mut output, path).unwrap();
        String::from_utf8(output)
            .unwrap()
            .replace(&path.display().to_string(), "[TEMP]")
    }

    #[test]
    fn inspect_plain_folder() {
        let temp = tempfile::tempdir().unwrap();
        assert_snapshot!(inspect(temp.path()), @r"
        Path: [TEMP]
        Looks like a recording: no
        Looks complete: no
        ");
    }

    #[test]
    fn inspect_lists_ignored_recordings() {
        let temp = tempfile::tempdir().unwrap();
        recording(temp.path(), 1, 64);
        recording(temp.path(), 2, 8);
        assert_snapshot!(inspect(temp.path()), @r"
        Path: [TEMP]
        Looks like a recording: yes
        Looks complete: no
        Manifest: [TEMP]/Record Node 101/experiment1/recording1/structure.oebin
        Ignored manifests:
        - [TEMP]/Record Node 101/experiment1/recording2/structure.oebin
        ");
    }
}
