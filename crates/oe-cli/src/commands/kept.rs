//! Kept command for listing the files that make up the real recordings.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use oe_core::enumerate_kept_paths;

pub fn run<W: Write>(writer: &mut W, root: &Path) -> Result<()> {
    for kept in enumerate_kept_paths(root) {
        let kept = kept.with_context(|| format!("failed to walk {}", root.display()))?;
        writeln!(writer, "{}", kept.relative.display())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;

    #[test]
    fn kept_skips_aborted_recording() {
        let temp = tempfile::tempdir().unwrap();
        for (n, payload) in [(1, 8), (2, 64)] {
            let dir = temp
                .path()
                .join(format!("Record Node 102/experiment1/recording{n}"));
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("structure.oebin"), "{}").unwrap();
            std::fs::write(dir.join("continuous.dat"), vec![0u8; payload]).unwrap();
        }

        let mut output = Vec::new();
        run(&mut output, temp.path()).unwrap();
        let output = String::from_utf8(output).unwrap();

        assert!(output.lines().all(|line| !line.contains("recording1")));
        assert!(output.contains("Record Node 102/experiment1/recording2/continuous.dat"));
    }

    #[test]
    fn kept_empty_root() {
        let temp = tempfile::tempdir().unwrap();
        let mut output = Vec::new();
        run(&mut output, temp.path()).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @"");
    }
}
