//! Roots command for listing the folders recordings were written into.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use oe_core::list_recording_roots;

pub fn run<W: Write>(writer: &mut W, path: &Path, min_size_gb: Option<f64>) -> Result<()> {
    let roots = list_recording_roots(path, min_size_gb)
        .with_context(|| format!("failed to search {}", path.display()))?;
    for root in roots {
        writeln!(writer, "{}", root.display())?;
    }
    Ok(())
}
