//! Merge command for combining manifests from several Record Nodes.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub fn run<W: Write>(writer: &mut W, manifests: &[PathBuf], exclude: &[String]) -> Result<()> {
    let merged = oe_core::merge(manifests, exclude).context("failed to merge manifests")?;
    let json = serde_json::to_string_pretty(&merged)?;
    writeln!(writer, "{json}")?;
    Ok(())
}
