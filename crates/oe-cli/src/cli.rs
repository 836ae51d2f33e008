//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Open Ephys recording indexer.
///
/// Finds recordings written by Open Ephys Record Nodes, merges their manifests,
/// and checks that every device's data and clock can be recovered.
#[derive(Debug, Parser)]
#[command(name = "oe", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Report whether a folder holds an Open Ephys recording.
    Inspect {
        /// Folder to inspect.
        path: PathBuf,
    },

    /// List the folders recordings were written into.
    Roots {
        /// Folder to search.
        path: PathBuf,

        /// Skip roots smaller than this many GB.
        #[arg(long)]
        min_size_gb: Option<f64>,
    },

    /// List the files to keep when copying a recording root, skipping aborted recordings.
    Kept {
        /// Recording root containing `Record Node *` folders.
        path: PathBuf,
    },

    /// Merge `structure.oebin` manifests from several Record Nodes.
    Merge {
        /// Manifests to merge.
        #[arg(required = true)]
        manifests: Vec<PathBuf>,

        /// Drop streams whose folder name contains this (repeatable).
        #[arg(long = "exclude")]
        exclude: Vec<String>,
    },

    /// Show each device's timing on its own clock.
    Timing {
        /// A `recording*` folder.
        recording: PathBuf,

        /// Only show devices whose name contains this.
        #[arg(long)]
        device: Option<String>,
    },

    /// Check that every device listed in each recording can be found.
    Validate {
        /// Recording roots to validate.
        #[arg(required = true)]
        roots: Vec<PathBuf>,

        /// Validate every recording, not just the largest per root.
        #[arg(long)]
        all_recordings: bool,

        /// Keep validating after a recording fails.
        #[arg(long)]
        keep_going: bool,
    },
}
