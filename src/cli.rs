//! CLI struct definitions for the `cfgroots` command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "cfgroots",
    version = env!("CARGO_PKG_VERSION"),
    about = "Locate, recover and migrate versioned configuration roots in a settings store"
)]
pub(crate) struct Cli {
    /// Path to cfgroots.toml (missing file = built-in defaults).
    #[clap(long, global = true, default_value = "cfgroots.toml")]
    pub config: PathBuf,
    /// Settings database; overrides `store` from the config file.
    #[clap(long, global = true)]
    pub store: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug)]
pub(crate) struct FormatCli {
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// List the root table, newest first
    Roots {
        #[clap(flatten)]
        out: FormatCli,
    },
    /// Classify roots (absent roots are hidden unless --all)
    Classify {
        /// Classify only this root index
        #[clap(long)]
        index: Option<usize>,
        #[clap(long)]
        all: bool,
        #[clap(flatten)]
        out: FormatCli,
    },
    /// Run the startup sequence: pending import first, then the root scan
    Locate(LocateCli),
    /// Inspect or operate on the single backup of root 0
    Backup {
        #[clap(subcommand)]
        command: BackupCommand,
    },
    /// Inspect or edit the import pointer on root 0
    Import {
        #[clap(subcommand)]
        command: ImportCommand,
    },
    /// Read or write a root's configuration payload
    Payload {
        #[clap(subcommand)]
        command: PayloadCommand,
    },
    /// Show the structural audit log
    Audit {
        /// Show only the last N events
        #[clap(long)]
        limit: Option<usize>,
        #[clap(flatten)]
        out: FormatCli,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct LocateCli {
    /// Answer for the migration prompt: load:<i>, load-delete:<i>, defaults-delete, abort
    #[clap(long)]
    pub answer: Option<String>,
    /// Allow a corrupted root 0 without backup to be moved aside
    #[clap(long)]
    pub confirm_cleanup: bool,
    /// Answer for an import conflict: keep, overwrite, abort
    #[clap(long)]
    pub import_choice: Option<String>,
    /// Never prompt; unanswered questions resolve to abort / refuse
    #[clap(long)]
    pub no_input: bool,
    /// Adopt the chosen payload into root 0 and run the caller-side cleanup
    #[clap(long)]
    pub apply: bool,
    /// With --apply: keep the import source instead of deleting it
    #[clap(long)]
    pub keep_source: bool,
    #[clap(flatten)]
    pub out: FormatCli,
}

impl LocateCli {
    pub fn is_scripted(&self) -> bool {
        self.no_input
            || self.answer.is_some()
            || self.import_choice.is_some()
            || self.confirm_cleanup
    }
}

#[derive(Subcommand, Debug)]
pub(crate) enum BackupCommand {
    /// Report backup status (an incomplete backup is deleted)
    Inspect {
        #[clap(flatten)]
        out: FormatCli,
    },
    /// Copy root 0 into the backup slot and mark it complete
    Capture,
    /// Replace a corrupted root 0 with the backup
    Promote,
    /// Delete the backup
    Discard,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ImportCommand {
    /// Resolve the pointer chain without changing anything
    Resolve {
        #[clap(flatten)]
        out: FormatCli,
    },
    /// Point root 0 at another root (relative to root 0's parent)
    Set { pointer: String },
    /// Remove the pointer from root 0
    Clear,
}

#[derive(Subcommand, Debug)]
pub(crate) enum PayloadCommand {
    /// Print a root's payload as JSON
    Show {
        #[clap(long, default_value_t = 0)]
        index: usize,
    },
    /// Write a JSON payload into a root under the write marker
    Save {
        /// JSON file holding the payload subtree
        #[clap(long)]
        file: PathBuf,
        #[clap(long, default_value_t = 0)]
        index: usize,
    },
}
