//! CLI definitions for linkaudit.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// linkaudit CLI.
#[derive(Parser)]
#[command(name = "linkaudit")]
#[command(about = "Link and image audit scan orchestrator")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/linkaudit.toml", global = true)]
    pub config: PathBuf,

    /// Numeric id recorded as the requester of manual actions
    #[arg(long, env = "LINKAUDIT_ACTOR", global = true)]
    pub actor: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the HTTP server in foreground (default)
    Serve {
        /// Override the configured host
        #[arg(long)]
        host: Option<String>,

        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run one polling cycle and print the due batches as JSON lines
    Tick,

    /// Request a scan
    Scan {
        /// Dataset name (link, image)
        dataset: String,

        /// Full rescan instead of incremental
        #[arg(long)]
        full: bool,

        /// Cancel the running scan and start this one
        #[arg(long)]
        force: bool,

        /// Queue the request when a scan is running
        #[arg(long)]
        queue: bool,
    },

    /// Cancel the current scan
    Cancel {
        dataset: String,
    },

    /// Show the current scan status
    Status {
        dataset: String,
    },

    /// Show recent job history
    History {
        dataset: String,

        /// Number of entries
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show aggregate run statistics
    Insights {
        dataset: String,
    },

    /// Clear status, triggers and queue of a dataset
    Reset {
        dataset: String,
    },

    /// Re-register the automatic cadence (all datasets when omitted)
    Reschedule {
        dataset: Option<String>,
    },
}
