use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// dexpatch - fingerprint resolution and patching of smali method corpora
#[derive(Debug, Parser)]
#[command(name = "dexpatch", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Display corpus overview: class, method, instruction and label counts.
    Info {
        /// Path to the smali listing.
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },

    /// List methods.
    Methods {
        /// Path to the smali listing.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Filter by class descriptor substring.
        #[arg(long, value_name = "NAME")]
        class: Option<String>,
    },

    /// Resolve the fingerprints of a patch plan without modifying anything.
    Resolve {
        /// Path to the smali listing.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Patch plan (JSON).
        #[arg(short, long, value_name = "PLAN")]
        plan: PathBuf,
    },

    /// Apply a patch plan and write the patched listing.
    Apply {
        /// Path to the smali listing.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Patch plan (JSON).
        #[arg(short, long, value_name = "PLAN")]
        plan: PathBuf,

        /// Output listing.
        #[arg(short, long, value_name = "OUT")]
        output: PathBuf,
    },

    /// Force methods to return a constant.
    Block {
        /// Path to the smali listing.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Owner class descriptor, e.g. Lcom/example/AdClient;
        #[arg(short, long, value_name = "DESCRIPTOR")]
        class: String,

        /// Method name; every overload is blocked. Repeatable.
        #[arg(short, long = "method", value_name = "NAME", required = true)]
        methods: Vec<String>,

        /// Return value: V, Z:0, Z:1, I:<n>, J:<n>, F:<f>, D:<f> or L:null.
        #[arg(short, long, default_value = "Z:0")]
        returns: String,

        /// Gate the early return behind a static ()Z accessor.
        #[arg(long, value_name = "METHOD_REF")]
        accessor: Option<String>,

        /// Settings key reported for the gate.
        #[arg(long, default_value = "dexpatch_block")]
        key: String,

        /// Output listing.
        #[arg(short, long, value_name = "OUT")]
        output: PathBuf,
    },
}
