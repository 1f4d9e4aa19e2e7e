use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "sigil")]
#[command(version = "0.1.0")]
#[command(about = "Multi-engine service and web fingerprinting", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Directory holding corpus files (plain or .gz)
    #[arg(short = 'r', long, global = true)]
    pub resources: Option<PathBuf>,

    /// Engines to load, comma separated. Default: all
    #[arg(short, long, value_delimiter = ',', global = true)]
    pub engines: Vec<String>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,

    /// Skip active fingers flagged opsec
    #[arg(long, global = true)]
    pub opsec: bool,

    /// Do not report port-table guesses
    #[arg(long, global = true)]
    pub no_guess: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Match a captured HTTP response (file or - for stdin)
    Web {
        input: String,

        /// Parse and normalise the response (chunked bodies) first
        #[arg(long)]
        parse: bool,
    },

    /// Look up a favicon file by hash
    Favicon { input: PathBuf },

    /// Actively identify one service
    Service {
        host: String,

        /// Port, U:<port> for UDP
        port: String,

        /// Probe rarity ceiling, 1-9
        #[arg(short, long, default_value = "1")]
        level: i32,

        /// Per-probe timeout in milliseconds, overrides the preset
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Sender preset: fast, balanced, accurate
        #[arg(long, default_value = "balanced", value_parser = ["fast", "balanced", "accurate"])]
        preset: String,
    },

    /// Identify every `host port` line of a file
    Batch {
        targets: PathBuf,

        /// Max concurrent workers
        #[arg(short, long, default_value = "50")]
        concurrency: usize,

        #[arg(short, long, default_value = "1")]
        level: i32,

        #[arg(long)]
        timeout_ms: Option<u64>,

        #[arg(long, default_value = "balanced", value_parser = ["fast", "balanced", "accurate"])]
        preset: String,
    },

    /// List loaded engines and rule counts
    Engines,
}
