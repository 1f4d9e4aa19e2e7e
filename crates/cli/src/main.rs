mod args;
mod output;
mod runner;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use args::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let sigil = runner::build_sigil(&cli)?;
    match cli.command {
        Commands::Web { ref input, parse } => runner::run_web(&sigil, input, parse, cli.format)?,
        Commands::Favicon { ref input } => runner::run_favicon(&sigil, input, cli.format)?,
        Commands::Service {
            ref host,
            ref port,
            level,
            timeout_ms,
            ref preset,
        } => {
            let sender = runner::build_sender(preset, timeout_ms)?;
            runner::run_service(&sigil, &sender, host, port, level, cli.format).await?;
        }
        Commands::Batch {
            ref targets,
            concurrency,
            level,
            timeout_ms,
            ref preset,
        } => {
            let sender = runner::build_sender(preset, timeout_ms)?;
            runner::run_batch(sigil, sender, targets, concurrency, level, cli.format).await?;
        }
        Commands::Engines => output::print_engines(&sigil, cli.format)?,
    }

    Ok(())
}

fn init_logging(verbose: u8, json: bool) {
    let log_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // stdout carries results
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}
