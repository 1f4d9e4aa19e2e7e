use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::info;

use sigil_common::{Frameworks, ServiceCallback, ServiceResult};
use sigil_orchestrator::{BatchOptions, Corpora, EngineOptions, ServiceBatch, ServiceTarget, Sigil};
use sigil_sender::{DefaultServiceSender, SenderOptions};

use crate::args::{Cli, OutputFormat};
use crate::output;

pub fn build_sigil(cli: &Cli) -> Result<Sigil> {
    let corpora = match &cli.resources {
        Some(dir) => Corpora::from_dir(dir)
            .with_context(|| format!("Failed to load corpora from {}", dir.display()))?,
        None => Corpora::new(),
    };
    let options = EngineOptions::new()
        .with_engines(cli.engines.iter().cloned())
        .with_corpora(corpora)
        .with_opsec(cli.opsec)
        .with_no_guess(cli.no_guess);
    let sigil = Sigil::new(options).context("Failed to initialise engines")?;
    info!("Engines: {}", sigil);
    Ok(sigil)
}

pub fn build_sender(preset: &str, timeout_ms: Option<u64>) -> Result<DefaultServiceSender> {
    let mut options = match preset {
        "fast" => SenderOptions::fast(),
        "accurate" => SenderOptions::accurate(),
        "balanced" => SenderOptions::default(),
        other => bail!("Invalid preset '{}'", other),
    };
    if let Some(ms) = timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }
    info!("Sender timeout: {:?}", options.timeout);
    DefaultServiceSender::with_options(options).context("Failed to build service sender")
}

fn read_input(input: &str) -> Result<Vec<u8>> {
    if input == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read(input).with_context(|| format!("Failed to read {}", input))
}

pub fn run_web(sigil: &Sigil, input: &str, parse: bool, format: OutputFormat) -> Result<()> {
    let content = read_input(input)?;
    let frames = if parse {
        sigil
            .detect_content(&content)
            .with_context(|| format!("{} is not an HTTP response", input))?
    } else {
        sigil.web_match(&content)
    };
    output::print_frameworks(&frames, format)
}

pub fn run_favicon(sigil: &Sigil, input: &Path, format: OutputFormat) -> Result<()> {
    let content =
        std::fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let frame = sigil.detect_favicon(&content);
    output::print_frameworks(&frame.into_iter().collect::<Frameworks>(), format)
}

pub async fn run_service(
    sigil: &Sigil,
    sender: &DefaultServiceSender,
    host: &str,
    port: &str,
    level: i32,
    format: OutputFormat,
) -> Result<()> {
    let start = Instant::now();
    let results = sigil.detect_service(host, port, level, sender, None).await;
    output::print_services(&results, format, start.elapsed())
}

pub async fn run_batch(
    sigil: Sigil,
    sender: DefaultServiceSender,
    targets: &Path,
    concurrency: usize,
    level: i32,
    format: OutputFormat,
) -> Result<()> {
    let text = std::fs::read_to_string(targets)
        .with_context(|| format!("Failed to read {}", targets.display()))?;
    let targets = ServiceTarget::parse_list(&text).context("Invalid target list")?;
    info!("Loaded {} targets", targets.len());

    let options = BatchOptions::default()
        .with_concurrency(concurrency)
        .with_level(level);
    let batch = ServiceBatch::new(Arc::new(sigil), Arc::new(sender), options);

    // stream text results as they arrive; json waits for the full set
    let callback = match format {
        OutputFormat::Text => {
            let print: Arc<ServiceCallback> = Arc::new(|result: &ServiceResult| {
                println!("{}", output::service_line(result));
            });
            Some(print)
        }
        OutputFormat::Json => None,
    };

    let start = Instant::now();
    let results = batch.run(targets, callback).await;
    match format {
        OutputFormat::Text => {
            output::print_summary(results.len(), start.elapsed());
            Ok(())
        }
        OutputFormat::Json => output::print_services(&results, format, start.elapsed()),
    }
}
