//! Output formatting for detection results

use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use sigil_common::{Framework, Frameworks, ServiceResult};
use sigil_orchestrator::Sigil;

use crate::args::OutputFormat;

fn frame_json(frame: &Framework) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(frame)?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("cpe".into(), json!(frame.cpe()));
    }
    Ok(value)
}

pub fn print_frameworks(frames: &Frameworks, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let values = frames.iter().map(frame_json).collect::<Result<Vec<_>>>()?;
            println!("{}", serde_json::to_string_pretty(&values)?);
        }
        OutputFormat::Text => {
            if frames.is_empty() {
                println!("No frameworks identified.");
                return Ok(());
            }
            println!("{:-<80}", "");
            println!("{:<28} {:<14} {:<36}", "NAME", "VERSION", "FROM");
            println!("{:-<80}", "");
            for frame in frames.iter() {
                let froms: Vec<&str> = frame.froms.iter().map(|f| f.as_str()).collect();
                println!(
                    "{:<28} {:<14} {:<36}",
                    truncate(&frame.name, 28),
                    truncate(&frame.version, 14),
                    froms.join(",")
                );
            }
            println!("{:-<80}", "");
        }
    }
    Ok(())
}

/// `host:port  frame` for one service result.
pub fn service_line(result: &ServiceResult) -> String {
    let target = format!("{}:{}", result.host, result.port);
    match &result.framework {
        Some(frame) => format!("{:<28} {}", target, frame),
        None => format!("{:<28} unknown", target),
    }
}

pub fn print_services(
    results: &[ServiceResult],
    format: OutputFormat,
    elapsed: Duration,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let mut entries = Vec::with_capacity(results.len());
            for result in results {
                let framework = result.framework.as_ref().map(frame_json).transpose()?;
                entries.push(json!({
                    "host": result.host,
                    "port": result.port,
                    "framework": framework,
                    "vuln": result.vuln,
                }));
            }
            let output = json!({
                "info": {
                    "duration_seconds": elapsed.as_secs_f64(),
                    "duration_formatted": format_duration(elapsed),
                    "identified": results.len(),
                },
                "results": entries,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            if results.is_empty() {
                println!("No service identified.");
            }
            for result in results {
                println!("{}", service_line(result));
            }
            print_summary(results.len(), elapsed);
        }
    }
    Ok(())
}

pub fn print_summary(identified: usize, elapsed: Duration) {
    println!();
    println!("Summary:");
    println!("  Identified: {}", identified);
    println!("  Duration: {}", format_duration(elapsed));
}

pub fn print_engines(sigil: &Sigil, format: OutputFormat) -> Result<()> {
    let rows: Vec<(&str, usize, bool)> = sigil
        .engine_names()
        .iter()
        .filter_map(|name| {
            let engine = sigil.registered(name)?;
            Some((name.as_str(), engine.len(), sigil.is_enabled(name)))
        })
        .collect();
    match format {
        OutputFormat::Json => {
            let values: Vec<_> = rows
                .iter()
                .map(|(name, len, enabled)| json!({"name": name, "rules": len, "enabled": enabled}))
                .collect();
            println!("{}", serde_json::to_string_pretty(&json!({
                "engines": values,
                "aliases": sigil.aliases().len(),
            }))?);
        }
        OutputFormat::Text => {
            println!("{:<16} {:>8}  {}", "ENGINE", "RULES", "ENABLED");
            for (name, len, enabled) in rows {
                println!("{:<16} {:>8}  {}", name, len, if enabled { "yes" } else { "no" });
            }
            println!("aliases: {}", sigil.aliases().len());
        }
    }
    Ok(())
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let cut: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        s.to_string()
    }
}

/// Format duration in a human-readable way
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs == 0 {
        format!("{}ms", millis)
    } else if total_secs < 60 {
        if millis > 0 {
            format!("{}.{:03}s", total_secs, millis)
        } else {
            format!("{}s", total_secs)
        }
    } else {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    }
}
