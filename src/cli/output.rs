//! Output formatting for CLI commands.

use serde::Serialize;
use serde_json::Value;

use crate::cli::args::{OutputFormat, QuarryArgs};
use crate::error::Result;

/// Print a command result in the requested format.
pub fn output_result<T: Serialize>(message: &str, result: &T, args: &QuarryArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Json => output_json(result, args),
        OutputFormat::Human => output_human(message, result, args),
    }
}

fn output_json<T: Serialize>(result: &T, args: &QuarryArgs) -> Result<()> {
    let text = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };
    println!("{text}");
    Ok(())
}

fn output_human<T: Serialize>(message: &str, result: &T, args: &QuarryArgs) -> Result<()> {
    if !args.quiet {
        println!("{message}");
        println!();
    }

    let value = serde_json::to_value(result)?;
    if let Some(hits) = value.pointer("/hits/hits").and_then(Value::as_array) {
        output_hits_human(&value, hits);
    } else {
        output_generic_human(&value, 0);
    }
    Ok(())
}

fn output_hits_human(value: &Value, hits: &[Value]) {
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. {} (score: {:.3})",
            i + 1,
            hit.get("_id").and_then(Value::as_str).unwrap_or("?"),
            hit.get("_score").and_then(Value::as_f64).unwrap_or(0.0)
        );
        if let Some(source) = hit.get("_source") {
            println!("   {source}");
        }
    }
    println!();
    if let Some(total) = value.pointer("/hits/total").and_then(Value::as_u64) {
        println!("Total hits: {total}");
    }
    if let Some(took) = value.get("took").and_then(Value::as_u64) {
        println!("Search time: {took}ms");
    }
    if value.get("timed_out").and_then(Value::as_bool) == Some(true) {
        println!("Timed out: results are partial");
    }
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        println!("Error: {error}");
    }
}

fn output_generic_human(value: &Value, depth: usize) {
    let indent = "  ".repeat(depth);
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match child {
                    Value::Object(_) | Value::Array(_) => {
                        println!("{indent}{key}:");
                        output_generic_human(child, depth + 1);
                    }
                    scalar => println!("{indent}{key}: {scalar}"),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(_) | Value::Array(_) => {
                        println!("{indent}-");
                        output_generic_human(item, depth + 1);
                    }
                    scalar => println!("{indent}- {scalar}"),
                }
            }
        }
        scalar => println!("{indent}{scalar}"),
    }
}
