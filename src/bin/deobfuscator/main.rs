use std::env;
use std::fs;
use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use js_deobfuscator::Deobfuscator;

// Deobfuscates a JavaScript file and writes the result next to a progress
// report. Warnings (a pool that couldn't be extracted, decoders that didn't
// resolve) go to stderr and don't affect the exit code.
fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().collect();
    let json = args.iter().any(|a| a == "--json");
    let mut paths = args.iter().skip(1).filter(|a| *a != "--json");
    let (input, output) = match (paths.next(), paths.next()) {
        (Some(input), Some(output)) => (input.clone(), output.clone()),
        _ => {
            println!("Usage: deobfuscator <input_file> <output_file> [--json]");
            println!("Example: deobfuscator obfuscated_script.js deobfuscated_script.js");
            return ExitCode::FAILURE;
        }
    };

    if !Path::new(&input).exists() {
        eprintln!("Error: input file '{}' not found", input);
        return ExitCode::FAILURE;
    }

    match run(&input, &output, json) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(input: &str, output: &str, json: bool) -> anyhow::Result<()> {
    let source = fs::read_to_string(input)
        .with_context(|| format!("failed to read '{}'", input))?;
    println!("Read {} bytes from {}", source.len(), input);

    let result = Deobfuscator::new().run(&source);
    for stage in &result.report.stages {
        println!(
            "{:<20} {:>8} -> {:>8} bytes ({} rewrites)",
            stage.stage, stage.bytes_before, stage.bytes_after, stage.rewrites
        );
    }
    println!("Recovered {} pool entries", result.report.pool_entries);
    if result.report.decoders_resolved {
        println!("Decoder functions resolved");
    }

    fs::write(output, &result.code)
        .with_context(|| format!("failed to write '{}'", output))?;
    println!("Wrote {} bytes to {}", result.code.len(), output);
    println!("Reduction: {:.2}%", result.report.reduction_percent());

    if json {
        println!("{}", serde_json::to_string_pretty(&result.report)?);
    }
    Ok(())
}
