use anyhow::{Context, Result};
use clap::Parser;
use memory_calculator::calculator::Calculator;
use memory_calculator::cli::{CalculatorArgs, Cli, Commands, OutputFormat};
use memory_calculator::config::{CalculatorConfig, resolve_calculator_path, resolve_config_path};
use memory_calculator::count::count_classes;
use memory_calculator::invocation::{
    CALCULATED_MEMORY_OPTS, InvocationSpec, memory_calculation_command, qualify_path,
    resolve_class_count,
};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();
    let Cli {
        command,
        config: config_path,
    } = Cli::parse();

    match command {
        Commands::Count { roots, format } => {
            let results = count_roots(&roots)?;
            write_count_output(&results, format)?;
        }
        Commands::Invocation {
            target,
            relative_to,
            export,
        } => {
            let config = load_config(config_path.as_deref())?;
            let spec = build_spec(&config, &target, relative_to.as_deref())?;
            let invocation = spec.render();
            if export {
                println!("{}", memory_calculation_command(&invocation));
                println!("export JAVA_OPTS=\"$JAVA_OPTS {CALCULATED_MEMORY_OPTS}\"");
            } else {
                println!("{invocation}");
            }
        }
        Commands::Run { target } => {
            let config = load_config(config_path.as_deref())?;
            let spec = build_spec(&config, &target, None)?;
            let settings = Calculator::new().show_settings(&spec.render())?;
            if let Some(diagnostics) = settings.diagnostics {
                eprintln!("       {diagnostics}");
            }
            println!("       Memory Settings: {}", settings.settings);
        }
    }

    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "memory_calculator=warn".into()),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(flag: Option<&Path>) -> Result<CalculatorConfig> {
    let path = resolve_config_path(flag);
    CalculatorConfig::load(path.as_deref()).context("Failed to load memory calculator config")
}

fn build_spec(
    config: &CalculatorConfig,
    target: &CalculatorArgs,
    relative_to: Option<&Path>,
) -> Result<InvocationSpec> {
    let calculator = resolve_calculator_path(target)?;
    let executable = match relative_to {
        Some(root) => qualify_path(&calculator, root),
        None => calculator.display().to_string(),
    };

    let class_count = resolve_class_count(config, &target.root).with_context(|| {
        format!("Failed to count classes under {}", target.root.display())
    })?;

    Ok(InvocationSpec::new(
        executable,
        target.total_memory.clone(),
        config,
        class_count,
    ))
}

#[derive(Debug, Serialize)]
struct CountResult {
    root: String,
    loaded_classes: u64,
    duration_ms: u64,
}

fn count_roots(roots: &[PathBuf]) -> Result<Vec<CountResult>> {
    roots
        .par_iter()
        .map(|root| -> Result<CountResult> {
            let start = Instant::now();
            let loaded_classes = count_classes(root)
                .with_context(|| format!("Failed to count classes under {}", root.display()))?;
            Ok(CountResult {
                root: root.to_string_lossy().to_string(),
                loaded_classes,
                duration_ms: start.elapsed().as_millis() as u64,
            })
        })
        .collect()
}

fn write_count_output(results: &[CountResult], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(results)?),
        OutputFormat::Text => {
            for r in results {
                println!("{}\t{}", r.loaded_classes, r.root);
            }
        }
    }
    Ok(())
}
