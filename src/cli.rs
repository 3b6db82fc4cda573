use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::invocation::DEFAULT_TOTAL_MEMORY;

#[derive(Debug, Clone, Parser)]
#[command(name = "memory-calculator")]
#[command(about = "Count the classes a JVM application loads and build the memory calculator invocation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Count class files under one or more application roots, archives included
    Count {
        #[arg(required = true, value_name = "DIR")]
        roots: Vec<PathBuf>,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Print the memory calculator invocation for an application
    Invocation {
        #[command(flatten)]
        target: CalculatorArgs,

        /// Render the calculator path as `$PWD/...` relative to this directory
        #[arg(long, value_name = "DIR")]
        relative_to: Option<PathBuf>,

        /// Print shell lines assigning CALCULATED_MEMORY and extending JAVA_OPTS
        #[arg(long)]
        export: bool,
    },
    /// Run the memory calculator and show the settings it reports
    Run {
        #[command(flatten)]
        target: CalculatorArgs,
    },
}

#[derive(Debug, Clone, Args)]
pub struct CalculatorArgs {
    #[arg(long, value_name = "DIR")]
    pub root: PathBuf,

    #[arg(long, value_name = "FILE")]
    pub calculator: Option<PathBuf>,

    /// Directory holding `bin/java-buildpack-memory-calculator-<VER>`
    #[arg(long, value_name = "DIR", requires = "calculator_version")]
    pub sandbox: Option<PathBuf>,

    #[arg(long, value_name = "VER")]
    pub calculator_version: Option<String>,

    #[arg(long, value_name = "TOKEN", default_value = DEFAULT_TOTAL_MEMORY)]
    pub total_memory: String,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}
