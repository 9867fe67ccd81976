//! mlir-agent
//!
//! Compiler tooling for agents: traces how an MLIR operation evolves across
//! a pass pipeline and wraps the build, compile and FileCheck tools.

mod config;
mod mlir;
mod provenance;
mod tools;
mod utils;

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use log::warn;
use serde::Serialize;

use config::ToolConfig;
use provenance::{StrategyKind, TraceOptions};
use tools::{Builder, Compiler, Verifier};

/// mlir-agent
#[derive(Parser, Debug)]
#[command(name = "mlir-agent")]
#[command(author = "Z1529")]
#[command(version = "0.1.0")]
#[command(about = "Provenance tracing and compiler tool wrappers for MLIR pipelines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Trace an operation through the saved pass history
    Trace {
        /// Source file name as it appears in `loc(...)`
        filename: String,

        /// Source line
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        line: u32,

        /// Artifacts directory holding `ir_pass_history`
        #[arg(long, value_name = "DIR")]
        root: PathBuf,

        #[arg(long, value_enum, default_value_t = StrategyKind::Structural)]
        strategy: StrategyKind,

        /// Also write the report here
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Stop after this many seconds and report what was found
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Build the compiler with ninja
    Build {
        #[arg(long, default_value = "install")]
        target: String,

        /// Only build the LLVM tools
        #[arg(long)]
        fast: bool,

        #[arg(long)]
        clean: bool,

        /// Wipe the install dir and rerun CMake
        #[arg(long)]
        reconfigure: bool,
    },
    /// Compile an MLIR file with iree-compile
    Compile {
        input: PathBuf,

        /// Give up on iree-compile after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,

        /// Extra iree-compile flags
        #[arg(last = true)]
        flags: Vec<String>,
    },
    /// Check an MLIR file with FileCheck
    Verify {
        input: PathBuf,
        check_file: PathBuf,
    },
    /// Print the resolved tool paths
    Config,
    /// Print version information
    Version,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Trace { filename, line, root, strategy, output, timeout_secs } => {
            run_trace(&root, &filename, line, strategy, output.as_deref(), timeout_secs)
        }
        Commands::Build { target, fast, clean, reconfigure } => {
            let builder = Builder::new(load_config());
            print_json(&builder.run_build(&target, fast, clean, reconfigure))
        }
        Commands::Compile { input, timeout_secs, flags } => {
            run_compile(&input, &flags, Duration::from_secs(timeout_secs))
        }
        Commands::Verify { input, check_file } => run_verify(&input, &check_file),
        Commands::Config => print_json(&load_config()),
        Commands::Version => {
            println!("mlir-agent 0.1.0");
            println!("MLIR provenance tracing and tool wrappers");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn load_config() -> ToolConfig {
    let config = ToolConfig::from_env();
    for warning in config.validate() {
        warn!("{}", warning);
    }
    config
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_trace(
    root: &Path,
    filename: &str,
    line: u32,
    strategy: StrategyKind,
    output: Option<&Path>,
    timeout_secs: Option<u64>,
) -> anyhow::Result<()> {
    let options = TraceOptions {
        deadline: timeout_secs.map(|secs| Instant::now() + Duration::from_secs(secs)),
    };
    let report = provenance::trace(root, filename, line, strategy, options);
    let json = report.to_json()?;
    println!("{}", json);

    if let Some(path) = output {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(path, &json).with_context(|| format!("writing {}", path.display()))?;
    }

    if report.is_error() {
        process::exit(1);
    }
    Ok(())
}

fn run_compile(input: &Path, flags: &[String], timeout: Duration) -> anyhow::Result<()> {
    let ir_text =
        fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let result = Compiler::new(load_config()).with_timeout(timeout).run_compile(&ir_text, flags)?;
    print_json(&result)
}

fn run_verify(input: &Path, check_file: &Path) -> anyhow::Result<()> {
    let ir_text =
        fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let checks = fs::read_to_string(check_file)
        .with_context(|| format!("reading {}", check_file.display()))?;
    let result = Verifier::new(load_config()).verify(&ir_text, &checks)?;
    print_json(&result)
}
