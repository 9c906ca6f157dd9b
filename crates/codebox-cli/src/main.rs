//! Codebox CLI
//!
//! A command-line tool for running submitted code in codebox sandboxes.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codebox::{
    Capability, Config, EXAMPLE_CONFIG, ExecutionRequest, ExecutionResult, Isolation,
    LanguageKind, Pipeline, prepare_cgroup,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "codebox")]
#[command(about = "Run submitted code in throwaway sandboxes")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: codebox.toml)
        #[arg(short, long, default_value = "codebox.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run a program (compile if needed, then execute)
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language (python, cpp, java)
        #[arg(short, long)]
        language: String,

        /// Input file fed to the program's stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Time limit in seconds
        #[arg(short, long)]
        time_limit: Option<f64>,

        /// Print the full result as JSON instead of the program's output
        #[arg(long)]
        json: bool,
    },

    /// Execute JSON-lines requests from stdin, printing one result per line
    Batch,

    /// List available languages
    Languages,

    /// Show effective configuration
    ShowConfig,
}

/// One line of `batch` input
#[derive(Debug, Deserialize)]
struct BatchRequest {
    #[serde(default)]
    id: Option<serde_json::Value>,

    #[serde(flatten)]
    request: ExecutionRequest,
}

/// One line of `batch` output
#[derive(Debug, Serialize)]
struct BatchResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<serde_json::Value>,

    #[serde(flatten)]
    result: ExecutionResult,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    // Logs go to stderr so stdout carries only program output and results
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
    } else {
        debug!("using default configuration");
    }
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    // Set up cgroup hierarchy if cgroup mode is enabled
    if config.isolation == Isolation::Isolate && config.cgroup {
        match prepare_cgroup(&config.cg_root) {
            Ok(true) => debug!("cgroup hierarchy ready"),
            Ok(false) => {
                warn!(
                    "cgroup support unavailable (memory controller not found), falling back to RLIMIT_AS"
                );
                config.cgroup = false;
            }
            Err(e) => {
                warn!("cgroup setup failed: {e}, falling back to RLIMIT_AS memory limiting");
                config.cgroup = false;
            }
        }
    }

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Run {
            source,
            language,
            input,
            time_limit,
            json,
        } => {
            run_single(
                config,
                &source,
                &language,
                input.as_deref(),
                time_limit,
                json,
            )
            .await
        }
        Commands::Batch => run_batch(Pipeline::new(config)).await,
        Commands::Languages => {
            list_languages(&config);
            Ok(())
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

async fn run_single(
    config: Config,
    source: &Path,
    language: &str,
    input: Option<&Path>,
    time_limit: Option<f64>,
    json: bool,
) -> Result<()> {
    let source_code = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    let time_limit = match time_limit {
        Some(secs) => Duration::try_from_secs_f64(secs)
            .with_context(|| format!("invalid time limit: {secs}"))?,
        None => config.default_run_time_limit(),
    };

    let mut request = ExecutionRequest::new(source_code, language).with_time_limit(time_limit);
    if let Some(input_path) = input {
        let stdin = tokio::fs::read_to_string(input_path)
            .await
            .context("failed to read input file")?;
        request = request.with_stdin(stdin);
    }

    info!(language, ?time_limit, "running program");
    let result = Pipeline::new(config).execute(request).await;

    if json {
        println!(
            "{}",
            serde_json::to_string(&result).context("failed to serialize result")?
        );
    } else {
        print!("{}", result.stdout);
        if !result.stderr.is_empty() {
            eprint!("{}", result.stderr);
        }
        info!(
            status = %result.status,
            wall_time = format_args!("{:.3}s", result.wall_time.as_secs_f64()),
            exit_code = result.exit_code,
            signal = result.signal,
            truncated = result.is_truncated(),
            message = result.message.as_deref(),
            "execution result"
        );
    }

    if result.is_success() {
        Ok(())
    } else {
        // process::exit skips the stdout flush
        std::io::stdout().flush().context("failed to flush stdout")?;
        std::process::exit(1);
    }
}

/// Read requests until EOF, running them concurrently and printing each
/// result as soon as it is ready
async fn run_batch(pipeline: Pipeline) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();
    let mut input_open = true;
    let mut completed = 0usize;

    while input_open || !tasks.is_empty() {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                match line.context("failed to read batch input")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        let pipeline = pipeline.clone();
                        tasks.spawn(async move { handle_line(&pipeline, &line).await });
                    }
                    None => input_open = false,
                }
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                let response = joined.context("batch task panicked")?;
                println!(
                    "{}",
                    serde_json::to_string(&response).context("failed to serialize result")?
                );
                completed += 1;
            }
        }
    }

    info!(completed, "batch finished");
    Ok(())
}

async fn handle_line(pipeline: &Pipeline, line: &str) -> BatchResponse {
    match parse_batch_line(line) {
        Ok(BatchRequest { id, request }) => BatchResponse {
            id,
            result: pipeline.execute(request).await,
        },
        Err(e) => {
            warn!(error = %e, "invalid batch request");
            BatchResponse {
                id: None,
                result: ExecutionResult::internal_error(format!("invalid request: {e}")),
            }
        }
    }
}

fn parse_batch_line(line: &str) -> serde_json::Result<BatchRequest> {
    serde_json::from_str(line)
}

fn list_languages(config: &Config) {
    println!("Available languages:\n");

    for kind in LanguageKind::ALL {
        let Ok(lang) = config.language(kind) else {
            continue;
        };
        let lang_type = match kind.capability() {
            Capability::Interpreted => "interpreted",
            Capability::Compiled => "compiled",
        };
        println!(
            "  {:<8} {:<20} {:<12} source file: {}",
            kind.id(),
            lang.name,
            lang_type,
            lang.source_name()
        );
    }
}

fn show_config(config: &Config) {
    println!("Isolation: {:?}", config.isolation);
    println!("Workspace root: {}", config.workspace_root().display());
    println!("Max concurrency: {}", config.max_concurrency);
    println!(
        "Time limit: {}s (max {}s)",
        config.default_time_limit, config.max_time_limit
    );
    println!();
    println!("Default resource limits:");
    println!("  CPU time limit: {:?}", config.default_limits.time_limit);
    println!(
        "  Memory limit: {:?} KB",
        config.default_limits.memory_limit
    );
    println!("  Stack limit: {:?} KB", config.default_limits.stack_limit);
    println!("  Max output: {:?} KB", config.default_limits.max_output);
    println!(
        "  Max open files: {:?}",
        config.default_limits.max_open_files
    );
    println!();
    println!("Compile limits:");
    println!(
        "  Wall time limit: {:?}",
        config.compile_limits.wall_time_limit
    );
    println!(
        "  Memory limit: {:?} KB",
        config.compile_limits.memory_limit
    );
    if config.isolation == Isolation::Isolate {
        println!();
        println!("Isolate binary: {}", config.isolate_binary().display());
        println!("Cgroup: {}", config.cgroup);
    }
    println!();
    println!("Languages configured: {}", config.languages.len());
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
