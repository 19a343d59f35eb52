mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use coach_common::types::TimeoutKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "coach-cli")]
#[command(about = "CodeCoach CLI - Run Python code and explain what went wrong", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a Python file in the sandbox and print the result as JSON
    Run {
        /// Python source file
        file: PathBuf,

        /// Read program input from this file
        #[arg(long, conflicts_with = "stdin")]
        stdin_file: Option<PathBuf>,

        /// Program input given inline
        #[arg(long)]
        stdin: Option<String>,

        /// Timeout in seconds (1-60)
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },

    /// Explain an error line with the local pattern rules
    Classify {
        /// Raw error text, e.g. "NameError: name 'x' is not defined"
        error: String,

        /// Treat the error as a timeout of this kind
        #[arg(long, value_enum)]
        timeout_kind: Option<TimeoutArg>,
    },

    /// List the pattern rules in priority order
    Rules,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TimeoutArg {
    Busy,
    WaitingForInput,
}

impl From<TimeoutArg> for TimeoutKind {
    fn from(arg: TimeoutArg) -> Self {
        match arg {
            TimeoutArg::Busy => TimeoutKind::Busy,
            TimeoutArg::WaitingForInput => TimeoutKind::WaitingForInput,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            stdin_file,
            stdin,
            timeout,
        } => {
            commands::run_file(&file, stdin_file.as_deref(), stdin, timeout).await?;
        }
        Commands::Classify {
            error,
            timeout_kind,
        } => {
            commands::classify(&error, timeout_kind.map(TimeoutKind::from).unwrap_or_default())?;
        }
        Commands::Rules => {
            commands::list_rules();
        }
    }

    Ok(())
}
