//! sourcelock: claim and release shared source paths in real time.

mod commands;
mod ui;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

use sourcelock::ledger::RootPath;

#[derive(Parser, Debug)]
#[command(name = "sourcelock")]
#[command(version, about = "Claim and release shared source paths", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.sourcelock/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in under a name (2-20 characters)
    Login { name: String },
    /// Forget the local session
    Logout,
    /// Show the logged-in name
    Whoami,
    /// Add a source path
    Add {
        /// Top-level namespace: sysadmin, www, or amp_set
        #[arg(long)]
        root: RootPath,
        /// Path below the root, e.g. `admin/login.php`
        subpath: String,
    },
    /// List sources, your own first
    List {
        /// Only show paths containing this text
        #[arg(long, short)]
        search: Option<String>,
    },
    /// Claim a source, or release it if you already hold it
    Check { id: String },
    /// Release a source you hold
    Release { id: String },
    /// Hand a source you hold to someone else
    Handoff { id: String, to: String },
    /// Delete a source, whoever holds it
    Delete { id: String },
    /// Follow the ledger live until Ctrl-C
    Watch {
        /// Only show paths containing this text
        #[arg(long, short)]
        search: Option<String>,
    },
}

fn init_stdout_logging(format: LogFormat) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_stdout_logging(cli.log_format);

    match commands::execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ui::print_failure(&e);
            ExitCode::FAILURE
        },
    }
}
