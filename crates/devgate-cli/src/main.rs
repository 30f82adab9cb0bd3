#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use devgate_core::Config;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "devgate")]
#[command(author, version, about = "A dev server for Vite-style projects, with API proxying", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Start the dev server
    Dev {
        /// Port to listen on (overrides `server.port`)
        #[arg(long, short = 'p')]
        port: Option<u16>,

        /// Host to bind to (overrides `server.host`)
        #[arg(long)]
        host: Option<String>,

        /// Open browser automatically
        #[arg(long)]
        open: bool,

        /// Path to config file (overrides auto-discovery)
        #[arg(long, short = 'c', value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Print the resolved dev server configuration
    Config {
        /// Path to config file (overrides auto-discovery)
        #[arg(long, short = 'c', value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Resolve an import specifier through `resolve.alias`
    Resolve {
        /// Specifier to resolve (e.g., "@/components/App.vue")
        specifier: String,

        /// Path to config file (overrides auto-discovery)
        #[arg(long, short = 'c', value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine working directory
    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::new(cwd.clone())
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);

    logging::init(config.verbosity, config.json_logs);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(cli.json),
        Some(Commands::Dev {
            port,
            host,
            open,
            config: config_file,
        }) => {
            let action = commands::dev::DevAction {
                cwd,
                port,
                host,
                open,
                config: config_file,
                json: cli.json,
            };

            let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
            rt.block_on(commands::dev::run(action))
        }
        Some(Commands::Config {
            config: config_file,
        }) => {
            let span = tracing::info_span!("config", cmd = "config", cwd = %cwd.display());
            let _guard = span.enter();
            commands::config::run(&cwd, config_file.as_deref(), cli.json)
        }
        Some(Commands::Resolve {
            specifier,
            config: config_file,
        }) => {
            let span = tracing::info_span!("resolve", cmd = "resolve", cwd = %cwd.display());
            let _guard = span.enter();
            commands::resolve::run(&cwd, &specifier, config_file.as_deref(), cli.json)
        }
    }
}
