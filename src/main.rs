//! Diagram sandbox - run generated diagram code and serve the images.
//!
//! Usage:
//!   diagram-sandbox serve [--port 8000]          # Start HTTP server
//!   diagram-sandbox --run <file> [--edited]      # Run one source file and print the outcome

use clap::{Parser, Subcommand};
use diagram_sandbox::config::{Settings, SettingsArgs};
use diagram_sandbox::state::AppState;
use diagram_sandbox::{http_server, retention, JobStatus, LifecycleManager};
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "diagram-sandbox")]
#[command(about = "Runs generated diagram code in throwaway workspaces")]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Run a single source file and print the outcome as JSON
    #[arg(long)]
    run: Option<PathBuf>,

    /// With --run, use the edited pool instead of the generated one
    #[arg(long, requires = "run")]
    edited: bool,

    #[command(flatten)]
    settings: SettingsArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(long, env = "PORT", default_value = "8000")]
        port: u16,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let settings = Settings::from(args.settings);
    if let Err(e) = settings.validate() {
        eprintln!("Error: {}", e);
        exit(1);
    }

    match (args.command, args.run) {
        (Some(Commands::Serve { port }), _) => {
            let state = AppState::new(settings);
            // Detached: they die with the runtime and are never awaited.
            let _sweepers = retention::spawn_sweepers(&state.settings);
            if let Err(e) = http_server::run_server(port, state).await {
                error!("Server error: {}", e);
                exit(1);
            }
        }
        (None, Some(file)) => {
            let code = match tokio::fs::read_to_string(&file).await {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("Error: cannot read {}: {}", file.display(), e);
                    exit(1);
                }
            };
            let lifecycle = LifecycleManager::new(Arc::new(settings));
            let outcome = if args.edited {
                lifecycle.rerun_edited_code(&code).await
            } else {
                lifecycle.run_generated_code(&code).await
            };
            match outcome {
                Ok(outcome) => {
                    info!(workspace = ?outcome.workspace_path, "Workspace kept until the next sweep");
                    match serde_json::to_string_pretty(&outcome) {
                        Ok(json) => println!("{}", json),
                        Err(e) => {
                            eprintln!("Error: {}", e);
                            exit(1);
                        }
                    }
                    if outcome.status != JobStatus::Completed {
                        exit(2);
                    }
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    exit(1);
                }
            }
        }
        (None, None) => {
            eprintln!("Error: Use 'serve' subcommand or --run <file>");
            exit(1);
        }
    }
}
