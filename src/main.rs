//! graph-relay - Relay raw EML messages through Microsoft Graph
//!
//! Main entry point for the graph-relay CLI.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use graph_relay::config::{validate_config, RelayConfig};
use graph_relay::graph::{with_retry, RetryConfig};
use graph_relay::relay::SendOutcome;
use graph_relay::RelayService;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

/// Wait before the first resubmission of a failed message
const RESUBMIT_BACKOFF: Duration = Duration::from_secs(5);

/// graph-relay - Send EML files through the Microsoft Graph sendMail API
#[derive(Parser, Debug)]
#[command(name = "graph-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/graph-relay/config.yaml)
    #[arg(short, long, env = "GRAPH_RELAY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Relay one or more EML files
    Send {
        /// Messages to send
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Resubmit messages whose failure may be transient, up to N times
        #[arg(long, default_value_t = 0)]
        resubmit: u32,
    },

    /// Print the sender address found in a message
    Sender {
        /// Message to inspect
        file: PathBuf,
    },

    /// Load and validate the configuration
    CheckConfig,

    /// Request an access token and report its lifetime
    Token,
}

fn main() {
    // Initialize logging
    if let Err(e) = graph_relay::logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    match cli.command {
        Commands::Sender { ref file } => runtime.block_on(print_sender(file)),
        Commands::CheckConfig => check_config(cli.config.as_deref()),
        Commands::Token => {
            let config = load_config(cli.config.as_deref())?;
            let service = RelayService::from_config(&config)?;
            runtime.block_on(async {
                let token = service.tokens().acquire().await?;
                println!("Token acquired, expires in {}s", token.expires_in().as_secs());
                Ok::<_, anyhow::Error>(())
            })
        }
        Commands::Send {
            ref files,
            resubmit,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let service = RelayService::from_config(&config)?;
            let outcomes = runtime.block_on(send_files(&service, files, resubmit));
            report(&outcomes)
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RelayConfig> {
    let config = match path {
        Some(path) => RelayConfig::load(path)?,
        None => RelayConfig::load_default().with_context(|| {
            format!(
                "No configuration found. Create {} or pass --config",
                RelayConfig::default_path().display()
            )
        })?,
    };
    Ok(config)
}

fn check_config(path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(path)?;

    match validate_config(&config) {
        Ok(()) => {
            println!("Configuration OK");
            if config.auth.client_id.is_none() {
                println!("  (no application identity configured)");
            }
            Ok(())
        }
        Err(errors) => {
            for error in &errors {
                println!("  - {}", error);
            }
            Err(anyhow!("{} configuration problem(s)", errors.len()))
        }
    }
}

async fn print_sender(file: &Path) -> anyhow::Result<()> {
    let sender = eml::extract_sender(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    match sender {
        Some(sender) => {
            println!("{}", sender);
            Ok(())
        }
        None => Err(anyhow!("No sender address found in {}", file.display())),
    }
}

async fn send_files(service: &RelayService, files: &[PathBuf], resubmit: u32) -> Vec<SendOutcome> {
    if resubmit == 0 {
        return service.send_all(files).await;
    }

    let policy = RetryConfig {
        max_retries: resubmit,
        initial_backoff: RESUBMIT_BACKOFF,
        max_backoff: Some(Duration::from_secs(60)),
    };
    let policy = &policy;

    join_all(files.iter().map(|path| async move {
        let operation = format!("send {}", path.display());
        let result = with_retry(policy, &operation, |_| service.send_message(path)).await;
        (path.clone(), result)
    }))
    .await
}

fn report(outcomes: &[SendOutcome]) -> anyhow::Result<()> {
    let mut failed = 0;

    for (path, result) in outcomes {
        if let Err(e) = result {
            failed += 1;
            tracing::error!(
                path = %path.display(),
                permanent = e.is_permanent(),
                "Send failed: {}",
                e
            );
            eprintln!(
                "{}: {}{}",
                path.display(),
                e,
                if e.is_permanent() { " (permanent)" } else { "" }
            );
        }
    }

    if failed > 0 {
        return Err(anyhow!("{} of {} message(s) failed", failed, outcomes.len()));
    }
    Ok(())
}
