// crates/crucible-cli/src/main.rs
// ============================================================================
// Module: Crucible CLI Entry Point
// Description: Command dispatcher for the competition backbone.
// Purpose: Serve the API, check configuration, and hash operator tokens.
// Dependencies: clap, crucible-config, crucible-server, tokio
// ============================================================================

//! ## Overview
//! Three commands: `serve` boots the full process (API, result consumer,
//! job controller, status poller) and runs until SIGINT; `check-config`
//! validates a configuration file and exits; `hash-token` prints the
//! argon2id PHC string for a raw token so operators can seed credentials
//! out of band.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::Subcommand;
use crucible_config::CrucibleConfig;
use crucible_server::Runtime;
use crucible_server::identity::hash_token;

// ============================================================================
// SECTION: Arguments
// ============================================================================

/// Crucible competition backbone.
#[derive(Debug, Parser)]
#[command(name = "crucible", version, about = "Competition evaluation backbone")]
struct Cli {
    /// Path to the configuration file (defaults to `CRUCIBLE_CONFIG` or
    /// `crucible.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Command to run.
    #[command(subcommand)]
    command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Boot the backbone and serve the submission API.
    Serve {
        /// Listen address.
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: SocketAddr,
    },
    /// Validate the configuration file and exit.
    CheckConfig,
    /// Hash a raw API token into its argon2id storage form.
    HashToken {
        /// Raw token to hash.
        token: String,
    },
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            let _ = writeln!(std::io::stderr(), "error: {message}");
            ExitCode::FAILURE
        }
    }
}

/// Dispatches the parsed command.
fn run(cli: Cli) -> Result<(), String> {
    let load = || -> Result<CrucibleConfig, String> {
        match &cli.config {
            Some(path) => CrucibleConfig::load(path),
            None => CrucibleConfig::load_default(),
        }
        .map_err(|err| err.to_string())
    };

    match cli.command {
        Command::Serve {
            addr,
        } => {
            let config = load()?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| err.to_string())?;
            runtime.block_on(async {
                let booted = Runtime::boot(config).await.map_err(|err| err.to_string())?;
                booted.serve(addr).await.map_err(|err| err.to_string())
            })
        }
        Command::CheckConfig => {
            let config = load()?;
            let _ = writeln!(
                std::io::stdout(),
                "configuration ok: round {} with {} team(s)",
                config.round_id,
                config.teams.len()
            );
            Ok(())
        }
        Command::HashToken {
            token,
        } => {
            let hash = hash_token(&token).map_err(|err| err.to_string())?;
            let _ = writeln!(std::io::stdout(), "{hash}");
            Ok(())
        }
    }
}
