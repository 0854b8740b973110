use bountyboard_cli::{execute, Command, Session, SessionConfig};
use bountyboard_core::{Principal, StateStorageConfig};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StorageMode {
    Auto,
    Memory,
    File,
}

#[derive(Debug, Parser)]
#[command(name = "bountyboard", version, about = "Task escrow and solver staking ledger")]
struct Cli {
    /// JSON file holding tasks, audit log and vault balances.
    #[arg(long, global = true, env = "BOUNTYBOARD_STATE")]
    state: Option<PathBuf>,
    /// State persistence backend. `auto` picks file when a state path is configured.
    #[arg(long, global = true, value_enum, default_value_t = StorageMode::Auto, env = "BOUNTYBOARD_STORAGE")]
    storage: StorageMode,
    /// Principal allowed to change the penalty sink.
    #[arg(long, global = true, default_value = "bountyboard-admin", env = "BOUNTYBOARD_OWNER")]
    owner: String,
    /// Initial penalty sink. Only applied when the state is created.
    #[arg(long, global = true, env = "BOUNTYBOARD_TREASURY")]
    treasury: Option<String>,
    #[command(subcommand)]
    command: Command,
}

fn resolve_state_storage(cli: &Cli) -> anyhow::Result<StateStorageConfig> {
    let storage = match cli.storage {
        StorageMode::Memory => StateStorageConfig::Memory,
        StorageMode::File => {
            let path = cli.state.clone().ok_or_else(|| {
                anyhow::anyhow!("storage=file requires --state or BOUNTYBOARD_STATE")
            })?;
            StateStorageConfig::file(path)
        }
        StorageMode::Auto => match &cli.state {
            Some(path) => StateStorageConfig::file(path.clone()),
            None => StateStorageConfig::Memory,
        },
    };
    Ok(storage)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "bountyboard=info,info".to_string()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let storage = resolve_state_storage(&cli)?;
    if storage == StateStorageConfig::Memory && !matches!(cli.command, Command::Demo) {
        warn!("No state file configured, changes will not outlive this process");
    }
    info!(storage = storage.label(), "bountyboard starting");

    let session = Session::open(SessionConfig {
        storage,
        owner: Principal::new(cli.owner),
        treasury: cli.treasury.map(Principal::new),
    })?;

    match execute(&session, cli.command).await {
        Ok(output) => {
            println!("{output}");
            Ok(())
        }
        Err(err) if err.is_fatal() => {
            error!(error = %err, "Escrow invariant violated, aborting");
            std::process::abort();
        }
        Err(err) => Err(err.into()),
    }
}
