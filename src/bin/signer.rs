//! Signer service CLI.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sentinel_signer::domain::hash256_from_hex;
use sentinel_signer::server::{self, Config, PruningConfig, ServiceMode};
use sentinel_signer::signing::CommitBoostParameters;
use sentinel_signer::slashing::{
    export_interchange, import_interchange, open_database, InterchangeDocument, SlashingProtection,
};

#[derive(Debug, Parser)]
#[command(name = "signer", version, about = "Remote signing service for Ethereum validators")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the execution-layer signing service
    Eth1(Eth1Args),
    /// Run the consensus-layer signing service
    Eth2(Eth2Args),
    /// Export the slashing-protection database as EIP-3076 interchange JSON
    Export(ExportArgs),
    /// Import an EIP-3076 interchange JSON document
    Import(ImportArgs),
    /// Inspect or set the slashing-protection high watermark
    WatermarkRepair(WatermarkArgs),
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// Directory of per-key YAML metadata files
    #[arg(long, value_name = "PATH")]
    key_store_path: PathBuf,

    /// Listen address
    #[arg(long, default_value = "0.0.0.0:9000", value_name = "ADDR")]
    listen_address: SocketAddr,
}

#[derive(Debug, Args)]
struct Eth1Args {
    #[command(flatten)]
    common: CommonArgs,

    /// EIP-155 chain id folded into signature header bytes
    #[arg(long, value_name = "ID")]
    chain_id: Option<u64>,
}

#[derive(Debug, Args)]
struct Eth2Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Slashing-protection database URL (sqlite)
    #[arg(long, value_name = "URL")]
    slashing_protection_db_url: Option<String>,

    /// Enable periodic pruning of the slashing-protection database
    #[arg(long, default_value_t = false)]
    slashing_protection_pruning_enabled: bool,

    /// Epochs of history to keep when pruning
    #[arg(long, default_value_t = 250, value_name = "EPOCHS")]
    slashing_protection_pruning_epochs_to_keep: u64,

    /// Slots per epoch used to convert the pruning horizon for blocks
    #[arg(long, default_value_t = 32, value_name = "SLOTS")]
    slashing_protection_pruning_slots_per_epoch: u64,

    /// Hours between pruning passes
    #[arg(long, default_value_t = 24, value_name = "HOURS")]
    slashing_protection_pruning_interval: u64,

    /// Enable the Ethereum key-manager API
    #[arg(long, default_value_t = false)]
    key_manager_api_enabled: bool,

    /// Enable the Commit-Boost API
    #[arg(long, default_value_t = false)]
    commit_boost_api_enabled: bool,

    /// Directory for Commit-Boost proxy keystores
    #[arg(long, value_name = "PATH")]
    proxy_keystores_path: Option<PathBuf>,

    /// Shared password file for Commit-Boost proxy keystores
    #[arg(long, value_name = "FILE")]
    proxy_keystores_password_file: Option<PathBuf>,

    /// Genesis validators root of the target network
    #[arg(long, value_name = "HEX")]
    genesis_validators_root: Option<String>,

    /// Genesis fork version of the target network
    #[arg(long, default_value = "0x00000000", value_name = "HEX")]
    genesis_fork_version: String,
}

#[derive(Debug, Args)]
struct DbArgs {
    /// Slashing-protection database URL (sqlite)
    #[arg(long, value_name = "URL")]
    slashing_protection_db_url: String,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[command(flatten)]
    db: DbArgs,

    /// Output file (stdout when omitted)
    #[arg(long, value_name = "FILE")]
    to: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[command(flatten)]
    db: DbArgs,

    /// Interchange JSON file to import
    #[arg(long, value_name = "FILE")]
    from: PathBuf,
}

#[derive(Debug, Args)]
struct WatermarkArgs {
    #[command(flatten)]
    db: DbArgs,

    /// High-watermark slot
    #[arg(long, requires = "epoch", value_name = "SLOT")]
    slot: Option<u64>,

    /// High-watermark epoch
    #[arg(long, requires = "slot", value_name = "EPOCH")]
    epoch: Option<u64>,

    /// Remove the high watermark instead of setting it
    #[arg(long, conflicts_with_all = ["slot", "epoch"], default_value_t = false)]
    remove: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new().expect("build tokio runtime");
    match runtime.block_on(run(cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Eth1(args) => {
            let mut config = Config::new(ServiceMode::Eth1, args.common.key_store_path);
            config.listen_addr = args.common.listen_address;
            config.chain_id = args.chain_id;
            server::run(config, server::default_connectors()).await?;
            Ok(())
        }
        Command::Eth2(args) => {
            let mut config = Config::new(ServiceMode::Eth2, args.common.key_store_path);
            config.listen_addr = args.common.listen_address;
            config.slashing_db_url = args.slashing_protection_db_url;
            config.key_manager_api_enabled = args.key_manager_api_enabled;
            config.pruning = PruningConfig {
                enabled: args.slashing_protection_pruning_enabled,
                epochs_to_keep: args.slashing_protection_pruning_epochs_to_keep,
                slots_per_epoch: args.slashing_protection_pruning_slots_per_epoch,
                interval_hours: args.slashing_protection_pruning_interval,
            };

            if let Some(raw) = &args.genesis_validators_root {
                let gvr = hash256_from_hex(raw)
                    .map_err(|e| anyhow::anyhow!("--genesis-validators-root: {e}"))?;
                config.genesis_validators_root = Some(gvr);
            }
            let fork_version = hex::decode(
                args.genesis_fork_version
                    .strip_prefix("0x")
                    .unwrap_or(args.genesis_fork_version.as_str()),
            )
            .map_err(|e| anyhow::anyhow!("--genesis-fork-version: {e}"))?;
            config.genesis_fork_version = fork_version
                .try_into()
                .map_err(|_| anyhow::anyhow!("--genesis-fork-version must be 4 bytes"))?;

            if config.slashing_db_url.is_some() && config.genesis_validators_root.is_none() {
                anyhow::bail!("slashing protection requires --genesis-validators-root");
            }

            if args.commit_boost_api_enabled {
                let (Some(path), Some(password_file)) = (
                    args.proxy_keystores_path,
                    args.proxy_keystores_password_file,
                ) else {
                    anyhow::bail!(
                        "--commit-boost-api-enabled requires --proxy-keystores-path and \
                         --proxy-keystores-password-file"
                    );
                };
                config.commit_boost = Some(CommitBoostParameters {
                    proxy_keystores_path: path,
                    proxy_keystores_password_file: password_file,
                    genesis_fork_version: config.genesis_fork_version,
                });
            }

            server::run(config, server::default_connectors()).await?;
            Ok(())
        }
        Command::Export(args) => {
            let pool = open_database(&args.db.slashing_protection_db_url).await?;
            let document = export_interchange(&pool).await?;
            let json = serde_json::to_string_pretty(&document)?;
            match args.to {
                Some(path) => std::fs::write(&path, json)?,
                None => println!("{json}"),
            }
            Ok(())
        }
        Command::Import(args) => {
            let pool = open_database(&args.db.slashing_protection_db_url).await?;
            let raw = std::fs::read_to_string(&args.from)?;
            let document: InterchangeDocument = serde_json::from_str(&raw)?;
            let report = import_interchange(&pool, &document).await?;
            info!(
                validators = report.validators,
                blocks = report.imported_blocks,
                attestations = report.imported_attestations,
                errors = report.errors,
                "import finished"
            );
            Ok(())
        }
        Command::WatermarkRepair(args) => {
            let pool = open_database(&args.db.slashing_protection_db_url).await?;
            let store = SlashingProtection::new(pool);
            if args.remove {
                store.delete_high_watermark().await?;
                info!("high watermark removed");
            } else if let (Some(slot), Some(epoch)) = (args.slot, args.epoch) {
                let rows = store.set_high_watermark(slot, epoch).await?;
                if rows == 0 {
                    anyhow::bail!(
                        "high watermark not set: the database has no genesis validators root"
                    );
                }
                info!(slot, epoch, "high watermark set");
            } else {
                match store.high_watermark().await? {
                    Some(watermark) => info!(
                        slot = watermark.slot,
                        epoch = watermark.epoch,
                        "current high watermark"
                    ),
                    None => info!("no high watermark set"),
                }
            }
            Ok(())
        }
    }
}
