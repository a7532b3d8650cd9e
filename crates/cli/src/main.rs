use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use civic_core::db::{self, keys};
use civic_core::schema::{Legislator, VoteRecord};
use civic_core::{SqliteCache, SyncConfig, VoteSynchronizer};
use schemars::schema_for;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "larue")]
#[command(about = "LaRue Civic Intelligence CLI", long_about = None)]
struct Cli {
    /// Sync configuration file (TOML)
    #[arg(long, global = true, default_value = "larue.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export canonical JSON Schemas to the ./schemas directory
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },
    /// Legislator voting history
    Votes {
        #[command(subcommand)]
        command: VotesCommands,
    },
    /// Obsidian vault output
    Vault {
        #[command(subcommand)]
        command: VaultCommands,
    },
}

#[derive(Subcommand)]
enum SchemaCommands {
    /// Export JSON Schema files for canonical types
    Export {
        /// Output directory (default: ./schemas)
        #[arg(long, default_value = "schemas")]
        out_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum VotesCommands {
    /// Incrementally sync one legislator's votes and print them as JSON
    Sync(LegislatorArgs),
}

#[derive(Subcommand)]
enum VaultCommands {
    /// Write a legislator's last synced votes as a vault note
    Build {
        #[command(flatten)]
        legislator: LegislatorArgs,

        /// Vault root directory
        #[arg(long, default_value = "vault")]
        vault_dir: PathBuf,
    },
}

#[derive(Args)]
struct LegislatorArgs {
    /// Local identifier used for cache keys
    #[arg(long)]
    id: String,

    /// Display name as it appears on the roster
    #[arg(long)]
    name: String,

    /// Last name, when the display name's last word is not it
    #[arg(long)]
    last_name: Option<String>,

    /// Two-letter state code
    #[arg(long, default_value = "KY")]
    jurisdiction: String,
}

impl From<LegislatorArgs> for Legislator {
    fn from(args: LegislatorArgs) -> Self {
        Legislator {
            id: args.id,
            full_name: args.name,
            last_name: args.last_name,
            jurisdiction: args.jurisdiction.to_uppercase(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Schema { command } => match command {
            SchemaCommands::Export { out_dir } => schema_export(out_dir),
        },
        Commands::Votes { command } => match command {
            VotesCommands::Sync(args) => votes_sync(&cli.config, args.into()).await,
        },
        Commands::Vault { command } => match command {
            VaultCommands::Build {
                legislator,
                vault_dir,
            } => vault_build(&cli.config, legislator.into(), vault_dir).await,
        },
    }
}

fn schema_export(out_dir: PathBuf) -> Result<()> {
    fs::create_dir_all(&out_dir)?;

    let schemas = [
        ("VoteRecord", schema_for!(civic_core::schema::VoteRecord)),
        ("Session", schema_for!(civic_core::schema::Session)),
        ("RosterEntry", schema_for!(civic_core::schema::RosterEntry)),
        ("RollCallLedger", schema_for!(civic_core::schema::RollCallLedger)),
        ("Legislator", schema_for!(civic_core::schema::Legislator)),
    ];
    for (name, schema) in schemas {
        let json = serde_json::to_string_pretty(&schema)?;
        fs::write(out_dir.join(format!("{name}.schema.json")), json)?;
    }

    println!("Exported schemas to {}", out_dir.display());
    Ok(())
}

fn open_cache(config: &SyncConfig) -> Result<Arc<SqliteCache>> {
    Ok(Arc::new(SqliteCache::open(&config.db_path)?))
}

async fn votes_sync(config_path: &Path, legislator: Legislator) -> Result<()> {
    let config = SyncConfig::load(config_path)?;
    let cache = open_cache(&config)?;
    let synchronizer = VoteSynchronizer::from_config(&config, cache)?;

    if !synchronizer.is_enabled() {
        tracing::warn!("No API key configured (set api_key or LEGISCAN_API_KEY); votes unavailable");
    }

    match synchronizer.sync_report(&legislator).await {
        Some(report) => {
            tracing::info!(remote_calls = synchronizer.remote_calls(), "done");
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        None => {
            tracing::warn!(legislator = %legislator.id, "votes unavailable, use a fallback source");
            println!("null");
        }
    }
    Ok(())
}

async fn vault_build(config_path: &Path, legislator: Legislator, vault_dir: PathBuf) -> Result<()> {
    let config = SyncConfig::load(config_path)?;
    let cache = open_cache(&config)?;

    let mut votes = db::load::<Vec<VoteRecord>>(cache.as_ref(), &keys::votes(&legislator.id))
        .await?
        .with_context(|| format!("No synced votes for {}; run `larue votes sync` first", legislator.id))?;
    civic_core::schema::sort_votes(&mut votes);

    let note = obsidian::write_vote_note(
        &vault_dir,
        &legislator,
        &votes,
        time::OffsetDateTime::now_utc(),
    )?;
    println!("Wrote {}", note.display());
    Ok(())
}
