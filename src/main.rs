// ABOUTME: Entry point for the gatekeep binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and dispatches import/export/validate operations.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use gatekeep_core::codec;
use gatekeep_store::{Exporter, Importer, SqliteStore};

#[derive(Parser)]
#[command(name = "gatekeep", version, about = "Move resource group configurations between JSON documents and a relational store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a resource groups JSON document into the database, replacing
    /// the target environment's configuration
    Import {
        /// Path to the resource groups database
        #[arg(long)]
        db: PathBuf,
        /// JSON file with the resource groups schema to load
        #[arg(long)]
        json: PathBuf,
        /// Environment whose resource groups are replaced
        #[arg(long, default_value = "test")]
        environment: String,
    },
    /// Write an environment's stored resource groups out as a JSON document
    Export {
        /// Path to the resource groups database
        #[arg(long)]
        db: PathBuf,
        /// Path to write the JSON document to
        #[arg(long)]
        output: PathBuf,
        /// Environment whose resource groups are exported
        #[arg(long, default_value = "test")]
        environment: String,
    },
    /// Check a resource groups JSON document without touching any database
    Validate {
        /// JSON file with the resource groups schema to validate
        #[arg(long)]
        json: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatekeep=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Import {
            db,
            json,
            environment,
        } => {
            tracing::info!("environment to update resource groups for: {}", environment);
            tracing::info!("input JSON file: {}", json.display());
            let spec = codec::parse_file(&json)?;
            let mut store = SqliteStore::open(&db)?;
            Importer::new(&mut store).import(&spec, &environment)?;
            tracing::info!("resource groups loaded successfully");
        }
        Command::Export {
            db,
            output,
            environment,
        } => {
            tracing::info!("environment to list resource groups for: {}", environment);
            let mut store = SqliteStore::open(&db)?;
            let spec = Exporter::new(&mut store).export(&environment)?;
            let document = codec::to_json(&spec)?;
            fs::write(&output, document)
                .with_context(|| format!("writing {}", output.display()))?;
            tracing::info!("resource groups written to {}", output.display());
        }
        Command::Validate { json } => {
            tracing::info!("JSON file to validate: {}", json.display());
            codec::validate(&json)?;
            tracing::info!("resource groups JSON file is valid");
        }
    }
    Ok(())
}
