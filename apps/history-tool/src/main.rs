//! CLI tool for persisted history.
//!
//! Provides commands for:
//! - Printing the history chain of a row
//! - Verifying every chain and payload
//! - Rolling a row back and persisting the result

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use history_core::persistence::PersistenceManager;
use history_core::{verify_chain, HistoryConfig, HistoryLog, HistoryRecord, RollbackOutcome};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the history tool.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the history chain of one row
    History {
        /// Data directory of the persisted database
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,

        /// Table name
        #[arg(long)]
        table: String,

        /// Row id (comma-joined key values)
        #[arg(long)]
        row: String,
    },
    /// Check parent links and payloads of every history record
    Verify {
        /// Data directory of the persisted database
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
    },
    /// Roll a row back to a captured state and save
    Rollback {
        /// Data directory of the persisted database
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,

        /// Entity type name
        #[arg(long)]
        entity: String,

        /// Row id (comma-joined key values)
        #[arg(long)]
        row: String,

        /// History record to roll back to; the latest when omitted
        #[arg(long)]
        id: Option<i64>,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(e) = run(args.command) {
        tracing::error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}

fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::History {
            data_dir,
            table,
            row,
        } => {
            for line in history(&data_dir, &table, &row)? {
                println!("{}", line);
            }
            Ok(())
        }
        Command::Verify { data_dir } => {
            let problems = verify(&data_dir)?;
            if problems.is_empty() {
                println!("history is consistent");
                return Ok(());
            }
            for problem in &problems {
                println!("{}", problem);
            }
            bail!("{} problem(s) found", problems.len())
        }
        Command::Rollback {
            data_dir,
            entity,
            row,
            id,
        } => {
            println!("{}", rollback(&data_dir, &entity, &row, id)?);
            Ok(())
        }
    }
}

fn open(data_dir: &Path) -> anyhow::Result<(PersistenceManager, history_core::Database)> {
    let config = HistoryConfig {
        data_dir: data_dir.to_path_buf(),
        ..Default::default()
    };
    let persistence = PersistenceManager::new(&config);
    let db = persistence
        .load(config)
        .with_context(|| format!("failed to load database from {}", data_dir.display()))?;
    Ok((persistence, db))
}

fn describe(record: &HistoryRecord) -> String {
    let parent = record
        .parent_id
        .map_or_else(|| "-".to_string(), |id| id.to_string());
    let actor = record.created_by.as_deref().unwrap_or("-");
    format!(
        "#{} {} parent={} at={} by={} {}",
        record.id,
        record.kind,
        parent,
        record.created_at.to_rfc3339(),
        actor,
        record.changed
    )
}

/// Describes the chain of one row, oldest first.
fn history(data_dir: &Path, table: &str, row: &str) -> anyhow::Result<Vec<String>> {
    let (_, db) = open(data_dir)?;
    let chain = db.chain(table, row)?;
    if chain.is_empty() {
        bail!("no history for row '{}' in table '{}'", row, table);
    }
    Ok(chain.iter().map(describe).collect())
}

/// Collects chain violations and unreadable payloads.
fn verify(data_dir: &Path) -> anyhow::Result<Vec<String>> {
    let (_, db) = open(data_dir)?;
    let records = db.history_records()?;

    let mut problems = Vec::new();
    let mut chains: BTreeMap<(String, String), Vec<HistoryRecord>> = BTreeMap::new();
    for record in records {
        if let Err(e) = record.change_set() {
            problems.push(e.to_string());
        }
        if !db.catalog().contains(&record.entity_name) {
            problems.push(format!(
                "history record {} names unknown entity '{}'",
                record.id, record.entity_name
            ));
        }
        chains
            .entry((record.table_name.clone(), record.row_id.clone()))
            .or_default()
            .push(record);
    }

    for ((table, row), chain) in &chains {
        for violation in verify_chain(chain) {
            problems.push(format!("{} row '{}': {}", table, row, violation));
        }
    }
    tracing::info!(rows = chains.len(), problems = problems.len(), "verification finished");
    Ok(problems)
}

/// Rolls a row back, commits and saves the database.
fn rollback(data_dir: &Path, entity: &str, row: &str, id: Option<i64>) -> anyhow::Result<String> {
    let (persistence, db) = open(data_dir)?;
    let mut session = db.session();

    let message = match session.rollback_row(entity, row, id)? {
        RollbackOutcome::NoChange => "nothing to roll back".to_string(),
        RollbackOutcome::Skipped { history_id, error } => {
            bail!("history record {} could not be applied: {}", history_id, error)
        }
        RollbackOutcome::Restored { history_id, .. } => {
            let affected = session.save_changes()?;
            persistence.save(&db)?;
            format!(
                "rolled back to history record {} ({} rows affected)",
                history_id, affected
            )
        }
    };
    Ok(message)
}
