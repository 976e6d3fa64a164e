//! Blog durability tool
//!
//! CLI over the backup, restore and archive managers

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use durabilitytool::config::AppConfig;
use durabilitytool::logging::init_logging;
use durabilitytool::utils::setting::check_store_connection;
use durabilitytool::{
    ArchiveManager, BackupManager, RestoreOptions, Scheduler, SqliteStore, TaskGate,
};

#[derive(Parser, Debug)]
#[command(name = "durabilitytool", version, about = "Backups, restores and archiving for the blog store")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, short, default_value = "config.json", env = "DURABILITY_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Take a backup now (full unless --incremental)
    Backup {
        #[arg(long)]
        incremental: bool,
    },
    /// Restore a backup file
    Restore {
        /// File path, absolute or relative to the backup directory
        file: PathBuf,
        /// Restore only these tables (repeatable)
        #[arg(long = "table")]
        tables: Vec<String>,
        /// Drop the target tables before replaying them
        #[arg(long)]
        drop_existing: bool,
        #[arg(long)]
        skip_validation: bool,
        /// Do not take a safety backup first
        #[arg(long)]
        no_safety_backup: bool,
    },
    /// Check that a backup file is readable and holds statements
    Validate { file: PathBuf },
    /// List backup tasks, newest first
    History,
    /// Backup statistics
    Stats,
    /// Show the backup task currently running
    CurrentTask,
    /// Delete a backup and its file
    Delete { id: String },
    /// Apply the retention rules to the backup history
    Cleanup,
    /// Create or run a single archive task
    #[command(subcommand)]
    ArchiveTask(ArchiveTaskCommand),
    /// Archive rows of a table older than the configured age
    Archive {
        table: String,
        #[arg(long, default_value = "created_at")]
        date_column: String,
    },
    /// Archive every table listed in the configuration
    ArchiveBatch,
    /// Put archived rows back into the store
    ArchiveRestore {
        file: PathBuf,
        /// Destination table; inferred from the file name when omitted
        #[arg(long)]
        table: Option<String>,
    },
    /// Delete archive files past their retention window
    ArchiveCleanup,
    /// Archive statistics
    ArchiveStats,
    /// List archive tasks, newest first
    ArchiveTasks,
    /// Run the configured schedules until Ctrl-C
    Schedule,
}

#[derive(Subcommand, Debug)]
enum ArchiveTaskCommand {
    /// Record a pending task for rows matching CONDITION
    Create { table: String, condition: String },
    /// Run a pending task
    Execute { id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to render output as JSON")?
    );
    Ok(())
}

async fn run_app() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load_from_json(&cli.config).context(format!(
        "Failed to load application configuration from {}",
        cli.config.display()
    ))?;
    init_logging(&config.log)?;

    let store = Arc::new(
        SqliteStore::connect(&config.database_url)
            .await
            .context("Failed to open the store")?,
    );
    if !check_store_connection(store.as_ref(), &config.database_url).await {
        anyhow::bail!("Store at {} is not reachable", config.database_url);
    }

    let gate = TaskGate::new();
    let backup = Arc::new(
        BackupManager::new(store.clone(), config.backup.clone(), gate.clone())
            .context("Failed to initialise the backup manager")?,
    );
    let archive = Arc::new(
        ArchiveManager::new(store, config.archive.clone(), gate)
            .context("Failed to initialise the archive manager")?,
    );

    match cli.command {
        Command::Backup { incremental } => {
            let task = if incremental {
                backup.create_incremental_backup().await
            } else {
                backup.create_full_backup().await
            };
            print_json(&task.context("Backup process failed")?)?;
        }
        Command::Restore {
            file,
            tables,
            drop_existing,
            skip_validation,
            no_safety_backup,
        } => {
            let options = RestoreOptions {
                backup_file: file,
                target_tables: (!tables.is_empty()).then_some(tables),
                drop_existing,
                validate_before_restore: !skip_validation,
                create_backup_before_restore: !no_safety_backup,
            };
            let report = backup
                .restore_database(options)
                .await
                .context("Restore process failed")?;
            print_json(&report)?;
        }
        Command::Validate { file } => {
            let report = backup.validate_backup_file(&file)?;
            print_json(&report)?;
            if !report.is_valid {
                anyhow::bail!(
                    "Backup file is not valid: {}",
                    report.reason.unwrap_or_default()
                );
            }
        }
        Command::History => print_json(&backup.get_backup_history())?,
        Command::Stats => print_json(&backup.get_backup_stats())?,
        Command::CurrentTask => match backup.current_task() {
            Some(task) => print_json(&task)?,
            None => println!("ℹ️ No backup is running."),
        },
        Command::Delete { id } => backup.delete_backup(&id)?,
        Command::Cleanup => {
            let removed = backup.cleanup_old_backups()?;
            println!("🧹 Removed {} backup(s).", removed);
        }
        Command::ArchiveTask(ArchiveTaskCommand::Create { table, condition }) => {
            let id = archive.create_archive_task(&table, &condition)?;
            println!("📝 Created archive task {}", id);
        }
        Command::ArchiveTask(ArchiveTaskCommand::Execute { id }) => {
            let task = archive
                .execute_archive_task(&id)
                .await
                .context("Archive task failed")?;
            print_json(&task)?;
        }
        Command::Archive { table, date_column } => {
            let task = archive
                .archive_old_data(&table, &date_column)
                .await
                .context("Archive process failed")?;
            print_json(&task)?;
        }
        Command::ArchiveBatch => {
            let ids = archive
                .archive_multiple_tables(&archive.config().tables)
                .await;
            let tasks: Vec<_> = ids.iter().filter_map(|id| archive.get_task(id)).collect();
            print_json(&tasks)?;
        }
        Command::ArchiveRestore { file, table } => {
            let report = archive
                .restore_from_archive(&file, table.as_deref())
                .await
                .context("Archive restore failed")?;
            print_json(&report)?;
        }
        Command::ArchiveCleanup => {
            let removed = archive.cleanup_expired_archives()?;
            println!("🧹 Removed {} expired archive file(s).", removed);
        }
        Command::ArchiveStats => print_json(&archive.get_archive_stats())?,
        Command::ArchiveTasks => print_json(&archive.list_tasks())?,
        Command::Schedule => {
            let mut scheduler = Scheduler::new(backup.clone(), archive.clone());
            if scheduler.start() == 0 {
                anyhow::bail!("No schedule is enabled in the configuration");
            }
            println!("⏰ Scheduler running, press Ctrl-C to stop.");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            scheduler.shutdown().await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_restore_flags() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "durabilitytool",
            "restore",
            "backup_full.sql.gz",
            "--table",
            "comments",
            "--table",
            "articles",
            "--drop-existing",
        ])?;
        match cli.command {
            Command::Restore {
                tables,
                drop_existing,
                skip_validation,
                ..
            } => {
                assert_eq!(tables, vec!["comments", "articles"]);
                assert!(drop_existing);
                assert!(!skip_validation);
            }
            other => panic!("unexpected command {:?}", other),
        }
        Ok(())
    }
}
