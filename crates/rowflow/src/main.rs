//! rowflow CLI: submit tabular files to the ingestion engine and inspect
//! the results. Stands in for the HTTP layer in front of the engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use rowflow_db::SqliteStore;
use rowflow_engine::{EngineConfig, IngestService};
use rowflow_logging::{init_logging, LogConfig};
use rowflow_protocol::{Job, JobProgress, ParserOptions};

#[derive(Parser)]
#[command(name = "rowflow", about = "Tabular file ingestion service", version)]
struct Cli {
    /// Database file backing jobs, schemas, and records
    #[arg(long, env = "ROWFLOW_DB", default_value = "rowflow.db", global = true)]
    db: PathBuf,

    /// Verbose logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a file, watching progress until it finishes
    Ingest {
        file: PathBuf,
        /// Cell delimiter for delimited text
        #[arg(long, default_value_t = ';')]
        delimiter: char,
        /// Treat the first unskipped row as the header
        #[arg(long)]
        header: bool,
        /// Rows to skip ahead of the header
        #[arg(long, default_value_t = 0)]
        skip_rows: usize,
        /// Records per bulk insert
        #[arg(long, default_value_t = 1000)]
        batch_size: usize,
        /// Workbook sheet name (first sheet when omitted)
        #[arg(long)]
        sheet: Option<String>,
    },
    /// Parse the head of a file without creating a job
    Preview {
        file: PathBuf,
        #[arg(long, default_value_t = ';')]
        delimiter: char,
        #[arg(long)]
        header: bool,
        #[arg(long, default_value_t = 10)]
        rows: usize,
    },
    /// List jobs, newest first
    Jobs {
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        per_page: usize,
    },
    /// Show one job with its progress and schema
    Show { job_id: Uuid },
    /// List a job's records
    Records {
        job_id: Uuid,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        per_page: usize,
    },
    /// Search a job's records for a substring
    Search { job_id: Uuid, term: String },
    /// Delete a job together with its schema and records
    Delete { job_id: Uuid },
    /// List supported file extensions
    Formats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig {
        verbose: cli.verbose,
    })?;

    let store = Arc::new(
        SqliteStore::open(&cli.db)
            .await
            .with_context(|| format!("failed to open database {}", cli.db.display()))?,
    );
    let service = IngestService::start(store, EngineConfig::default());

    let result = run(&service, cli.command).await;
    service.shutdown().await;
    result
}

async fn run(service: &IngestService, command: Commands) -> Result<()> {
    match command {
        Commands::Ingest {
            file,
            delimiter,
            header,
            skip_rows,
            batch_size,
            sheet,
        } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let file_name = file_name_of(&file)?;
            let options = ParserOptions {
                delimiter,
                has_header: header,
                skip_rows,
                batch_size,
                sheet_name: sheet,
                ..ParserOptions::default()
            };

            let job_id = service.submit(bytes, &file_name, options).await?;
            println!("job {job_id}");
            watch(service, job_id).await
        }
        Commands::Preview {
            file,
            delimiter,
            header,
            rows,
        } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let file_name = file_name_of(&file)?;
            let options = ParserOptions {
                delimiter,
                has_header: header,
                preview_rows: rows,
                ..ParserOptions::default()
            };
            for row in service.preview(&bytes, &file_name, &options)? {
                println!("{}", serde_json::to_string(&row)?);
            }
            Ok(())
        }
        Commands::Jobs { page, per_page } => {
            for job in service.list_jobs(page, per_page).await? {
                print_job_line(&job);
            }
            Ok(())
        }
        Commands::Show { job_id } => {
            let job = service.get_job(job_id).await?;
            let progress = service.progress(job_id).await?;
            print_job_line(&job);
            print_progress(&progress);
            if let Ok(schema) = service.schema(job_id).await {
                println!("columns:");
                for column in &schema.columns {
                    println!("  {:>3}  {:<24} {}", column.index, column.name, column.detected_type);
                }
            }
            Ok(())
        }
        Commands::Records {
            job_id,
            page,
            per_page,
        } => {
            for record in service.records(job_id, page, per_page).await? {
                println!(
                    "{:>8}  {}",
                    record.row_number,
                    serde_json::to_string(&record.data)?
                );
            }
            Ok(())
        }
        Commands::Search { job_id, term } => {
            for record in service.search_records(job_id, &term).await? {
                println!(
                    "{:>8}  {}",
                    record.row_number,
                    serde_json::to_string(&record.data)?
                );
            }
            Ok(())
        }
        Commands::Delete { job_id } => {
            service.delete_job(job_id).await?;
            println!("deleted {job_id}");
            Ok(())
        }
        Commands::Formats => {
            for extension in service.supported_extensions() {
                println!(".{extension}");
            }
            Ok(())
        }
    }
}

/// Poll the progress projection until the job reaches a terminal state.
async fn watch(service: &IngestService, job_id: Uuid) -> Result<()> {
    loop {
        let progress = service.progress(job_id).await?;
        print_progress(&progress);
        if progress.status.is_terminal() {
            if let Some(message) = &progress.error_message {
                anyhow::bail!("job failed: {message}");
            }
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn print_job_line(job: &Job) {
    println!(
        "{}  {:<22} {:<10} {:>9}B  {}",
        job.id,
        job.status.as_str(),
        job.file_type,
        job.file_size,
        job.file_name
    );
}

fn print_progress(progress: &JobProgress) {
    println!(
        "{}  {:>5.1}%  processed {} / {} (failed {})",
        progress.status, progress.percent, progress.processed, progress.total, progress.failed
    );
}

fn file_name_of(path: &PathBuf) -> Result<String> {
    Ok(path
        .file_name()
        .and_then(|n| n.to_str())
        .context("file name is not valid UTF-8")?
        .to_owned())
}
