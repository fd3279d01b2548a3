use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::info;
use tracing_subscriber::EnvFilter;

use ledgerdoc::config::Config;
use ledgerdoc::db::{self, document_repo, Database};
use ledgerdoc::extractor::detect_mime_type;
use ledgerdoc::hash::sha256_hex;
use ledgerdoc::ingest::{self, IngestOptions};
use ledgerdoc::queue::{DocumentProcessor, JobQueue, QueueConfig};
use ledgerdoc::sanitize::sanitize_file_name;
use ledgerdoc::storage::{ArtifactStore, HttpBlobStore, LocalArtifactStore};
use ledgerdoc::{LedgerdocError, Pipeline};

#[derive(Parser)]
#[command(name = "ledgerdoc")]
#[command(version)]
#[command(about = "Financial document ingestion and classification pipeline")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process every file in a directory and write one JSON artifact each.
    Ingest {
        #[arg(long, default_value = "./input")]
        input: PathBuf,
        #[arg(long, default_value = "./output")]
        output: PathBuf,
        /// Upload JSON artifacts to the configured blob storage.
        #[arg(long)]
        upload: bool,
        /// Also upload the original files.
        #[arg(long)]
        upload_original: bool,
        /// Cap on the number of files processed this run.
        #[arg(long)]
        max_files: Option<usize>,
        /// Local fan-out width. Defaults to half the CPU count.
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long)]
        quiet: bool,
    },
    /// Register a file as a document and queue it for processing.
    Enqueue {
        file: PathBuf,
    },
    /// Run the job queue until interrupted.
    Serve,
    /// Print aggregated processing progress for a document.
    Status {
        document_id: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open_database() -> Result<Database, LedgerdocError> {
    let path = match std::env::var("LEDGERDOC_DB") {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => db::default_database_path().ok_or(ledgerdoc::ConfigError::NoHomeDirectory)?,
    };
    Ok(Database::open(&path)?)
}

fn storage_root() -> PathBuf {
    match std::env::var("LEDGERDOC_STORAGE_DIR") {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => dirs::home_dir()
            .map(|h| h.join(".ledgerdoc").join("storage"))
            .unwrap_or_else(|| PathBuf::from("./storage")),
    }
}

fn artifact_store(config: &Config) -> Option<Arc<dyn ArtifactStore>> {
    config
        .blob
        .clone()
        .map(|blob| Arc::new(HttpBlobStore::new(blob)) as Arc<dyn ArtifactStore>)
}

async fn cmd_ingest(config: &Config, options: IngestOptions) -> Result<(), LedgerdocError> {
    let pipeline = Arc::new(Pipeline::from_config(config)?);
    let store = artifact_store(config);
    let summary = ingest::run(pipeline, store, options).await?;
    info!(
        "Batch finished: total={} success={} failed={}",
        summary.total, summary.success, summary.failed
    );
    Ok(())
}

async fn cmd_enqueue(config: &Config, file: PathBuf) -> Result<(), LedgerdocError> {
    let db = open_database()?;

    let bytes = tokio::fs::read(&file)
        .await
        .map_err(|e| ledgerdoc::StorageError::ReadFile {
            path: file.clone(),
            source: e,
        })?;
    let sha256 = sha256_hex(&bytes);

    if let Some(existing) = document_repo::find_by_hash(&db, &sha256)? {
        info!(
            "Identical content already registered as document {} ({})",
            existing.id, existing.status
        );
    }

    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();

    // Keep a private copy of the upload; the queue reads from here.
    let local_store = LocalArtifactStore::new(storage_root());
    let storage_path = local_store
        .upload(
            &bytes,
            &format!("{}/{}", sha256, sanitize_file_name(&file_name)),
            &config.tenant.company_id,
        )
        .await?;

    let now = db::now_iso();
    let document = document_repo::DocumentRow {
        id: uuid::Uuid::new_v4().to_string(),
        company_id: config.tenant.company_id.clone(),
        filename: file_name,
        mime_type: detect_mime_type(&file),
        size_bytes: bytes.len() as u64,
        sha256,
        storage_path,
        status: "uploaded".to_string(),
        created_at: now.clone(),
        updated_at: now,
    };
    document_repo::insert(&db, &document)?;

    let pipeline = Arc::new(Pipeline::from_config(config)?);
    let processor = Arc::new(DocumentProcessor::new(
        db.clone(),
        pipeline,
        artifact_store(config),
    ));
    let queue = JobQueue::new(db, processor, QueueConfig::from(config.queue.clone()));
    let job_id = queue.enqueue_document(&document.id)?;

    println!("document {}", document.id);
    println!("job {}", job_id);
    Ok(())
}

async fn cmd_serve(config: &Config) -> Result<(), LedgerdocError> {
    let db = open_database()?;
    let pipeline = Arc::new(Pipeline::from_config(config)?);
    let processor = Arc::new(DocumentProcessor::new(
        db.clone(),
        pipeline,
        artifact_store(config),
    ));
    let queue = JobQueue::new(db, processor, QueueConfig::from(config.queue.clone()));

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        if let Err(e) = ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        }) {
            log::warn!("Could not install interrupt handler: {}", e);
        }
    }

    let handle = queue.start();
    while !interrupted.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    info!("Interrupt received, stopping queue");
    queue.stop();
    if let Some(handle) = handle {
        let _ = handle.await;
    }
    Ok(())
}

async fn cmd_status(config: &Config, document_id: &str) -> Result<(), LedgerdocError> {
    let db = open_database()?;
    let pipeline = Arc::new(Pipeline::from_config(config)?);
    let processor = Arc::new(DocumentProcessor::new(db.clone(), pipeline, None));
    let queue = JobQueue::new(db, processor, QueueConfig::from(config.queue.clone()));

    let progress = queue.document_progress(document_id)?;
    match serde_json::to_string_pretty(&progress) {
        Ok(rendered) => println!("{}", rendered),
        Err(e) => return Err(ledgerdoc::SchemaViolation::from(e).into()),
    }
    Ok(())
}

async fn run(cli: Cli, config: Config) -> Result<(), LedgerdocError> {
    match cli.cmd {
        Command::Ingest {
            input,
            output,
            upload,
            upload_original,
            max_files,
            concurrency,
            quiet,
        } => {
            let options = IngestOptions {
                input,
                output,
                upload,
                upload_original,
                max_files,
                concurrency: concurrency.unwrap_or_else(|| (num_cpus::get() / 2).max(1)),
                quiet,
            };
            cmd_ingest(&config, options).await
        }
        Command::Enqueue { file } => cmd_enqueue(&config, file).await,
        Command::Serve => cmd_serve(&config).await,
        Command::Status { document_id } => cmd_status(&config, &document_id).await,
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    info!("ledgerdoc v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let config = Config::from_env();

    if let Err(e) = run(cli, config).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
