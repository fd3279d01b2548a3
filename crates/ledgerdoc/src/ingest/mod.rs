//! Synchronous batch ingestion.
//!
//! Scans an input directory, runs every file through the pipeline with a
//! bounded local fan-out, and writes one JSON artifact per input file named
//! by content hash. Per-file failures are logged and counted without
//! aborting the batch.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures_util::stream::{self, StreamExt};
use tracing::warn;
use walkdir::WalkDir;

use crate::error::IngestError;
use crate::extractor::detect_mime_type;
use crate::hash::sha256_hex;
use crate::pipeline::{Pipeline, SourceDescriptor};
use crate::sanitize::sanitize_file_name;
use crate::storage::ArtifactStore;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub upload: bool,
    pub upload_original: bool,
    pub max_files: Option<usize>,
    pub concurrency: usize,
    pub quiet: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            input: PathBuf::from("./input"),
            output: PathBuf::from("./output"),
            upload: false,
            upload_original: false,
            max_files: None,
            concurrency: 2,
            quiet: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct IngestSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub outputs: Vec<PathBuf>,
}

fn log_line(quiet: bool, message: &str) {
    if !quiet {
        println!("{}", message);
    }
}

fn ensure_directory_with_gitkeep(dir: &Path) -> Result<(), IngestError> {
    std::fs::create_dir_all(dir).map_err(|e| IngestError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let gitkeep = dir.join(".gitkeep");
    if !gitkeep.exists() {
        std::fs::write(&gitkeep, b"").map_err(|e| IngestError::Io {
            path: gitkeep.clone(),
            source: e,
        })?;
    }
    Ok(())
}

fn list_files_recursive(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| !entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .filter(|path| path.file_name().map(|n| n != ".gitkeep").unwrap_or(true))
        .collect();
    files.sort();
    files
}

struct ProcessedFile {
    output_path: PathBuf,
}

async fn process_file(
    pipeline: &Pipeline,
    store: Option<&Arc<dyn ArtifactStore>>,
    options: &IngestOptions,
    file_path: &Path,
) -> Result<ProcessedFile, IngestError> {
    let bytes = tokio::fs::read(file_path).await.map_err(|e| IngestError::Io {
        path: file_path.to_path_buf(),
        source: e,
    })?;

    let file_name = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    let safe_name = sanitize_file_name(&file_name);
    let sha256 = sha256_hex(&bytes);

    let source = SourceDescriptor {
        path: file_path.display().to_string(),
        filename: file_name.clone(),
        mime_type: detect_mime_type(file_path),
        size_bytes: bytes.len() as u64,
        sha256: sha256.clone(),
    };

    let mut output = pipeline.run(source, &bytes).await?;

    let output_path = options.output.join(format!("{}_{}.json", sha256, safe_name));
    let rendered = serde_json::to_vec_pretty(&output).map_err(crate::pipeline::SchemaViolation::from)?;
    tokio::fs::write(&output_path, &rendered)
        .await
        .map_err(|e| IngestError::Io {
            path: output_path.clone(),
            source: e,
        })?;

    // Artifact upload is strictly non-fatal: failures become error tags on
    // the already-written artifact.
    if options.upload {
        let mut upload_errors = Vec::new();
        match store {
            None => upload_errors.push("blob_not_configured".to_string()),
            Some(store) => {
                let json_name = format!("{}/{}_{}.json", sha256, sha256, safe_name);
                match store.upload(&rendered, &json_name, &pipeline.tenant().company_id).await {
                    Ok(url) => output.artifacts.json_url = Some(url),
                    Err(e) => upload_errors.push(format!("blob_upload_error: {}", e)),
                }

                if options.upload_original {
                    let original_name = format!("{}/original_{}", sha256, safe_name);
                    match store
                        .upload(&bytes, &original_name, &pipeline.tenant().company_id)
                        .await
                    {
                        Ok(url) => output.artifacts.original_url = Some(url),
                        Err(e) => upload_errors.push(format!("blob_upload_error: {}", e)),
                    }
                }
            }
        }

        if output.artifacts.json_url.is_some()
            || output.artifacts.original_url.is_some()
            || !upload_errors.is_empty()
        {
            output.errors.extend(upload_errors);
            let rendered = serde_json::to_vec_pretty(&output)
                .map_err(crate::pipeline::SchemaViolation::from)?;
            tokio::fs::write(&output_path, rendered)
                .await
                .map_err(|e| IngestError::Io {
                    path: output_path.clone(),
                    source: e,
                })?;
        }
    }

    Ok(ProcessedFile { output_path })
}

/// Runs the batch over every file under `options.input`. Per-file failures
/// are counted, not raised; only unrecoverable setup problems (unusable
/// input/output directories) return an error.
pub async fn run(
    pipeline: Arc<Pipeline>,
    store: Option<Arc<dyn ArtifactStore>>,
    options: IngestOptions,
) -> Result<IngestSummary, IngestError> {
    ensure_directory_with_gitkeep(&options.input)?;
    ensure_directory_with_gitkeep(&options.output)?;

    let mut files = list_files_recursive(&options.input);
    if let Some(max) = options.max_files {
        files.truncate(max);
    }

    log_line(options.quiet, &format!("[ingest] arquivos encontrados: {}", files.len()));

    let summary = Arc::new(Mutex::new(IngestSummary {
        total: files.len(),
        ..Default::default()
    }));

    let concurrency = options.concurrency.max(1);
    stream::iter(files)
        .for_each_concurrent(concurrency, |file_path| {
            let pipeline = Arc::clone(&pipeline);
            let store = store.clone();
            let options = options.clone();
            let summary = Arc::clone(&summary);
            async move {
                let display_name = file_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file_path.display().to_string());

                match process_file(&pipeline, store.as_ref(), &options, &file_path).await {
                    Ok(processed) => {
                        let out_name = processed
                            .output_path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        log_line(options.quiet, &format!("[ok] {} -> {}", display_name, out_name));
                        if let Ok(mut guard) = summary.lock() {
                            guard.success += 1;
                            guard.outputs.push(processed.output_path);
                        }
                    }
                    Err(e) => {
                        warn!("ingest failed for '{}': {}", display_name, e);
                        log_line(options.quiet, &format!("[erro] {} -> {}", display_name, e));
                        if let Ok(mut guard) = summary.lock() {
                            guard.failed += 1;
                        }
                    }
                }
            }
        })
        .await;

    let summary = Arc::try_unwrap(summary)
        .map(|m| m.into_inner().unwrap_or_default())
        .unwrap_or_default();

    log_line(
        options.quiet,
        &format!(
            "[ingest] concluído | total={} success={} failed={}",
            summary.total, summary.success, summary.failed
        ),
    );

    Ok(summary)
}
