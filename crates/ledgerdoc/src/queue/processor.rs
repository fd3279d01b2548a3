//! Per-job pipeline driver.
//!
//! Walks one queued job through the pipeline stages, checkpointing stage and
//! progress on the job row after each step. Failures are typed per stage so
//! the recorded error classification never depends on message contents.

use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;

use crate::db::{self, document_repo, job_repo, Database, DatabaseError};
use crate::pipeline::{Pipeline, SourceDescriptor};
use crate::sanitize::sanitize_file_name;
use crate::storage::ArtifactStore;

/// Typed stage failure. The variant, not the message, determines the
/// observable `error_type` recorded on the job.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("OCR stage failed: {0}")]
    Ocr(String),

    #[error("Classification stage failed: {0}")]
    Classification(String),

    #[error("Validation stage failed: {0}")]
    Validation(String),

    #[error("Processing timeout (>15 minutes)")]
    Timeout,
}

impl StageError {
    pub fn error_type(&self) -> &'static str {
        match self {
            StageError::Ocr(_) => "ocr_failed",
            StageError::Classification(_) => "classification_failed",
            StageError::Validation(_) => "validation_failed",
            StageError::Timeout => "timeout",
        }
    }
}

// Repository failures surface under the validation category, the same
// default the coarse classification bottoms out on.
impl From<DatabaseError> for StageError {
    fn from(e: DatabaseError) -> Self {
        StageError::Validation(e.to_string())
    }
}

pub struct DocumentProcessor {
    db: Database,
    pipeline: Arc<Pipeline>,
    store: Option<Arc<dyn ArtifactStore>>,
}

impl DocumentProcessor {
    pub fn new(
        db: Database,
        pipeline: Arc<Pipeline>,
        store: Option<Arc<dyn ArtifactStore>>,
    ) -> Self {
        Self {
            db,
            pipeline,
            store,
        }
    }

    /// Processes one job to a terminal state. Never panics or propagates:
    /// failures are recorded on the job row and logged.
    pub async fn process(&self, job_id: &str) {
        log::debug!("Processing job {}", job_id);

        if let Err(e) = self.run_stages(job_id).await {
            let now = db::now_iso();
            log::error!("Job {} failed: {}", job_id, e);

            if let Err(db_err) =
                job_repo::mark_failed(&self.db, job_id, &e.to_string(), e.error_type(), &now)
            {
                log::error!("Failed to record failure for job {}: {}", job_id, db_err);
            }
            if let Ok(Some(job)) = job_repo::find_by_id(&self.db, job_id) {
                let _ = document_repo::update_status(&self.db, &job.document_id, "failed", &now);
            }
        }
    }

    async fn run_stages(&self, job_id: &str) -> Result<(), StageError> {
        let job = job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| StageError::Validation(format!("job {} not found", job_id)))?;
        let document = document_repo::find_by_id(&self.db, &job.document_id)?
            .ok_or_else(|| StageError::Validation(format!("document {} not found", job.document_id)))?;

        let started_at = db::now_iso();
        // Advisory only, not enforced.
        let estimated = db::format_iso(Utc::now() + Duration::minutes(5));
        job_repo::mark_processing(&self.db, job_id, &started_at, &estimated)?;
        document_repo::update_status(&self.db, &document.id, "processing", &started_at)?;

        // Stage 1 — OCR
        job_repo::update_progress(&self.db, job_id, "ocr", 25, &db::now_iso())?;
        let bytes = tokio::fs::read(&document.storage_path)
            .await
            .map_err(|e| StageError::Ocr(format!("cannot read '{}': {}", document.storage_path, e)))?;

        let source = SourceDescriptor {
            path: document.storage_path.clone(),
            filename: document.filename.clone(),
            mime_type: document.mime_type.clone(),
            size_bytes: document.size_bytes,
            sha256: document.sha256.clone(),
        };
        let extraction = self.pipeline.extract(&bytes, &source).await;
        job_repo::set_ocr_text(&self.db, job_id, &extraction.text)?;
        job_repo::update_progress(&self.db, job_id, "ocr", 50, &db::now_iso())?;

        // Stage 2 — classification
        job_repo::update_progress(&self.db, job_id, "classification", 60, &db::now_iso())?;
        let analysis = self.pipeline.analyze(&extraction.text).await;
        let classification_json = serde_json::to_string(&analysis.classification)
            .map_err(|e| StageError::Classification(e.to_string()))?;
        job_repo::set_classification(&self.db, job_id, &classification_json)?;
        job_repo::update_progress(&self.db, job_id, "classification", 80, &db::now_iso())?;

        // Stage 3 — validation
        job_repo::update_progress(&self.db, job_id, "validation", 90, &db::now_iso())?;
        let output = self
            .pipeline
            .validate_and_assemble(source, extraction, analysis)
            .await
            .map_err(|e| StageError::Validation(e.to_string()))?;

        if let Some(store) = &self.store {
            let artifact = serde_json::to_vec_pretty(&output)
                .map_err(|e| StageError::Validation(e.to_string()))?;
            let name = format!(
                "{}/{}.json",
                output.source.sha256,
                sanitize_file_name(&output.source.filename)
            );
            match store.upload(&artifact, &name, &output.persistence_payload.company_id).await {
                Ok(location) => log::debug!("Job {} artifact stored at {}", job_id, location),
                Err(e) => log::warn!("Job {} artifact upload failed: {}", job_id, e),
            }
        }
        job_repo::update_progress(&self.db, job_id, "validation", 95, &db::now_iso())?;

        // Stage 4 — complete
        job_repo::update_progress(&self.db, job_id, "complete", 100, &db::now_iso())?;
        let completed_at = db::now_iso();
        job_repo::mark_completed(&self.db, job_id, &completed_at)?;
        document_repo::update_status(&self.db, &document.id, "completed", &completed_at)?;

        log::info!("Job {} completed", job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TenantContext;
    use crate::db::document_repo::DocumentRow;
    use crate::db::job_repo::JobRow;
    use crate::hash::sha256_hex;
    use crate::storage::LocalArtifactStore;

    fn setup(content: &[u8]) -> (Database, Arc<Pipeline>, tempfile::TempDir, String, String) {
        let db = Database::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("extrato.txt");
        std::fs::write(&file_path, content).unwrap();

        let now = db::now_iso();
        let sha256 = sha256_hex(content);
        let document = DocumentRow {
            id: "doc-1".to_string(),
            company_id: "empresa-1".to_string(),
            filename: "extrato.txt".to_string(),
            mime_type: "text/plain".to_string(),
            size_bytes: content.len() as u64,
            sha256,
            storage_path: file_path.display().to_string(),
            status: "queued".to_string(),
            created_at: now.clone(),
            updated_at: now.clone(),
        };
        document_repo::insert(&db, &document).unwrap();

        let job = JobRow {
            id: "job-1".to_string(),
            document_id: "doc-1".to_string(),
            company_id: "empresa-1".to_string(),
            status: "queued".to_string(),
            stage: None,
            progress: 0,
            ocr_text: None,
            classification: None,
            error_message: None,
            error_type: None,
            created_at: now.clone(),
            updated_at: now,
            started_at: None,
            completed_at: None,
            estimated_completion_at: None,
        };
        job_repo::insert(&db, &job).unwrap();

        let pipeline =
            Arc::new(Pipeline::new(None, None, TenantContext::default()).unwrap());
        (db, pipeline, dir, "job-1".to_string(), "doc-1".to_string())
    }

    #[test]
    fn test_error_type_mapping_is_variant_based() {
        assert_eq!(StageError::Ocr("x".into()).error_type(), "ocr_failed");
        assert_eq!(
            StageError::Classification("x".into()).error_type(),
            "classification_failed"
        );
        assert_eq!(
            StageError::Validation("x".into()).error_type(),
            "validation_failed"
        );
        assert_eq!(StageError::Timeout.error_type(), "timeout");
    }

    #[tokio::test]
    async fn test_successful_job_reaches_completed_with_full_progress() {
        let (db, pipeline, _dir, job_id, doc_id) =
            setup(b"extrato: saldo anterior 100,00 saldo final 90,00");
        let processor = DocumentProcessor::new(db.clone(), pipeline, None);

        processor.process(&job_id).await;

        let job = job_repo::find_by_id(&db, &job_id).unwrap().unwrap();
        assert_eq!(job.status, "completed");
        assert_eq!(job.stage.as_deref(), Some("complete"));
        assert_eq!(job.progress, 100);
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
        assert!(job.estimated_completion_at.is_some());
        assert!(job.ocr_text.unwrap().contains("saldo anterior"));
        assert!(job.classification.unwrap().contains("EXTRATO_BANCARIO"));

        let document = document_repo::find_by_id(&db, &doc_id).unwrap().unwrap();
        assert_eq!(document.status, "completed");
    }

    #[tokio::test]
    async fn test_unreadable_file_fails_as_ocr() {
        let (db, pipeline, dir, job_id, doc_id) = setup(b"conteudo");
        // Remove the stored file so the OCR stage cannot read it.
        std::fs::remove_file(dir.path().join("extrato.txt")).unwrap();
        let processor = DocumentProcessor::new(db.clone(), pipeline, None);

        processor.process(&job_id).await;

        let job = job_repo::find_by_id(&db, &job_id).unwrap().unwrap();
        assert_eq!(job.status, "failed");
        assert_eq!(job.error_type.as_deref(), Some("ocr_failed"));
        assert!(job.error_message.is_some());

        let document = document_repo::find_by_id(&db, &doc_id).unwrap().unwrap();
        assert_eq!(document.status, "failed");
    }

    #[tokio::test]
    async fn test_missing_job_is_a_noop_failure() {
        let (db, pipeline, _dir, _job_id, _doc_id) = setup(b"x");
        let processor = DocumentProcessor::new(db.clone(), pipeline, None);

        // Must not panic; there is no row to mark failed.
        processor.process("nonexistent").await;
        assert!(job_repo::find_by_id(&db, "nonexistent").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_artifact_is_uploaded_on_success() {
        let (db, pipeline, _dir, job_id, _doc_id) =
            setup(b"recibo: recebi de Maria o valor de cem reais");
        let artifact_dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ArtifactStore> =
            Arc::new(LocalArtifactStore::new(artifact_dir.path()));
        let processor = DocumentProcessor::new(db.clone(), pipeline, Some(store));

        processor.process(&job_id).await;

        let job = job_repo::find_by_id(&db, &job_id).unwrap().unwrap();
        assert_eq!(job.status, "completed");

        // One artifact under {tenant}/{sha256}/.
        let tenant_dir = artifact_dir.path().join("unknown-company");
        let entries: Vec<_> = walkdir::WalkDir::new(&tenant_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].path().to_string_lossy().ends_with("extrato.txt.json"));
    }
}
