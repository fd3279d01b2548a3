//! Processing-job repository — CRUD operations for the `processing_jobs`
//! table.
//!
//! A job is one attempt to run a document through the pipeline. Retries are
//! new job rows; history is never mutated. Jobs are claimed oldest-first and
//! read back newest-first for status reporting.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub document_id: String,
    pub company_id: String,
    pub status: String,
    pub stage: Option<String>,
    pub progress: i64,
    pub ocr_text: Option<String>,
    pub classification: Option<String>,
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub estimated_completion_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            document_id: row.get("document_id")?,
            company_id: row.get("company_id")?,
            status: row.get("status")?,
            stage: row.get("stage")?,
            progress: row.get("progress")?,
            ocr_text: row.get("ocr_text")?,
            classification: row.get("classification")?,
            error_message: row.get("error_message")?,
            error_type: row.get("error_type")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            estimated_completion_at: row.get("estimated_completion_at")?,
        })
    }
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO processing_jobs (id, document_id, company_id, status, stage, progress,
             ocr_text, classification, error_message, error_type, created_at, updated_at,
             started_at, completed_at, estimated_completion_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                job.id,
                job.document_id,
                job.company_id,
                job.status,
                job.stage,
                job.progress,
                job.ocr_text,
                job.classification,
                job.error_message,
                job.error_type,
                job.created_at,
                job.updated_at,
                job.started_at,
                job.completed_at,
                job.estimated_completion_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM processing_jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Queued jobs, oldest first, capped at `limit`. This is the claim query.
pub fn find_queued(db: &Database, limit: usize) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM processing_jobs WHERE status = 'queued'
             ORDER BY created_at ASC LIMIT ?1",
        )?;
        let rows: Vec<JobRow> = stmt
            .query_map(params![limit as i64], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Processing jobs whose `started_at` is older than `cutoff`. Fed to the
/// stuck-job sweep.
pub fn find_stuck(db: &Database, cutoff: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM processing_jobs WHERE status = 'processing'
             AND started_at IS NOT NULL AND started_at < ?1",
        )?;
        let rows: Vec<JobRow> = stmt
            .query_map(params![cutoff], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// All jobs for a document, newest first.
pub fn find_by_document(db: &Database, document_id: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM processing_jobs WHERE document_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows: Vec<JobRow> = stmt
            .query_map(params![document_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Transitions a job to `processing`, recording start and estimated
/// completion times.
pub fn mark_processing(
    db: &Database,
    id: &str,
    started_at: &str,
    estimated_completion_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE processing_jobs SET status = 'processing', started_at = ?2,
             estimated_completion_at = ?3, updated_at = ?2 WHERE id = ?1",
            params![id, started_at, estimated_completion_at],
        )?;
        Ok(())
    })
}

/// Updates the current stage and numeric progress of a job.
pub fn update_progress(
    db: &Database,
    id: &str,
    stage: &str,
    progress: i64,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE processing_jobs SET stage = ?2, progress = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, stage, progress, updated_at],
        )?;
        Ok(())
    })
}

/// Stores the captured OCR text on a job.
pub fn set_ocr_text(db: &Database, id: &str, ocr_text: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE processing_jobs SET ocr_text = ?2 WHERE id = ?1",
            params![id, ocr_text],
        )?;
        Ok(())
    })
}

/// Stores the captured classification result (as JSON text) on a job.
pub fn set_classification(
    db: &Database,
    id: &str,
    classification: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE processing_jobs SET classification = ?2 WHERE id = ?1",
            params![id, classification],
        )?;
        Ok(())
    })
}

/// Terminal success transition.
pub fn mark_completed(db: &Database, id: &str, completed_at: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE processing_jobs SET status = 'completed', completed_at = ?2, updated_at = ?2
             WHERE id = ?1",
            params![id, completed_at],
        )?;
        Ok(())
    })
}

/// Terminal failure transition with a coarse error classification.
pub fn mark_failed(
    db: &Database,
    id: &str,
    error_message: &str,
    error_type: &str,
    completed_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE processing_jobs SET status = 'failed', error_message = ?2, error_type = ?3,
             completed_at = ?4, updated_at = ?4 WHERE id = ?1",
            params![id, error_message, error_type, completed_at],
        )?;
        Ok(())
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM processing_jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
