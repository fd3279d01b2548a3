//! Concurrency-bounded polling job queue.
//!
//! A single polling loop claims queued jobs oldest-first up to a concurrency
//! ceiling, dispatches each job's pipeline run without awaiting it, and
//! force-fails jobs stuck in `processing` beyond the timeout threshold. The
//! claim step reads only `queued` jobs and marks them active in the same
//! pass; a single active queue process per database is assumed.

pub mod processor;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::QueueSettings;
use crate::db::{self, document_repo, job_repo, Database};
use crate::error::QueueError;

pub use processor::{DocumentProcessor, StageError};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_concurrent: usize,
    pub poll_interval: Duration,
    /// Jobs stuck in `processing` longer than this are force-failed.
    pub job_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            poll_interval: Duration::from_millis(5000),
            job_timeout: Duration::from_secs(15 * 60),
        }
    }
}

impl From<QueueSettings> for QueueConfig {
    fn from(settings: QueueSettings) -> Self {
        Self {
            max_concurrent: settings.max_concurrent.max(1),
            poll_interval: settings.poll_interval,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    pub id: String,
    pub status: String,
    pub stage: Option<String>,
    pub progress: i64,
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub id: String,
    pub status: String,
    pub stage: Option<String>,
    pub progress: i64,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
}

/// Aggregated view over every job a document has had, newest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentProgress {
    pub document_id: String,
    pub status: String,
    pub progress: i64,
    pub jobs: Vec<JobProgress>,
}

pub struct JobQueue {
    db: Database,
    processor: Arc<DocumentProcessor>,
    config: QueueConfig,
    running: Arc<AtomicBool>,
    active: Arc<Mutex<HashSet<String>>>,
}

impl JobQueue {
    pub fn new(db: Database, processor: Arc<DocumentProcessor>, config: QueueConfig) -> Self {
        Self {
            db,
            processor,
            config,
            running: Arc::new(AtomicBool::new(false)),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Starts the polling loop. Returns `None` if the queue is already
    /// running.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            log::warn!("Job queue already running");
            return None;
        }
        log::info!(
            "Job queue started (max_concurrent={}, poll_interval={:?})",
            self.config.max_concurrent,
            self.config.poll_interval
        );

        let db = self.db.clone();
        let processor = Arc::clone(&self.processor);
        let config = self.config.clone();
        let running = Arc::clone(&self.running);
        let active = Arc::clone(&self.active);

        Some(tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                if let Err(e) = Self::poll_once(&db, &processor, &config, &active).await {
                    log::error!("Queue poll error: {}", e);
                }
                tokio::time::sleep(config.poll_interval).await;
            }
            log::info!("Job queue stopped");
        }))
    }

    /// Signals the polling loop to exit after its current cycle. Jobs
    /// already dispatched keep running to their terminal state.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// One poll cycle: claim up to the free capacity of queued jobs
    /// oldest-first, then sweep stuck jobs. Returns how many jobs were
    /// claimed this cycle.
    async fn poll_once(
        db: &Database,
        processor: &Arc<DocumentProcessor>,
        config: &QueueConfig,
        active: &Arc<Mutex<HashSet<String>>>,
    ) -> Result<usize, QueueError> {
        let active_count = active.lock().map(|guard| guard.len()).unwrap_or(0);

        let mut claimed = 0;
        if active_count < config.max_concurrent {
            let capacity = config.max_concurrent - active_count;
            let jobs = job_repo::find_queued(db, capacity)?;

            for job in jobs {
                // Claim and mark active in the same pass; a job still
                // `queued` in the store but already dispatched is skipped.
                let newly_claimed = active
                    .lock()
                    .map(|mut guard| guard.insert(job.id.clone()))
                    .unwrap_or(false);
                if !newly_claimed {
                    continue;
                }
                claimed += 1;

                let processor = Arc::clone(processor);
                let active = Arc::clone(active);
                let job_id = job.id.clone();
                tokio::spawn(async move {
                    processor.process(&job_id).await;
                    if let Ok(mut guard) = active.lock() {
                        guard.remove(&job_id);
                    }
                });
            }
        }

        Self::sweep_stuck(db, config)?;
        Ok(claimed)
    }

    /// Force-fails jobs whose `started_at` is older than the timeout
    /// threshold. The underlying pipeline call may still be outstanding;
    /// from here on it is fire-and-forget.
    fn sweep_stuck(db: &Database, config: &QueueConfig) -> Result<(), QueueError> {
        let timeout = chrono::Duration::from_std(config.job_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(15));
        let cutoff = db::format_iso(Utc::now() - timeout);

        for job in job_repo::find_stuck(db, &cutoff)? {
            log::warn!("Job {} timed out, force-failing", job.id);
            let timeout = StageError::Timeout;
            job_repo::mark_failed(
                db,
                &job.id,
                &timeout.to_string(),
                timeout.error_type(),
                &db::now_iso(),
            )?;
        }
        Ok(())
    }

    /// Creates a new queued job for the document and returns its id
    /// immediately. Every call creates a new job record; retries are new
    /// jobs, never mutations of history.
    pub fn enqueue_document(&self, document_id: &str) -> Result<String, QueueError> {
        let document = document_repo::find_by_id(&self.db, document_id)?
            .ok_or_else(|| QueueError::DocumentNotFound(document_id.to_string()))?;

        let now = db::now_iso();
        let job = job_repo::JobRow {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document.id.clone(),
            company_id: document.company_id.clone(),
            status: "queued".to_string(),
            stage: None,
            progress: 0,
            ocr_text: None,
            classification: None,
            error_message: None,
            error_type: None,
            created_at: now.clone(),
            updated_at: now.clone(),
            started_at: None,
            completed_at: None,
            estimated_completion_at: None,
        };
        job_repo::insert(&self.db, &job)?;
        document_repo::update_status(&self.db, &document.id, "queued", &now)?;

        log::info!("Job {} enqueued for document {}", job.id, document_id);
        Ok(job.id)
    }

    pub fn job_status(&self, job_id: &str) -> Result<JobStatusReport, QueueError> {
        let job = job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        Ok(JobStatusReport {
            id: job.id,
            status: job.status,
            stage: job.stage,
            progress: job.progress,
            error_message: job.error_message,
            error_type: job.error_type,
            started_at: job.started_at,
            completed_at: job.completed_at,
        })
    }

    /// Progress over all jobs of a document, newest first.
    pub fn document_progress(&self, document_id: &str) -> Result<DocumentProgress, QueueError> {
        let jobs = job_repo::find_by_document(&self.db, document_id)?;
        let (status, progress) = aggregate(&jobs);

        Ok(DocumentProgress {
            document_id: document_id.to_string(),
            status,
            progress,
            jobs: jobs
                .into_iter()
                .map(|job| JobProgress {
                    id: job.id,
                    status: job.status,
                    stage: job.stage,
                    progress: job.progress,
                    created_at: job.created_at,
                    started_at: job.started_at,
                    completed_at: job.completed_at,
                    error_message: job.error_message,
                })
                .collect(),
        })
    }
}

/// Overall document status: `failed` dominates, then all-`completed`, then
/// any-`processing`, else `queued`. Progress is the rounded mean over jobs.
fn aggregate(jobs: &[job_repo::JobRow]) -> (String, i64) {
    if jobs.is_empty() {
        return ("queued".to_string(), 0);
    }

    let any_failed = jobs.iter().any(|j| j.status == "failed");
    let all_completed = jobs.iter().all(|j| j.status == "completed");
    let any_processing = jobs.iter().any(|j| j.status == "processing");

    let status = if any_failed {
        "failed"
    } else if all_completed {
        "completed"
    } else if any_processing {
        "processing"
    } else {
        "queued"
    };

    let mean = jobs.iter().map(|j| j.progress as f64).sum::<f64>() / jobs.len() as f64;
    (status.to_string(), mean.round() as i64)
}
