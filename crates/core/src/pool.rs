//! Bounded parallel ingestion of a batch of PDFs.

use crate::error::IngestError;
use crate::models::{ArchivedDocument, ContentDigest, IngestOutcome};
use crate::orchestrator::Ingestor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A unit of per-file work the pool can schedule.
pub trait IngestJob: Send + Sync + 'static {
    fn ingest(&self, source: &Path) -> Result<IngestOutcome, IngestError>;
}

impl IngestJob for Ingestor {
    fn ingest(&self, source: &Path) -> Result<IngestOutcome, IngestError> {
        Ingestor::ingest(self, source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
}

impl BatchProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.completed as f64 / self.total as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    Completed,
    /// Cancellation arrived while files were still waiting to be dispatched.
    Cancelled,
    /// A worker panicked; nothing further was dispatched.
    Aborted { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedPdf {
    pub path: PathBuf,
    pub reason: String,
}

/// How a single file's task settled.
#[derive(Debug)]
pub enum TaskOutcome {
    Archived(Box<ArchivedDocument>),
    Duplicate(ContentDigest),
    Failed(FailedPdf),
}

impl TaskOutcome {
    fn settle(path: PathBuf, result: Result<IngestOutcome, IngestError>) -> (PathBuf, Self) {
        let outcome = match result {
            Ok(IngestOutcome::Archived(document)) => Self::Archived(document),
            Ok(IngestOutcome::Duplicate { digest }) => Self::Duplicate(digest),
            Err(failure) => Self::Failed(FailedPdf {
                path: path.clone(),
                reason: failure.to_string(),
            }),
        };
        (path, outcome)
    }
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub status: BatchStatus,
    pub total: usize,
    pub completed: usize,
    pub archived: usize,
    pub duplicates: usize,
    pub failures: Vec<FailedPdf>,
}

impl BatchReport {
    fn new(total: usize) -> Self {
        Self {
            status: BatchStatus::Completed,
            total,
            completed: 0,
            archived: 0,
            duplicates: 0,
            failures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// A pool of at least one worker.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `job` over `files` with at most `workers` blocking tasks in
    /// flight. `cancel` is checked before every dispatch; tasks already
    /// running are always awaited.
    pub async fn run<J: IngestJob>(
        &self,
        files: Vec<PathBuf>,
        job: Arc<J>,
        cancel: CancellationToken,
        mut on_progress: impl FnMut(BatchProgress),
    ) -> BatchReport {
        let total = files.len();
        let mut report = BatchReport::new(total);
        let mut pending = files.into_iter();
        let mut tasks = JoinSet::new();
        let mut abort_reason: Option<String> = None;

        info!(total, workers = self.workers, "batch started");

        loop {
            while abort_reason.is_none() && tasks.len() < self.workers && !cancel.is_cancelled() {
                let Some(path) = pending.next() else {
                    break;
                };
                let job = Arc::clone(&job);
                tasks.spawn_blocking(move || {
                    let result = job.ingest(&path);
                    TaskOutcome::settle(path, result)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            match joined {
                Ok((path, TaskOutcome::Archived(document))) => {
                    debug!(
                        source = %path.display(),
                        pdf = %document.pdf_path.display(),
                        "task archived"
                    );
                    report.archived += 1;
                }
                Ok((path, TaskOutcome::Duplicate(digest))) => {
                    debug!(source = %path.display(), %digest, "task found duplicate");
                    report.duplicates += 1;
                }
                Ok((_, TaskOutcome::Failed(failure))) => {
                    warn!(source = %failure.path.display(), error = %failure.reason, "ingest failed");
                    report.failures.push(failure);
                }
                Err(join_error) => {
                    error!(error = %join_error, "worker task died, stopping dispatch");
                    abort_reason.get_or_insert_with(|| join_error.to_string());
                }
            }

            report.completed += 1;
            on_progress(BatchProgress {
                completed: report.completed,
                total,
            });
        }

        let undispatched = pending.len();
        report.status = match abort_reason {
            Some(reason) => BatchStatus::Aborted { reason },
            None if undispatched > 0 => BatchStatus::Cancelled,
            None => BatchStatus::Completed,
        };

        info!(
            completed = report.completed,
            archived = report.archived,
            duplicates = report.duplicates,
            failed = report.failures.len(),
            undispatched,
            status = ?report.status,
            "batch finished"
        );
        report
    }
}
