use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use common::config::PurgeConfig;
use common::{ObjectRef, ObjectRefError};

use crate::backend::{ObjectStorage, StorageError};
use crate::manifest::{ManifestLine, ManifestReader};

/// Tuning of a deletion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeOptions {
    /// Concurrent delete workers; values below 1 are treated as 1.
    pub workers: usize,
    pub skip_header_rows: usize,
    /// Bound of the queue between the manifest reader and the workers.
    pub queue_capacity: usize,
}

impl Default for PurgeOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            skip_header_rows: 0,
            queue_capacity: 1,
        }
    }
}

impl From<&PurgeConfig> for PurgeOptions {
    fn from(config: &PurgeConfig) -> Self {
        Self {
            workers: config.workers,
            skip_header_rows: config.skip_header_rows,
            queue_capacity: config.queue_capacity,
        }
    }
}

/// Counters of a deletion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    pub lines_read: usize,
    pub header_rows_skipped: usize,
    pub blank_lines: usize,
    pub deleted: usize,
    pub already_absent: usize,
    pub failed: usize,
}

impl fmt::Display for PurgeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} line(s) read, {} deleted, {} already absent, {} failed",
            self.lines_read, self.deleted, self.already_absent, self.failed
        )
    }
}

/// One problem encountered after deletions started.
#[derive(Error, Debug)]
pub enum PurgeFailure {
    #[error(transparent)]
    Delete(StorageError),

    #[error("manifest line {line}: {source}")]
    InvalidEntry {
        line: usize,
        #[source]
        source: ObjectRefError,
    },

    #[error("reading manifest failed: {0}")]
    Read(#[source] io::Error),

    #[error("delete worker {0} stopped unexpectedly")]
    Worker(usize),
}

fn join_failures(failures: &[PurgeFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum PurgeError {
    #[error("invalid manifest location")]
    ManifestLocation(#[from] ObjectRefError),

    #[error("failed to open manifest {manifest}")]
    OpenManifest {
        manifest: ObjectRef,
        #[source]
        source: StorageError,
    },

    #[error("manifest {manifest} line {line} is not an object reference")]
    InvalidEntry {
        manifest: ObjectRef,
        line: usize,
        #[source]
        source: ObjectRefError,
    },

    #[error("failed to read manifest {manifest}")]
    ReadManifest {
        manifest: ObjectRef,
        #[source]
        source: io::Error,
    },

    #[error("purge cancelled with {} error(s) ({summary}): {}", .failures.len(), join_failures(.failures))]
    Cancelled {
        summary: PurgeSummary,
        failures: Vec<PurgeFailure>,
    },

    #[error("purge finished with {} error(s) ({summary}): {}", .failures.len(), join_failures(.failures))]
    Incomplete {
        summary: PurgeSummary,
        failures: Vec<PurgeFailure>,
    },
}

enum DeleteOutcome {
    Deleted,
    Absent,
    Failed(StorageError),
}

struct DeleteEvent {
    object: ObjectRef,
    outcome: DeleteOutcome,
}

#[derive(Default)]
struct Tally {
    deleted: usize,
    already_absent: usize,
    failures: Vec<PurgeFailure>,
}

/// Deletes every object listed in a manifest with a fixed pool of workers.
///
/// The manifest is read twice. The first pass validates every entry so a
/// malformed manifest fails before anything is deleted; the second pass
/// feeds the bounded work queue. Deletion order is unspecified.
#[derive(Debug, Clone)]
pub struct DeletionPipeline {
    storage: Arc<dyn ObjectStorage>,
    options: PurgeOptions,
    cancel: CancellationToken,
}

impl DeletionPipeline {
    pub fn new(storage: Arc<dyn ObjectStorage>, options: PurgeOptions) -> Self {
        Self {
            storage,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop dispatching new deletions once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Parse `manifest` as an object reference and purge what it lists.
    pub async fn run_from_location(&self, manifest: &str) -> Result<PurgeSummary, PurgeError> {
        let manifest = ObjectRef::parse(manifest)?;
        self.run(&manifest).await
    }

    pub async fn run(&self, manifest: &ObjectRef) -> Result<PurgeSummary, PurgeError> {
        let workers = self.options.workers.max(1);
        info!(
            manifest = %manifest,
            workers,
            skip_header_rows = self.options.skip_header_rows,
            "Starting purge"
        );

        let entries = self.validate(manifest).await?;
        debug!(manifest = %manifest, entries, "Manifest validated");

        let (work_tx, work_rx) = mpsc::channel::<ObjectRef>(self.options.queue_capacity.max(1));
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (event_tx, event_rx) = mpsc::channel::<DeleteEvent>(workers * 2);

        let aggregator = tokio::spawn(aggregate(event_rx));

        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|id| {
                tokio::spawn(delete_worker(
                    id,
                    self.storage.clone(),
                    work_rx.clone(),
                    event_tx.clone(),
                    self.cancel.clone(),
                ))
            })
            .collect();
        drop(event_tx);

        let (mut summary, mut failures) = self.dispatch(manifest, work_tx).await;

        for (id, handle) in handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!(worker = id, error = %e, "Delete worker failed");
                failures.push(PurgeFailure::Worker(id));
            }
        }

        let tally = aggregator.await.unwrap_or_else(|e| {
            error!(error = %e, "Purge aggregator failed");
            Tally::default()
        });

        let mut all_failures = tally.failures;
        all_failures.append(&mut failures);

        summary.deleted = tally.deleted;
        summary.already_absent = tally.already_absent;
        summary.failed = all_failures.len();

        info!(manifest = %manifest, %summary, "Purge finished");

        if self.cancel.is_cancelled() {
            return Err(PurgeError::Cancelled {
                summary,
                failures: all_failures,
            });
        }
        if !all_failures.is_empty() {
            return Err(PurgeError::Incomplete {
                summary,
                failures: all_failures,
            });
        }
        Ok(summary)
    }

    async fn open(&self, manifest: &ObjectRef) -> Result<ManifestReader, PurgeError> {
        let reader = self
            .storage
            .open(manifest)
            .await
            .map_err(|source| PurgeError::OpenManifest {
                manifest: manifest.clone(),
                source,
            })?;
        Ok(ManifestReader::new(reader, self.options.skip_header_rows))
    }

    /// First pass: every non-header, non-blank line must parse. Returns the entry count.
    async fn validate(&self, manifest: &ObjectRef) -> Result<usize, PurgeError> {
        let mut reader = self.open(manifest).await?;
        let mut entries = 0;

        loop {
            let next = reader
                .next_line()
                .await
                .map_err(|source| PurgeError::ReadManifest {
                    manifest: manifest.clone(),
                    source,
                })?;
            match next {
                None => return Ok(entries),
                Some((_, ManifestLine::Entry(Ok(_)))) => entries += 1,
                Some((line, ManifestLine::Entry(Err(source)))) => {
                    return Err(PurgeError::InvalidEntry {
                        manifest: manifest.clone(),
                        line,
                        source,
                    });
                }
                Some(_) => {}
            }
        }
    }

    /// Second pass: queue every entry. Dropping `work_tx` on return lets the workers drain and exit.
    async fn dispatch(
        &self,
        manifest: &ObjectRef,
        work_tx: mpsc::Sender<ObjectRef>,
    ) -> (PurgeSummary, Vec<PurgeFailure>) {
        let mut summary = PurgeSummary::default();
        let mut failures = Vec::new();

        let mut reader = match self.open(manifest).await {
            Ok(reader) => reader,
            Err(e) => {
                failures.push(PurgeFailure::Read(io::Error::other(e.to_string())));
                return (summary, failures);
            }
        };

        loop {
            let next = match reader.next_line().await {
                Ok(next) => next,
                Err(e) => {
                    error!(manifest = %manifest, error = %e, "Reading manifest failed");
                    failures.push(PurgeFailure::Read(e));
                    break;
                }
            };
            let Some((line, parsed)) = next else { break };
            summary.lines_read += 1;

            let object = match parsed {
                ManifestLine::Header => {
                    summary.header_rows_skipped += 1;
                    continue;
                }
                ManifestLine::Blank => {
                    summary.blank_lines += 1;
                    continue;
                }
                ManifestLine::Entry(Ok(object)) => object,
                ManifestLine::Entry(Err(source)) => {
                    failures.push(PurgeFailure::InvalidEntry { line, source });
                    continue;
                }
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!(manifest = %manifest, line, "Purge cancelled, no further deletions are queued");
                    break;
                }
                sent = work_tx.send(object) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }

        (summary, failures)
    }
}

async fn delete_worker(
    id: usize,
    storage: Arc<dyn ObjectStorage>,
    queue: Arc<Mutex<mpsc::Receiver<ObjectRef>>>,
    events: mpsc::Sender<DeleteEvent>,
    cancel: CancellationToken,
) {
    debug!(worker = id, "Delete worker started");
    loop {
        let next = {
            let mut rx = queue.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = rx.recv() => next,
            }
        };
        let Some(object) = next else { break };

        let outcome = match storage.delete(&object).await {
            Ok(()) => DeleteOutcome::Deleted,
            Err(e) if e.is_not_found() => DeleteOutcome::Absent,
            Err(e) => DeleteOutcome::Failed(e),
        };

        if events.send(DeleteEvent { object, outcome }).await.is_err() {
            break;
        }
    }
    debug!(worker = id, "Delete worker stopped");
}

/// Sole owner of the run's counters; ends once every worker has hung up.
async fn aggregate(mut events: mpsc::Receiver<DeleteEvent>) -> Tally {
    let mut tally = Tally::default();
    while let Some(DeleteEvent { object, outcome }) = events.recv().await {
        match outcome {
            DeleteOutcome::Deleted => {
                info!(object = %object, "Deleted");
                tally.deleted += 1;
            }
            DeleteOutcome::Absent => {
                info!(object = %object, "NotExist");
                tally.already_absent += 1;
            }
            DeleteOutcome::Failed(e) => {
                error!(object = %object, error = %e, "Delete failed");
                tally.failures.push(PurgeFailure::Delete(e));
            }
        }
    }
    tally
}
