// * Minhash Generation Phase
// * Producer / worker-pool / collector pipeline. The producer streams corpus
// * documents from the last checkpoint, workers compute signatures, and a
// * single collector reassembles offset order and commits fixed-size batches
// * through the store's transaction machinery.

use crate::config::constants::{DEFAULT_WORKER_COUNT, MINHASH_BATCH_SIZE};
use crate::corpus::reader::{CorpusError, CorpusReader};
use crate::engine::minhash::{Signature, SignatureBuilder};
use crate::persistence::minhash_store::{MinhashRecord, MinhashStore, StoreError};
use std::cmp::Ordering as CmpOrdering;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{info, warn};

// * Bound on in-flight jobs; producer backpressure when the pool is behind
const JOB_QUEUE_DEPTH: usize = 1024;

// * Unified Error type for the generation phase
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("Corpus error: {0}")]
    Corpus(#[from] CorpusError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Configuration for the generation phase
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Number of signature workers
    pub worker_count: usize,
    /// Documents per committed batch
    pub batch_size: usize,
    /// Mirror target for the working directory after each commit
    pub backup_dir: Option<PathBuf>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            batch_size: MINHASH_BATCH_SIZE,
            backup_dir: None,
        }
    }
}

/// Outcome of a generation run
#[derive(Debug, Clone)]
pub struct GenerateSummary {
    /// Records committed during this run
    pub committed: u64,
    /// Documents that fell back to the sentinel signature
    pub failed: u64,
    /// True when a shutdown signal cut the run short
    pub interrupted: bool,
}

// * Heap entry ordered by offset so the collector can restore corpus order
struct PendingRecord {
    offset: u64,
    signature: Signature,
}

impl PartialEq for PendingRecord {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
    }
}

impl Eq for PendingRecord {}

impl PartialOrd for PendingRecord {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingRecord {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.offset.cmp(&other.offset)
    }
}

/// Runs the minhash generation phase to completion or clean shutdown
///
/// Resumes from the store's checkpoint. A shutdown signal is only honored
/// between batch transactions, so a commit in flight always finishes; a
/// partial tail batch is committed only at natural end-of-corpus.
pub async fn generate_minhashes(
    corpus: &CorpusReader,
    store: &MinhashStore,
    config: GeneratorConfig,
) -> Result<GenerateSummary, GenerateError> {
    let resume_offset = store.resume_offset()?;
    let statistics = corpus.statistics()?;
    info!(
        document_count = statistics.document_count,
        resume_offset,
        workers = config.worker_count,
        "Starting minhash generation"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, finishing in-flight batch");
            let _ = shutdown_tx.send(true);
        }
    });

    run_pipeline(corpus, store, config, resume_offset, shutdown_rx).await
}

async fn run_pipeline(
    corpus: &CorpusReader,
    store: &MinhashStore,
    config: GeneratorConfig,
    resume_offset: u64,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<GenerateSummary, GenerateError> {
    let worker_count = config.worker_count.max(1);
    let batch_size = config.batch_size.max(1);

    // * Producer: stream documents into the bounded job queue
    let (job_tx, job_rx) = mpsc::channel::<(u64, String)>(JOB_QUEUE_DEPTH);
    let documents = corpus.documents(resume_offset)?;
    let producer_shutdown = shutdown_rx.clone();
    let producer: tokio::task::JoinHandle<Result<(), CorpusError>> =
        tokio::task::spawn_blocking(move || {
            for document in documents {
                let (offset, text) = document?;
                if *producer_shutdown.borrow() {
                    break;
                }
                if job_tx.blocking_send((offset, text)).is_err() {
                    break;
                }
            }
            Ok(())
        });

    // * Worker pool: compute signatures, falling back to the sentinel on a
    // * per-document failure instead of aborting the run
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (result_tx, mut result_rx) = mpsc::channel::<(u64, Signature)>(JOB_QUEUE_DEPTH);
    let builder = Arc::new(SignatureBuilder::new());
    let failed = Arc::new(AtomicU64::new(0));

    let mut workers = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let job_rx = Arc::clone(&job_rx);
        let result_tx = result_tx.clone();
        let builder = Arc::clone(&builder);
        let failed = Arc::clone(&failed);
        workers.push(tokio::spawn(async move {
            loop {
                let job = { job_rx.lock().await.recv().await };
                let Some((offset, text)) = job else { break };

                let signature = match catch_unwind(AssertUnwindSafe(|| builder.build(&text))) {
                    Ok(signature) => signature,
                    Err(_) => {
                        warn!(
                            offset,
                            document_bytes = text.len(),
                            "Minhash generation failed, emitting sentinel signature"
                        );
                        failed.fetch_add(1, Ordering::Relaxed);
                        builder.sentinel()
                    }
                };

                if result_tx.send((offset, signature)).await.is_err() {
                    break;
                }
            }
        }));
    }
    drop(result_tx);
    // * Only workers keep the job receiver alive; when they exit the channel
    // * closes and unblocks the producer
    drop(job_rx);

    // * Collector: restore offset order, assemble batches, commit
    let mut pending: BinaryHeap<Reverse<PendingRecord>> = BinaryHeap::new();
    let mut batch: Vec<MinhashRecord> = Vec::with_capacity(batch_size);
    let mut next_offset = resume_offset;
    let mut committed = 0u64;
    let mut interrupted = false;

    'collect: while let Some((offset, signature)) = result_rx.recv().await {
        pending.push(Reverse(PendingRecord { offset, signature }));

        while pending
            .peek()
            .is_some_and(|entry| entry.0.offset == next_offset)
        {
            let Reverse(record) = pending.pop().expect("peeked entry");
            batch.push(MinhashRecord {
                offset: record.offset,
                signature: record.signature,
            });
            next_offset += 1;

            if batch.len() == batch_size {
                commit_batch(store, &batch, &config)?;
                committed += batch.len() as u64;
                batch.clear();

                if *shutdown_rx.borrow() {
                    interrupted = true;
                    break 'collect;
                }
            }
        }
    }

    // * Closing the result channel lets workers drain out even when the
    // * collector stopped early
    drop(result_rx);
    for worker in workers {
        worker.await?;
    }
    producer.await??;

    interrupted = interrupted || *shutdown_rx.borrow();

    // * Drain records already in order, then flush the tail batch; a run cut
    // * short by shutdown leaves the tail for the next start instead
    if !interrupted {
        while pending
            .peek()
            .is_some_and(|entry| entry.0.offset == next_offset)
        {
            let Reverse(record) = pending.pop().expect("peeked entry");
            batch.push(MinhashRecord {
                offset: record.offset,
                signature: record.signature,
            });
            next_offset += 1;

            if batch.len() == batch_size {
                commit_batch(store, &batch, &config)?;
                committed += batch.len() as u64;
                batch.clear();
            }
        }

        if !batch.is_empty() {
            commit_batch(store, &batch, &config)?;
            committed += batch.len() as u64;
            batch.clear();
        }
    }

    let summary = GenerateSummary {
        committed,
        failed: failed.load(Ordering::Relaxed),
        interrupted,
    };
    info!(
        committed = summary.committed,
        failed = summary.failed,
        interrupted = summary.interrupted,
        "Minhash generation stopped"
    );
    Ok(summary)
}

fn commit_batch(
    store: &MinhashStore,
    batch: &[MinhashRecord],
    config: &GeneratorConfig,
) -> Result<(), GenerateError> {
    store.commit_batch(batch)?;
    if let Some(backup_dir) = &config.backup_dir {
        info!(backup_dir = %backup_dir.display(), "Mirroring working directory to backup");
        store.mirror_to(backup_dir)?;
    }
    Ok(())
}
