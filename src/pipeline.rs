use alloy::primitives::{Address, U256};
use futures::{stream, TryStreamExt};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::balances::batcher::BalanceBatcher;
use crate::config::Config;
use crate::error::{PipelineFailure, SnapshotError};
use crate::indexer::client::LedgerClient;
use crate::indexer::scanner::ParticipantScanner;
use crate::indexer::types::{BalanceSnapshot, BatchJob};
use crate::output::SnapshotSink;
use crate::participants::{self, ParticipantSet};

/// Lifecycle of a snapshot run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    Init,
    Discovering,
    Sampling,
    Draining,
    Done,
    Failed,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Discovering => "discovering",
            Self::Sampling => "sampling",
            Self::Draining => "draining",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the participant set comes from.
#[derive(Debug, Clone)]
pub enum ParticipantSource {
    /// Scan the configured block range for senders to the token contract.
    Scan,
    /// Read a single-column `address` CSV. Trusted as-is.
    Precomputed(PathBuf),
    /// An already-built set.
    Supplied(ParticipantSet),
}

impl ParticipantSource {
    pub fn from_config(config: &Config) -> Self {
        if config.participants.use_precomputed {
            Self::Precomputed(config.participants.precomputed_path.clone())
        } else {
            Self::Scan
        }
    }
}

/// What a completed run reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub participants: usize,
    pub sampled_blocks: usize,
    pub jobs: usize,
    pub rows_written: usize,
    pub balances_unavailable: usize,
    pub destination: String,
}

#[derive(Default)]
struct DrainStats {
    rows_written: AtomicUsize,
    balances_unavailable: AtomicUsize,
    jobs_done: AtomicUsize,
}

/// Drives one snapshot run: discover holders, sample heights, fetch balances, write rows.
pub struct SnapshotPipeline {
    config: Config,
    token: Address,
    aggregator: Address,
    client: Arc<dyn LedgerClient>,
    phase: PipelinePhase,
}

impl SnapshotPipeline {
    /// Validate `config` and build the pipeline. Makes no network calls.
    pub fn new(config: Config, client: Arc<dyn LedgerClient>) -> Result<Self, PipelineFailure> {
        let init_failure = |source| PipelineFailure {
            phase: PipelinePhase::Init,
            source,
        };
        config.validate().map_err(init_failure)?;
        let token = config.token_address().map_err(init_failure)?;
        let aggregator = config.multicall_address().map_err(init_failure)?;

        Ok(Self {
            config,
            token,
            aggregator,
            client,
            phase: PipelinePhase::Init,
        })
    }

    pub fn phase(&self) -> PipelinePhase {
        self.phase
    }

    /// Run to completion. Rows already flushed to `sink` stay there if the run fails.
    pub async fn run<S: SnapshotSink>(
        &mut self,
        source: ParticipantSource,
        sink: Arc<Mutex<S>>,
        shutdown: &CancellationToken,
    ) -> Result<RunSummary, PipelineFailure> {
        self.run_deferred(source, move || Ok(sink), shutdown).await
    }

    /// Like `run`, but `open_sink` is only called once participants are resolved, so a
    /// failed discovery never touches the destination.
    pub async fn run_deferred<S, F>(
        &mut self,
        source: ParticipantSource,
        open_sink: F,
        shutdown: &CancellationToken,
    ) -> Result<RunSummary, PipelineFailure>
    where
        S: SnapshotSink,
        F: FnOnce() -> Result<Arc<Mutex<S>>, SnapshotError>,
    {
        match self.drive(source, open_sink, shutdown).await {
            Ok(summary) => {
                self.enter(PipelinePhase::Done);
                Ok(summary)
            }
            Err(source) => {
                let phase = self.phase;
                self.enter(PipelinePhase::Failed);
                Err(PipelineFailure { phase, source })
            }
        }
    }

    async fn drive<S, F>(
        &mut self,
        source: ParticipantSource,
        open_sink: F,
        shutdown: &CancellationToken,
    ) -> Result<RunSummary, SnapshotError>
    where
        S: SnapshotSink,
        F: FnOnce() -> Result<Arc<Mutex<S>>, SnapshotError>,
    {
        let start_block = self.config.range.start_block;
        let end_block = self.config.range.end_block;

        self.enter(PipelinePhase::Discovering);
        let chain_tip = self.client.latest_block_number().await?;
        if end_block > chain_tip {
            return Err(SnapshotError::Configuration(format!(
                "end_block {} is ahead of the chain tip {}",
                end_block, chain_tip
            )));
        }

        let participants = self.discover(source, shutdown).await?;
        if let Some(path) = &self.config.participants.export_path {
            participants::export_participants(path, &participants)?;
        }
        tracing::info!(participants = participants.len(), "Participants resolved");

        self.enter(PipelinePhase::Sampling);
        let jobs = plan_jobs(
            start_block,
            end_block,
            self.config.range.block_step,
            self.config.range.batch_size,
        );
        let sampled_blocks: usize = jobs.iter().map(|job| job.heights.len()).sum();
        tracing::info!(
            sampled_blocks,
            jobs = jobs.len(),
            step = self.config.range.block_step,
            "Block sampling planned"
        );
        let sink = open_sink()?;

        self.enter(PipelinePhase::Draining);
        let stats = self.drain(&participants, &jobs, &sink, shutdown).await?;

        let mut sink = sink.lock().await;
        sink.flush()?;

        Ok(RunSummary {
            participants: participants.len(),
            sampled_blocks,
            jobs: jobs.len(),
            rows_written: stats.rows_written.load(Ordering::SeqCst),
            balances_unavailable: stats.balances_unavailable.load(Ordering::SeqCst),
            destination: sink.destination(),
        })
    }

    async fn discover(
        &self,
        source: ParticipantSource,
        shutdown: &CancellationToken,
    ) -> Result<ParticipantSet, SnapshotError> {
        match source {
            ParticipantSource::Scan => {
                let scanner = ParticipantScanner::new(
                    self.client.clone(),
                    self.token,
                    self.config.scan.window_size,
                    self.config.scan.concurrency,
                );
                scanner
                    .scan(
                        self.config.range.start_block,
                        self.config.range.end_block,
                        shutdown,
                    )
                    .await
            }
            ParticipantSource::Precomputed(path) => participants::load_precomputed(&path),
            ParticipantSource::Supplied(set) => Ok(set),
        }
    }

    async fn drain<S: SnapshotSink>(
        &self,
        participants: &ParticipantSet,
        jobs: &[BatchJob],
        sink: &Mutex<S>,
        shutdown: &CancellationToken,
    ) -> Result<DrainStats, SnapshotError> {
        let batcher = BalanceBatcher::new(
            self.client.clone(),
            self.token,
            self.aggregator,
            self.config.balances.multicall_chunk_size,
            self.config.balances.fallback_concurrency,
        );
        let threshold = U256::from(self.config.balances.wei_threshold);
        let stats = DrainStats::default();
        let total_jobs = jobs.len();

        stream::iter(jobs.iter().map(Ok::<_, SnapshotError>))
            .try_for_each_concurrent(self.config.balances.job_concurrency, |job| {
                let batcher = &batcher;
                let stats = &stats;
                async move {
                    process_job(batcher, participants, job, threshold, sink, stats, shutdown)
                        .await?;

                    let done = stats.jobs_done.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::info!(
                        job = job.index,
                        from = job.first().unwrap_or_default(),
                        to = job.last().unwrap_or_default(),
                        progress = %format!("{}%", done * 100 / total_jobs.max(1)),
                        "Batch job complete"
                    );
                    Ok(())
                }
            })
            .await?;

        Ok(stats)
    }

    fn enter(&mut self, phase: PipelinePhase) {
        tracing::debug!(from = %self.phase, to = %phase, "Pipeline phase change");
        self.phase = phase;
    }
}

/// Fetch, filter and write every sampled height of one job, in ascending order.
/// All rows of a block are written in one locked section so they stay contiguous.
async fn process_job<S: SnapshotSink>(
    batcher: &BalanceBatcher,
    participants: &ParticipantSet,
    job: &BatchJob,
    threshold: U256,
    sink: &Mutex<S>,
    stats: &DrainStats,
    shutdown: &CancellationToken,
) -> Result<(), SnapshotError> {
    for &height in &job.heights {
        if shutdown.is_cancelled() {
            return Err(SnapshotError::Cancelled);
        }

        let balances = batcher.fetch_balances(participants.as_slice(), height).await;

        let mut rows = Vec::new();
        for (address, result) in balances {
            match result {
                Ok(balance) if balance >= threshold => {
                    rows.push(BalanceSnapshot::new(height, address, balance));
                }
                Ok(_) => {}
                Err(e) => {
                    stats.balances_unavailable.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!(
                        block = height,
                        address = %address,
                        error = %e,
                        "Balance unavailable, skipping"
                    );
                }
            }
        }

        if !rows.is_empty() {
            let mut sink = sink.lock().await;
            sink.write_rows(&rows)?;
            sink.flush()?;
        }
        stats.rows_written.fetch_add(rows.len(), Ordering::SeqCst);
        tracing::debug!(block = height, rows = rows.len(), "Block snapshot written");
    }
    Ok(())
}

/// Sample `start, start + step, …` up to `end` and group the heights into jobs covering
/// consecutive `batch_size`-wide ranges starting at `start`. Ranges with no sampled height
/// produce no job.
pub fn plan_jobs(start: u64, end: u64, step: u64, batch_size: u64) -> Vec<BatchJob> {
    let step = step.max(1);
    let batch_size = batch_size.max(1);
    let mut jobs: Vec<BatchJob> = Vec::new();
    let mut current_slot = None;

    let mut height = start;
    while height <= end {
        let slot = (height - start) / batch_size;
        if current_slot == Some(slot) {
            if let Some(job) = jobs.last_mut() {
                job.heights.push(height);
            }
        } else {
            jobs.push(BatchJob {
                index: jobs.len(),
                heights: vec![height],
            });
            current_slot = Some(slot);
        }

        match height.checked_add(step) {
            Some(next) => height = next,
            None => break,
        }
    }
    jobs
}
