use crate::classify::{classify, ErrorClass, SyncError};
use crate::normalize::normalize_all;
use dash_types::{Record, StoreError, Table, TabularStore};
use rand::Rng;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

pub const MIN_CHUNK_SIZE: usize = 10;
pub const MAX_CHUNK_SIZE: usize = 200;
pub const INITIAL_CHUNK_SIZE: usize = 100;
/// Attempts per batch for failures that shrinking cannot help.
pub const MAX_ATTEMPTS: usize = 3;

/// Records per upsert, kept within `[MIN_CHUNK_SIZE, MAX_CHUNK_SIZE]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkSize(usize);

impl ChunkSize {
    pub fn get(&self) -> usize {
        self.0
    }

    /// Halves the size. Returns `false` when already at the floor.
    pub fn shrink(&mut self) -> bool {
        if self.0 <= MIN_CHUNK_SIZE {
            return false;
        }
        self.0 = (self.0 / 2).max(MIN_CHUNK_SIZE);
        true
    }

    pub fn grow(&mut self) {
        self.0 = (self.0 * 2).min(MAX_CHUNK_SIZE);
    }
}

impl Default for ChunkSize {
    fn default() -> Self {
        Self(INITIAL_CHUNK_SIZE)
    }
}

#[derive(Clone, Debug)]
pub enum Phase {
    /// Next batch has to be cut at the current chunk size.
    Sizing,
    Attempting { batch: Range<usize>, attempt: usize },
    Succeeded { written: usize },
    Exhausted(SyncError),
}

/// What the driver has to do next.
#[derive(Clone, Debug)]
pub enum Step {
    Send(Range<usize>),
    /// Pause, then send the same batch again.
    Retry { batch: Range<usize>, attempt: usize },
    Written { written: usize, total: usize },
    Done,
    Failed(SyncError),
}

/// Shrink/grow/retry bookkeeping of one upload call, free of I/O and timers.
#[derive(Clone, Debug)]
pub struct UploadMachine {
    table: Table,
    total: usize,
    offset: usize,
    size: ChunkSize,
    phase: Phase,
    batches: usize,
    retries: usize,
    sends: usize,
}

impl UploadMachine {
    pub fn new(table: Table, total: usize) -> Self {
        Self {
            table,
            total,
            offset: 0,
            size: ChunkSize::default(),
            phase: Phase::Sizing,
            batches: 0,
            retries: 0,
            sends: 0,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn chunk_size(&self) -> usize {
        self.size.get()
    }

    pub fn written(&self) -> usize {
        self.offset
    }

    /// Cuts the next batch, or reports that everything has been written.
    pub fn next_batch(&mut self) -> Step {
        match &self.phase {
            Phase::Exhausted(err) => return Step::Failed(err.clone()),
            Phase::Attempting { batch, .. } => return Step::Send(batch.clone()),
            Phase::Sizing | Phase::Succeeded { .. } => (),
        }
        if self.offset >= self.total {
            return Step::Done;
        }
        let batch = self.offset..(self.offset + self.size.get()).min(self.total);
        self.phase = Phase::Attempting {
            batch: batch.clone(),
            attempt: 1,
        };
        self.sends += 1;
        Step::Send(batch)
    }

    /// Feeds back the outcome of the batch that was last handed out.
    pub fn record(&mut self, outcome: Result<(), StoreError>) -> Step {
        let (batch, attempt) = match &self.phase {
            Phase::Attempting { batch, attempt } => (batch.clone(), *attempt),
            Phase::Exhausted(err) => return Step::Failed(err.clone()),
            Phase::Sizing | Phase::Succeeded { .. } => return self.next_batch(),
        };
        let err = match outcome {
            Ok(()) => {
                self.offset = batch.end;
                self.batches += 1;
                self.size.grow();
                self.phase = Phase::Succeeded {
                    written: self.offset,
                };
                return Step::Written {
                    written: self.offset,
                    total: self.total,
                };
            }
            Err(err) => err,
        };
        match classify(&err) {
            ErrorClass::CapacityExceeded if batch.len() > MIN_CHUNK_SIZE => {
                // Halve what was actually sent, so a short tail batch shrinks too.
                self.size = ChunkSize(batch.len().min(self.size.get()));
                self.size.shrink();
                log::warn!(
                    "{}: batch of {} at row {} exceeded store capacity ({err}), retrying with {}",
                    self.table,
                    batch.len(),
                    batch.start,
                    self.size.get()
                );
                self.phase = Phase::Sizing;
                self.next_batch()
            }
            ErrorClass::CapacityExceeded | ErrorClass::Transient if attempt < MAX_ATTEMPTS => {
                log::warn!(
                    "{}: attempt {attempt}/{MAX_ATTEMPTS} for rows {}..{} failed: {err}",
                    self.table,
                    batch.start,
                    batch.end
                );
                self.retries += 1;
                self.sends += 1;
                self.phase = Phase::Attempting {
                    batch: batch.clone(),
                    attempt: attempt + 1,
                };
                Step::Retry {
                    batch,
                    attempt: attempt + 1,
                }
            }
            _ => {
                let err =
                    SyncError::from_store(self.table, err, Some(batch.start), batch.len(), attempt);
                self.phase = Phase::Exhausted(err.clone());
                Step::Failed(err)
            }
        }
    }

    fn report(&self) -> UploadReport {
        UploadReport {
            table: self.table,
            written: self.offset,
            batches: self.batches,
            retries: self.retries,
            sends: self.sends,
            final_chunk_size: self.size.get(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadReport {
    pub table: Table,
    pub written: usize,
    pub batches: usize,
    pub retries: usize,
    /// Upsert requests issued, retries included.
    pub sends: usize,
    pub final_chunk_size: usize,
}

#[derive(Clone, Debug)]
pub struct UploadOptions {
    /// Fixed part of the pause before a retry.
    pub retry_base: Duration,
    /// Upper bound of the random part added to `retry_base`.
    pub retry_jitter: Duration,
    /// Pause after every written batch; zero only yields to the scheduler.
    pub batch_pause: Duration,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            retry_base: Duration::from_millis(1000),
            retry_jitter: Duration::from_millis(1000),
            batch_pause: Duration::ZERO,
        }
    }
}

impl UploadOptions {
    pub fn from_env() -> Self {
        let default = Self::default();
        let millis = |key: &str, default: Duration| {
            envmnt::get_parse::<_, u64, _>(key)
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        Self {
            retry_base: millis("UPLOAD_RETRY_BASE_MS", default.retry_base),
            retry_jitter: millis("UPLOAD_RETRY_JITTER_MS", default.retry_jitter),
            batch_pause: millis("UPLOAD_BATCH_PAUSE_MS", default.batch_pause),
        }
    }

    fn retry_delay(&self) -> Duration {
        let jitter = self.retry_jitter.as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=jitter);
        self.retry_base + Duration::from_millis(jitter)
    }
}

/// Writes record sets into the store in adaptively sized, strictly sequential batches.
#[derive(Clone)]
pub struct BatchUploader {
    store: Arc<dyn TabularStore>,
    options: UploadOptions,
}

impl BatchUploader {
    pub fn new(store: Arc<dyn TabularStore>, options: UploadOptions) -> Self {
        Self { store, options }
    }

    /// Normalizes `records` and upserts them into `table` under its conflict key.
    ///
    /// `on_progress` receives `(0, total)` up front and `(written, total)` after every
    /// batch. It runs inline: a panic in it aborts the upload. On error, batches reported
    /// as written stay in the store.
    pub async fn upload<F>(
        &self,
        table: Table,
        records: Vec<Record>,
        mut on_progress: F,
    ) -> Result<UploadReport, SyncError>
    where
        F: FnMut(usize, usize),
    {
        let records = normalize_all(table, records)?;
        let total = records.len();
        let conflict_key = table.conflict_key();
        let mut machine = UploadMachine::new(table, total);
        log::info!("{table}: uploading {total} records");
        on_progress(0, total);

        let mut step = machine.next_batch();
        loop {
            step = match step {
                Step::Send(batch) => {
                    let outcome = self
                        .store
                        .upsert(table, &records[batch], conflict_key)
                        .await;
                    machine.record(outcome)
                }
                Step::Retry { batch, attempt } => {
                    let delay = self.options.retry_delay();
                    log::debug!("{table}: attempt {attempt} for rows {batch:?} in {delay:?}");
                    tokio::time::sleep(delay).await;
                    let outcome = self
                        .store
                        .upsert(table, &records[batch], conflict_key)
                        .await;
                    machine.record(outcome)
                }
                Step::Written { written, total } => {
                    log::debug!("{table}: {written}/{total} written");
                    on_progress(written, total);
                    self.pause().await;
                    machine.next_batch()
                }
                Step::Done => {
                    let report = machine.report();
                    log::info!(
                        "{table}: {} records written in {} batches ({} retries)",
                        report.written,
                        report.batches,
                        report.retries
                    );
                    return Ok(report);
                }
                Step::Failed(err) => {
                    log::error!("{table}: upload stopped at {}/{total}: {err}", machine.written());
                    return Err(err);
                }
            };
        }
    }

    async fn pause(&self) {
        if self.options.batch_pause.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.options.batch_pause).await;
        }
    }
}
