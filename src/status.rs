//! Shared worker state, observable while a job runs
//!
//! A single [StatusBoard] is created up front and shared between the
//! flashing worker, which is its only writer, and any number of readers
//! polling for progress. Every status change is also appended to a bounded
//! [LogBuffer], so a reader that keeps its cursor sees each message once.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Condvar, Mutex, MutexGuard, PoisonError, RwLock,
    },
    time::Duration,
};

use strum::{Display, FromRepr};

use crate::{error::Error, image::FlashJob};

/// Number of log entries kept before the oldest are dropped
pub const DEFAULT_LOG_CAPACITY: usize = 512;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Where the worker currently is in a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, FromRepr)]
#[repr(u8)]
pub enum Stage {
    #[default]
    Idle,
    EnteringBootloader,
    Connecting,
    NegotiatingBaud,
    Erasing,
    Writing,
    Finishing,
}

/// How the last job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    /// The job stopped at the first error, described here
    Failed(String),
}

/// A batch of log entries returned by [LogBuffer::since]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogPage {
    pub entries: Vec<String>,
    /// Cursor to pass on the next call
    pub next_cursor: usize,
}

#[derive(Debug, Default)]
struct LogInner {
    entries: VecDeque<String>,
    /// Index of `entries[0]` in the full history
    first: usize,
}

/// Append-only, bounded history of status messages
///
/// Entries are addressed by their position in the full history. Once more
/// than `capacity` entries have been appended the oldest are evicted; a
/// reader whose cursor points at an evicted entry continues from the oldest
/// one still held.
#[derive(Debug)]
pub struct LogBuffer {
    inner: RwLock<LogInner>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::default(),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, returning its index
    pub fn append(&self, entry: impl Into<String>) -> usize {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        inner.entries.push_back(entry.into());
        while inner.entries.len() > self.capacity {
            inner.entries.pop_front();
            inner.first += 1;
        }

        inner.first + inner.entries.len() - 1
    }

    /// All retained entries at or after `cursor`
    pub fn since(&self, cursor: usize) -> LogPage {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let end = inner.first + inner.entries.len();
        let start = cursor.clamp(inner.first, end);

        LogPage {
            entries: inner
                .entries
                .range(start - inner.first..)
                .cloned()
                .collect(),
            next_cursor: end,
        }
    }

    /// Number of entries ever appended
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.first + inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

/// State shared between the flashing worker and its observers
#[derive(Debug)]
pub struct StatusBoard {
    active: AtomicBool,
    halted: AtomicBool,
    stage: AtomicU8,
    progress: AtomicU8,
    job_progress: AtomicU8,
    status: RwLock<String>,
    current_job: Mutex<Option<FlashJob>>,
    outcome: Mutex<Option<JobOutcome>>,
    finished: Condvar,
    log: LogBuffer,
}

impl StatusBoard {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            active: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            stage: AtomicU8::new(Stage::Idle as u8),
            progress: AtomicU8::new(0),
            job_progress: AtomicU8::new(0),
            status: RwLock::new(String::new()),
            current_job: Mutex::new(None),
            outcome: Mutex::new(None),
            finished: Condvar::new(),
            log: LogBuffer::new(log_capacity),
        }
    }

    /// Whether a job is currently being flashed
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Whether the worker has stopped and will take no more jobs
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn stage(&self) -> Stage {
        Stage::from_repr(self.stage.load(Ordering::SeqCst)).unwrap_or_default()
    }

    /// The latest status message
    pub fn status(&self) -> String {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Progress through the current image, in percent
    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::SeqCst)
    }

    /// Progress through the whole job, in percent
    pub fn job_progress(&self) -> u8 {
        self.job_progress.load(Ordering::SeqCst)
    }

    /// The job being flashed, if any
    pub fn current_job(&self) -> Option<FlashJob> {
        lock(&self.current_job).clone()
    }

    /// How the most recently finished job ended
    pub fn last_outcome(&self) -> Option<JobOutcome> {
        lock(&self.outcome).clone()
    }

    /// Log entries at or after `cursor`
    pub fn logs_since(&self, cursor: usize) -> LogPage {
        self.log.since(cursor)
    }

    pub fn log(&self) -> &LogBuffer {
        &self.log
    }

    /// Block until no job is active, returning `false` on timeout
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let guard = lock(&self.outcome);
        let (_guard, result) = self
            .finished
            .wait_timeout_while(guard, timeout, |_| self.is_active())
            .unwrap_or_else(PoisonError::into_inner);

        !result.timed_out()
    }

    /// Claim the worker for `job`
    pub(crate) fn try_begin(&self, job: &FlashJob) -> Result<(), Error> {
        if self.is_halted() {
            return Err(Error::WorkerHalted);
        }
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| Error::Busy)?;

        *lock(&self.outcome) = None;
        *lock(&self.current_job) = Some(job.clone());
        self.set_progress(0, 0);

        Ok(())
    }

    /// Undo [StatusBoard::try_begin] for a job the worker never received
    pub(crate) fn abandon(&self) {
        let _outcome = lock(&self.outcome);
        *lock(&self.current_job) = None;
        self.active.store(false, Ordering::SeqCst);
        self.finished.notify_all();
    }

    /// Record the end of the current job and release the worker
    pub(crate) fn finish(&self, outcome: JobOutcome) {
        let mut slot = lock(&self.outcome);
        *slot = Some(outcome);
        *lock(&self.current_job) = None;
        self.set_stage(Stage::Idle);
        self.active.store(false, Ordering::SeqCst);
        self.finished.notify_all();
    }

    /// Mark the worker as gone for good
    pub(crate) fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
        if self.is_active() {
            self.finish(JobOutcome::Failed(Error::WorkerHalted.to_string()));
        }
    }

    /// Replace the status message and append it to the log
    pub(crate) fn set_status(&self, message: impl Into<String>) {
        let message = message.into();
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = message.clone();
        self.log.append(message);
    }

    pub(crate) fn set_stage(&self, stage: Stage) {
        self.stage.store(stage as u8, Ordering::SeqCst);
    }

    pub(crate) fn set_progress(&self, image: u8, job: u8) {
        self.progress.store(image.min(100), Ordering::SeqCst);
        self.job_progress.store(job.min(100), Ordering::SeqCst);
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
