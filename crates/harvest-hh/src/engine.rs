//! Concurrent fetch engine: drains the candidate range through a worker pool

use std::io;
use std::ops::Range;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use harvest_core::progress::{SharedProgress, fmt_num};
use harvest_core::{CandidateId, CheckpointStore, HttpError, JsonlSink, WorkQueue};
use indicatif::ProgressBar;
use serde_json::Value;

use crate::api::{FetchResult, RateLimitedClient, RecordApi};
use crate::auth::{AuthError, TokenManager};
use crate::filter::{Classification, RecordFilter, RejectReason, strip_for_storage};
use crate::stats::{Counters, Summary};

pub const DEFAULT_WORKERS: usize = 10;

/// Log a progress line every this many accepted records
const LOG_EVERY: u64 = 50;

/// Terminal (or stopped) result for one candidate
#[derive(Debug)]
pub enum FetchOutcome {
    /// In scope, already stripped for storage
    Accepted(Value),
    Rejected(RejectReason),
    NotFound,
    Exhausted(HttpError),
    /// Cut short by shutdown; not recorded as processed
    Stopped,
}

#[derive(Debug)]
pub enum Fatal {
    Auth(AuthError),
    Storage(io::Error),
}

impl std::fmt::Display for Fatal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth(e) => write!(f, "authentication failed: {e}"),
            Self::Storage(e) => write!(f, "local storage failed: {e}"),
        }
    }
}

/// Run halted by a fatal error. Carries the partial summary.
#[derive(Debug)]
pub struct EngineError {
    pub cause: Fatal,
    pub summary: Summary,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fetch halted: {}", self.cause)
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.cause {
            Fatal::Auth(e) => Some(e),
            Fatal::Storage(e) => Some(e),
        }
    }
}

pub struct FetchEngine<A> {
    client: RateLimitedClient<A>,
    tokens: TokenManager,
    filter: RecordFilter,
    checkpoint: CheckpointStore,
    sink: JsonlSink,
    workers: usize,
    progress: SharedProgress,
}

/// Per-run state shared by the workers
struct RunState<'a, F> {
    queue: WorkQueue<F>,
    counters: Counters,
    halt: AtomicBool,
    shutdown_logged: AtomicBool,
    fatal: Mutex<Option<Fatal>>,
    pb: &'a ProgressBar,
}

impl<A: RecordApi> FetchEngine<A> {
    pub fn new(
        client: RateLimitedClient<A>,
        tokens: TokenManager,
        filter: RecordFilter,
        checkpoint: CheckpointStore,
        sink: JsonlSink,
        progress: SharedProgress,
    ) -> Self {
        Self {
            client,
            tokens,
            filter,
            checkpoint,
            sink,
            workers: DEFAULT_WORKERS,
            progress,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    /// Fetch and classify one id. Accepted records come back stripped.
    pub fn process(&self, id: CandidateId) -> Result<FetchOutcome, AuthError> {
        let outcome = match self.client.fetch(id, &self.tokens)? {
            FetchResult::Found(mut record) => match self.filter.classify(&record) {
                Classification::InScope => {
                    strip_for_storage(&mut record);
                    FetchOutcome::Accepted(record)
                }
                Classification::OutOfScope(reason) => {
                    log::debug!("ID {id}: rejected, {reason}");
                    FetchOutcome::Rejected(reason)
                }
            },
            FetchResult::NotFound => {
                log::debug!("ID {id}: not found");
                FetchOutcome::NotFound
            }
            FetchResult::Exhausted(e) => FetchOutcome::Exhausted(e),
            FetchResult::Stopped => FetchOutcome::Stopped,
        };
        Ok(outcome)
    }

    /// Drain `range` minus already-processed ids.
    ///
    /// Returns the summary on completion or graceful shutdown (with
    /// `interrupted` set). Auth and storage failures halt dispatch, wait
    /// for in-flight ids, flush the checkpoint and return [`EngineError`].
    pub fn run(&self, range: Range<CandidateId>) -> Result<Summary, EngineError> {
        let start = Instant::now();
        let already = self.checkpoint.count_in(&range);
        let queue = WorkQueue::filtered(range.clone(), |id| !self.checkpoint.contains(id));
        let total = queue.range_len() - already;

        log::info!(
            "Candidates {}..{}: {} to fetch, {} already processed, {} workers",
            range.start,
            range.end,
            fmt_num(total),
            fmt_num(already),
            self.workers
        );

        let pb = self.progress.counter_bar("vacancies", total);
        let state = RunState {
            queue,
            counters: Counters::default(),
            halt: AtomicBool::new(false),
            shutdown_logged: AtomicBool::new(false),
            fatal: Mutex::new(None),
            pb: &pb,
        };

        rayon::scope(|s| {
            for _ in 0..self.workers {
                s.spawn(|_| self.worker_loop(&state));
            }
        });
        pb.finish_and_clear();

        let mut fatal = state.fatal.into_inner().expect("worker thread panicked");
        if let Err(e) = self.checkpoint.flush() {
            log::error!("Final checkpoint flush failed: {e}");
            fatal.get_or_insert(Fatal::Storage(e));
        }

        let mut summary = state.counters.snapshot(total, already, start.elapsed());
        summary.interrupted = self.client.shutdown().is_requested();

        match fatal {
            Some(cause) => Err(EngineError { cause, summary }),
            None => Ok(summary),
        }
    }

    fn worker_loop<F: Fn(CandidateId) -> bool + Sync>(&self, state: &RunState<'_, F>) {
        let shutdown = self.client.shutdown();
        loop {
            if state.halt.load(Ordering::Relaxed) {
                break;
            }
            if shutdown.is_requested() {
                if !state.shutdown_logged.swap(true, Ordering::Relaxed) {
                    log::warn!("Shutdown requested, finishing in-flight ids");
                }
                break;
            }
            let Some(id) = state.queue.next() else {
                break;
            };
            log::trace!("ID {id}: dispatched");

            let result = self
                .process(id)
                .map_err(Fatal::Auth)
                .and_then(|outcome| self.settle(id, outcome, state).map_err(Fatal::Storage));
            if let Err(cause) = result {
                log::error!("ID {id}: {cause}, halting dispatch");
                state.halt.store(true, Ordering::Relaxed);
                state
                    .fatal
                    .lock()
                    .expect("worker thread panicked")
                    .get_or_insert(cause);
                break;
            }
        }
    }

    /// Persist one outcome: output first, then the processed marker
    fn settle<F>(
        &self,
        id: CandidateId,
        outcome: FetchOutcome,
        state: &RunState<'_, F>,
    ) -> io::Result<()> {
        let counters = &state.counters;
        match outcome {
            FetchOutcome::Stopped => {
                counters.stopped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            FetchOutcome::Accepted(record) => {
                self.sink.append(&record)?;
                let loaded = counters.accept();
                if loaded % LOG_EVERY == 0 {
                    log::info!("Loaded {} vacancies (last id {id})", fmt_num(loaded));
                }
            }
            FetchOutcome::Rejected(reason) => counters.reject(&reason),
            FetchOutcome::NotFound => {
                counters.not_found.fetch_add(1, Ordering::Relaxed);
            }
            FetchOutcome::Exhausted(_) => {
                counters.exhausted.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.checkpoint.record(id)?;
        state.pb.inc(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credential, TokenEndpoint, TokenResponse, TokenStore};
    use crate::filter::DateWindow;
    use harvest_core::stream::RawResponse;
    use harvest_core::{ProgressContext, RetryPolicy, Shutdown};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Even ids are 2024 IT vacancies, multiples of 3 are missing
    struct Catalog;

    impl RecordApi for Catalog {
        fn get_record(&self, id: CandidateId, _: &str) -> Result<RawResponse, HttpError> {
            if id % 3 == 0 {
                return Ok(RawResponse {
                    status: 404,
                    body: String::new(),
                });
            }
            let year = if id % 2 == 0 { 2024 } else { 2023 };
            let body = serde_json::json!({
                "id": id.to_string(),
                "published_at": format!("{year}-05-01T09:00:00+0300"),
                "professional_roles": [{"id": "96"}],
                "branded_description": "<p>blob</p>",
            });
            Ok(RawResponse {
                status: 200,
                body: body.to_string(),
            })
        }
    }

    struct NoRefresh;

    impl TokenEndpoint for NoRefresh {
        fn refresh(&self, _: &str) -> Result<TokenResponse, AuthError> {
            Err(AuthError::RefreshFailed)
        }
    }

    fn engine(dir: &TempDir, credential: bool) -> FetchEngine<Catalog> {
        let store = TokenStore::new(dir.path().join("token.json"));
        if credential {
            store
                .save(&Credential {
                    access_token: "a".to_string(),
                    refresh_token: "r".to_string(),
                    issued_at: chrono::Utc::now(),
                    ttl_seconds: 3600,
                })
                .unwrap();
        }
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        };
        let filter = RecordFilter::new(
            DateWindow::year(2024).unwrap(),
            ["96".to_string()].into_iter().collect(),
        );
        FetchEngine::new(
            RateLimitedClient::new(Catalog, policy, Shutdown::new()),
            TokenManager::new(store, Box::new(NoRefresh)),
            filter,
            CheckpointStore::open(&dir.path().join("processed.json"), 1).unwrap(),
            JsonlSink::open(&dir.path().join("out.jsonl")).unwrap(),
            Arc::new(ProgressContext::hidden()),
        )
        .with_workers(4)
    }

    #[test]
    fn process_strips_accepted() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, true);
        match engine.process(2).unwrap() {
            FetchOutcome::Accepted(v) => assert!(v.get("branded_description").is_none()),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            engine.process(1).unwrap(),
            FetchOutcome::Rejected(RejectReason::OutsideWindow(_))
        ));
        assert!(matches!(engine.process(3).unwrap(), FetchOutcome::NotFound));
    }

    #[test]
    fn run_counts_outcomes() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, true);
        let summary = engine.run(1..13).unwrap();

        // 1..13: 3,6,9,12 missing; 2,4,8,10 accepted; 1,5,7,11 rejected
        assert_eq!(summary.total, 12);
        assert_eq!(summary.not_found, 4);
        assert_eq!(summary.loaded, 4);
        assert_eq!(summary.rejected_date, 4);
        assert!(!summary.interrupted);
        assert_eq!(engine.checkpoint().len(), 12);
    }

    #[test]
    fn missing_credential_halts_with_summary() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, false);
        let err = engine.run(1..100).unwrap_err();
        assert!(matches!(err.cause, Fatal::Auth(_)));
        assert_eq!(err.summary.settled(), 0);
        assert!(engine.checkpoint().is_empty());
    }

    #[test]
    fn empty_range_is_noop() {
        let dir = TempDir::new().unwrap();
        let summary = engine(&dir, true).run(5..5).unwrap();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.settled(), 0);
    }
}
