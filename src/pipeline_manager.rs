//! Batch enrichment runtime component.
//!
//! Owns the worker pool that turns raw tracks into match verdicts. Each
//! worker pulls the next track, decomposes its title, generates the query
//! ladder, runs the tier cascade through the shared orchestrator, and scores
//! whatever came back. Verdicts land in input order and progress events
//! stream over a broadcast bus while the batch runs.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use log::{debug, error, info, warn};
use tokio::sync::broadcast::{self, Receiver, Sender};

use crate::config::{Config, MatchingConfig};
use crate::db_manager::DbManager;
use crate::match_scorer;
use crate::protocol::{
    CancelHandle, MatchResult, MatchStatus, PipelineError, PipelineMessage, RawTrack,
};
use crate::query_generator::generate_queries;
use crate::search::candidate_cache::{CandidateCache, SqliteCandidateCache};
use crate::search::SearchOrchestrator;
use crate::title_decomposer::decompose;

/// Progress bus depth; a subscriber that falls further behind than this sees
/// a lag error instead of stale events.
const PROGRESS_CHANNEL_CAPACITY: usize = 1024;

fn panic_payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text.clone();
    }
    "non-string panic payload".to_string()
}

/// Coordinates enrichment batches over a shared orchestrator and cache.
pub struct PipelineManager {
    config: Config,
    orchestrator: Arc<SearchOrchestrator>,
    cache: Arc<dyn CandidateCache>,
    progress: Sender<PipelineMessage>,
    cancel: CancelHandle,
}

impl PipelineManager {
    /// Opens the persistent cache and wires the search tiers from `config`.
    pub fn new(config: Config) -> Result<Self, PipelineError> {
        let config = crate::sanitize_config(config);
        let db = DbManager::new(config.pipeline.cache_db_path.as_deref())?;
        let cache: Arc<dyn CandidateCache> = Arc::new(SqliteCandidateCache::new(
            db,
            config.search.cache_ttl_seconds,
        ));
        let orchestrator = Arc::new(SearchOrchestrator::from_config(&config, Arc::clone(&cache)));
        let (progress, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Ok(Self {
            config,
            orchestrator,
            cache,
            progress,
            cancel: CancelHandle::new(),
        })
    }

    #[cfg(test)]
    fn with_orchestrator(
        config: Config,
        orchestrator: SearchOrchestrator,
        cache: Arc<dyn CandidateCache>,
    ) -> Self {
        let (progress, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self {
            config: crate::sanitize_config(config),
            orchestrator: Arc::new(orchestrator),
            cache,
            progress,
            cancel: CancelHandle::new(),
        }
    }

    /// New receiver for progress events. A subscriber only sees events sent
    /// after it subscribed.
    pub fn subscribe(&self) -> Receiver<PipelineMessage> {
        self.progress.subscribe()
    }

    /// Shared cancellation flag. Cancelling lets in-flight tracks finish,
    /// fails the unprocessed remainder, and ends the batch with
    /// `BatchCancelled`.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Runs one batch to completion and returns verdicts in input order.
    ///
    /// Blocks the caller; progress streams over the broadcast bus in the
    /// meantime. A cancelled batch still returns a full vector, with the
    /// skipped remainder marked `SearchFailed`.
    pub fn process_batch(&self, tracks: &[RawTrack]) -> Vec<MatchResult> {
        self.cache.prune();

        let total = tracks.len();
        if total == 0 {
            let _ = self.progress.send(PipelineMessage::BatchCompleted {
                total: 0,
                matched: 0,
                low_confidence: 0,
                no_match: 0,
                failed: 0,
            });
            return Vec::new();
        }

        let jobs: Arc<Mutex<VecDeque<(usize, RawTrack)>>> =
            Arc::new(Mutex::new(tracks.iter().cloned().enumerate().collect()));
        let slots: Arc<Mutex<Vec<Option<MatchResult>>>> = Arc::new(Mutex::new(vec![None; total]));
        let completed = Arc::new(AtomicUsize::new(0));

        let worker_count = self.config.pipeline.worker_count.min(total).max(1);
        info!("Enriching {total} tracks with {worker_count} workers");

        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let worker = BatchWorker {
                jobs: Arc::clone(&jobs),
                slots: Arc::clone(&slots),
                completed: Arc::clone(&completed),
                orchestrator: Arc::clone(&self.orchestrator),
                matching: self.config.matching.clone(),
                site_domain: self.config.catalog.site_search_domain.clone(),
                max_queries: self.config.pipeline.max_queries_per_track,
                cancel: self.cancel.clone(),
                progress: self.progress.clone(),
                total,
            };
            handles.push(thread::spawn(move || worker.run()));
        }
        for handle in handles {
            if handle.join().is_err() {
                // Per-track panics are caught inside run(), so this means the
                // worker loop itself died; the slot fallback below covers
                // whatever it left unfinished.
                error!("Enrichment worker thread terminated abnormally");
            }
        }

        let slots = match slots.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        let results: Vec<MatchResult> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.unwrap_or_else(|| failed_result(&tracks[index])))
            .collect();

        let done = completed.load(Ordering::SeqCst);
        if self.cancel.is_cancelled() {
            info!("Batch cancelled after {done} of {total} tracks");
            let _ = self.progress.send(PipelineMessage::BatchCancelled {
                completed: done,
                total,
            });
        } else {
            let (matched, low_confidence, no_match, failed) = tally(&results);
            info!(
                "Batch finished: {matched} matched, {low_confidence} low confidence, \
                 {no_match} unmatched, {failed} failed"
            );
            let _ = self.progress.send(PipelineMessage::BatchCompleted {
                total,
                matched,
                low_confidence,
                no_match,
                failed,
            });
        }
        results
    }
}

/// One pool thread; pulls jobs until the queue runs dry.
struct BatchWorker {
    jobs: Arc<Mutex<VecDeque<(usize, RawTrack)>>>,
    slots: Arc<Mutex<Vec<Option<MatchResult>>>>,
    completed: Arc<AtomicUsize>,
    orchestrator: Arc<SearchOrchestrator>,
    matching: MatchingConfig,
    site_domain: String,
    max_queries: usize,
    cancel: CancelHandle,
    progress: Sender<PipelineMessage>,
    total: usize,
}

impl BatchWorker {
    fn run(self) {
        loop {
            let job = match self.jobs.lock() {
                Ok(mut queue) => queue.pop_front(),
                Err(_) => {
                    warn!("Job queue lock poisoned; worker exiting");
                    return;
                }
            };
            let Some((index, track)) = job else {
                return;
            };

            if self.cancel.is_cancelled() {
                // Fill the slot so the batch output stays complete, but a
                // skipped track is not a completion and emits no event.
                self.store(index, failed_result(&track));
                continue;
            }

            let verdict = panic::catch_unwind(AssertUnwindSafe(|| self.enrich(&track)));
            let result = match verdict {
                Ok(result) => result,
                Err(payload) => {
                    error!(
                        "Enrichment panicked on '{}': {}",
                        track.title,
                        panic_payload_to_string(payload.as_ref())
                    );
                    failed_result(&track)
                }
            };

            self.complete(index, result);
        }
    }

    fn enrich(&self, track: &RawTrack) -> MatchResult {
        let descriptor = decompose(&track.title);
        let queries = generate_queries(track, &descriptor, &self.site_domain, self.max_queries);
        let outcome = self.orchestrator.search(&queries, &self.cancel);
        match_scorer::score(track, &outcome, &self.matching)
    }

    /// Records one verdict. The slot write, the count claim, and the
    /// progress event share the slots critical section, so subscribers see
    /// `completed` grow by exactly one per event.
    fn complete(&self, index: usize, result: MatchResult) {
        let status = result.status;
        let title = result.track.title.clone();
        let Ok(mut slots) = self.slots.lock() else {
            warn!("Result slot lock poisoned; dropping verdict for track {index}");
            return;
        };
        slots[index] = Some(result);
        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Track {done}/{}: '{title}' -> {status:?}", self.total);
        let _ = self.progress.send(PipelineMessage::TrackCompleted {
            index,
            title,
            status,
            completed: done,
            total: self.total,
        });
    }

    fn store(&self, index: usize, result: MatchResult) {
        match self.slots.lock() {
            Ok(mut slots) => slots[index] = Some(result),
            Err(_) => warn!("Result slot lock poisoned; dropping verdict for track {index}"),
        }
    }
}

fn failed_result(track: &RawTrack) -> MatchResult {
    MatchResult {
        track: track.clone(),
        best_candidate: None,
        score: 0.0,
        status: MatchStatus::SearchFailed,
    }
}

fn tally(results: &[MatchResult]) -> (usize, usize, usize, usize) {
    let mut matched = 0;
    let mut low_confidence = 0;
    let mut no_match = 0;
    let mut failed = 0;
    for result in results {
        match result.status {
            MatchStatus::Matched => matched += 1,
            MatchStatus::LowConfidence => low_confidence += 1,
            MatchStatus::NoMatch => no_match += 1,
            MatchStatus::SearchFailed => failed += 1,
        }
    }
    (matched, low_confidence, no_match, failed)
}
