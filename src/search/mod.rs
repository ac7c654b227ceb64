//! Tiered catalog search.
//!
//! The orchestrator walks the configured tiers in escalation order, feeding
//! each one the full query sequence before moving on, and stops at the first
//! query that produces candidates. Every fetch goes through the persistent
//! cache, the in-flight coalescing table, and a bounded retry loop; the
//! tiers themselves own the rate gates for their targets.

pub mod candidate_cache;
pub mod direct_tier;
pub(crate) mod payload;
pub mod rate_gate;
pub mod rendered_tier;
pub mod transport;
pub mod web_tier;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use log::{debug, warn};
use rand::RngExt;

use crate::config::{Config, SearchConfig};
use crate::protocol::{
    CacheKey, CancelHandle, FailureKind, Query, QueryStrategy, RemoteCandidate, SearchFailure,
    SearchOutcome, SearchTierKind,
};
use crate::search::candidate_cache::CandidateCache;
use crate::search::direct_tier::DirectTier;
use crate::search::rate_gate::RateGate;
use crate::search::rendered_tier::{HeadlessBrowserRenderer, RenderedTier};
use crate::search::transport::HttpTransport;
use crate::search::web_tier::WebTier;

/// Hard ceiling on one backoff wait.
const MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Minimum wait before re-attempting a rate-limited target.
const RATE_LIMIT_BACKOFF_FLOOR: Duration = Duration::from_secs(5);
/// Server retry hints above this are treated as this.
const RETRY_AFTER_CEILING: Duration = Duration::from_secs(120);
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One escalation level of the fallback search.
pub trait SearchTier: Send + Sync {
    fn kind(&self) -> SearchTierKind;

    /// Runs one query against this tier's target. An empty `Ok` is a clean
    /// no-result; `Err` carries the classified failure for the retry loop.
    fn search(
        &self,
        query: &Query,
        cancel: &CancelHandle,
    ) -> Result<Vec<RemoteCandidate>, SearchFailure>;
}

type FetchResult = Result<Vec<RemoteCandidate>, SearchFailure>;
type FetchCell = Arc<OnceLock<FetchResult>>;

/// In-flight fetch table: at most one concurrent network call per distinct
/// cache key. Concurrent callers for the same key block on a shared cell and
/// receive the first caller's result.
struct FetchCoalescer {
    in_flight: Mutex<HashMap<String, FetchCell>>,
}

impl FetchCoalescer {
    fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn run(&self, key: &CacheKey, fetch: impl FnOnce() -> FetchResult) -> FetchResult {
        let storage_key = key.storage_key();
        let (cell, inserted) = {
            let mut in_flight = match self.in_flight.lock() {
                Ok(guard) => guard,
                // A poisoned table means a fetch closure panicked; run
                // uncoalesced rather than deadlock every later caller.
                Err(_) => return fetch(),
            };
            match in_flight.get(&storage_key) {
                Some(cell) => (Arc::clone(cell), false),
                None => {
                    let cell: FetchCell = Arc::new(OnceLock::new());
                    in_flight.insert(storage_key.clone(), Arc::clone(&cell));
                    (cell, true)
                }
            }
        };

        // Exactly one of the racing closures executes; everyone else blocks
        // here until the cell holds the result.
        let result = cell.get_or_init(fetch).clone();
        if inserted {
            if let Ok(mut in_flight) = self.in_flight.lock() {
                in_flight.remove(&storage_key);
            }
        }
        result
    }
}

/// Drives the tier ladder for one track's query sequence.
pub struct SearchOrchestrator {
    tiers: Vec<Box<dyn SearchTier>>,
    cache: Arc<dyn CandidateCache>,
    coalescer: FetchCoalescer,
    search_config: SearchConfig,
}

impl SearchOrchestrator {
    pub fn new(
        tiers: Vec<Box<dyn SearchTier>>,
        cache: Arc<dyn CandidateCache>,
        search_config: SearchConfig,
    ) -> Self {
        Self {
            tiers,
            cache,
            coalescer: FetchCoalescer::new(),
            search_config,
        }
    }

    /// Builds the production tier ladder: direct catalog access, the
    /// rendered fallback when enabled and a browser binary exists, then web
    /// search. The catalog tiers share one rate gate since they hit the same
    /// host.
    pub fn from_config(config: &Config, cache: Arc<dyn CandidateCache>) -> Self {
        let transport = Arc::new(HttpTransport::new(&config.catalog.user_agent));
        let catalog_gate = Arc::new(RateGate::new(Duration::from_secs(
            config.catalog.request_interval_seconds,
        )));
        let web_gate = Arc::new(RateGate::new(Duration::from_secs(
            config.web_search.request_interval_seconds,
        )));

        let mut tiers: Vec<Box<dyn SearchTier>> = vec![Box::new(DirectTier::new(
            Arc::clone(&transport),
            Arc::clone(&catalog_gate),
            config.catalog.clone(),
        ))];
        if config.search.rendered_fallback_enabled {
            match HeadlessBrowserRenderer::detect() {
                Some(renderer) => tiers.push(Box::new(RenderedTier::new(
                    Box::new(renderer),
                    Arc::clone(&catalog_gate),
                    config.catalog.clone(),
                    Duration::from_secs(config.search.rendered_fallback_timeout_seconds),
                ))),
                None => {
                    warn!("Rendered fallback is enabled but no headless browser binary was found")
                }
            }
        }
        tiers.push(Box::new(WebTier::new(
            transport,
            web_gate,
            config.web_search.clone(),
            config.catalog.site_search_domain.clone(),
        )));

        Self::new(tiers, cache, config.search.clone())
    }

    /// Walks tiers in order, each with the full query sequence, and returns
    /// the first non-empty candidate list. Ordinary failures never escape:
    /// they are folded into the outcome so an exhausted search reports why.
    pub fn search(&self, queries: &[Query], cancel: &CancelHandle) -> SearchOutcome {
        let mut last_failure: Option<SearchFailure> = None;

        for tier in &self.tiers {
            for query in queries {
                if cancel.is_cancelled() {
                    return SearchOutcome {
                        candidates: Vec::new(),
                        failure: Some(
                            last_failure
                                .unwrap_or_else(|| SearchFailure::permanent("search cancelled")),
                        ),
                    };
                }
                if !self.eligible(query.strategy, tier.kind()) {
                    continue;
                }
                match self.fetch_cached(tier.as_ref(), query, cancel) {
                    Ok(candidates) if !candidates.is_empty() => {
                        debug!(
                            "Query '{}' produced {} candidates on the {} tier",
                            query.text,
                            candidates.len(),
                            tier.kind().label()
                        );
                        return SearchOutcome::found(candidates);
                    }
                    Ok(_) => {
                        debug!(
                            "Query '{}' found nothing on the {} tier",
                            query.text,
                            tier.kind().label()
                        );
                    }
                    Err(failure) => {
                        debug!(
                            "Query '{}' failed on the {} tier: {failure}",
                            query.text,
                            tier.kind().label()
                        );
                        last_failure = Some(failure);
                    }
                }
            }
        }

        SearchOutcome {
            candidates: Vec::new(),
            failure: last_failure,
        }
    }

    /// Which strategies a tier consumes. Site-scoped text only means
    /// something to a web search engine; the direct-tier gates come from
    /// configuration.
    fn eligible(&self, strategy: QueryStrategy, tier: SearchTierKind) -> bool {
        match tier {
            SearchTierKind::Direct | SearchTierKind::Rendered => match strategy {
                QueryStrategy::SiteScoped => false,
                QueryStrategy::RemixAware => self.search_config.remix_queries_use_direct_tier,
                QueryStrategy::Exact | QueryStrategy::Loose => {
                    self.search_config.prefer_direct_tier_for_all_queries
                }
            },
            SearchTierKind::WebSearch => true,
        }
    }

    /// Cache, coalesce, then fetch with retry. Successful fetches (including
    /// empty ones) are written back to the cache; failures are not.
    fn fetch_cached(
        &self,
        tier: &dyn SearchTier,
        query: &Query,
        cancel: &CancelHandle,
    ) -> FetchResult {
        let key = CacheKey::new(&query.text, tier.kind());
        if let Some(candidates) = self.cache.get(&key) {
            debug!(
                "Cache hit for '{}' on the {} tier",
                query.text,
                tier.kind().label()
            );
            return Ok(candidates);
        }
        self.coalescer.run(&key, || {
            // A coalesced leader may have populated the cache between our
            // miss above and this closure running.
            if let Some(candidates) = self.cache.get(&key) {
                return Ok(candidates);
            }
            let result = self.fetch_with_retry(tier, query, cancel);
            if let Ok(candidates) = &result {
                self.cache.put(&key, candidates);
            }
            result
        })
    }

    fn fetch_with_retry(
        &self,
        tier: &dyn SearchTier,
        query: &Query,
        cancel: &CancelHandle,
    ) -> FetchResult {
        let max_attempts = self.search_config.max_retries.saturating_add(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(SearchFailure::permanent("cancelled between attempts"));
            }
            match tier.search(query, cancel) {
                Ok(candidates) => return Ok(candidates),
                Err(failure) if failure.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry_delay(&failure, attempt);
                    debug!(
                        "Attempt {attempt} for '{}' on the {} tier failed ({failure}); retrying in {delay:?}",
                        query.text,
                        tier.kind().label()
                    );
                    if !sleep_unless_cancelled(delay, cancel) {
                        return Err(failure);
                    }
                }
                Err(failure) => return Err(failure),
            }
        }
    }

    /// Exponential backoff with jitter. Rate-limited failures wait at least
    /// the floor and honor the server's retry hint up to a ceiling.
    fn retry_delay(&self, failure: &SearchFailure, attempt: u32) -> Duration {
        let base = Duration::from_secs(self.search_config.retry_base_delay_seconds);
        let shift = attempt.saturating_sub(1).min(6);
        let mut delay = base
            .checked_mul(1u32 << shift)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF);
        if failure.kind == FailureKind::RateLimited {
            delay = delay.max(RATE_LIMIT_BACKOFF_FLOOR);
            if let Some(hint) = failure.retry_after {
                delay = delay.max(hint.min(RETRY_AFTER_CEILING));
            }
        }
        delay + backoff_jitter()
    }
}

fn backoff_jitter() -> Duration {
    Duration::from_millis(rand::rng().random_range(0..=250))
}

/// Sleeps in short slices so the cancel flag stays responsive. Returns false
/// when cancelled before the full delay elapsed.
fn sleep_unless_cancelled(delay: Duration, cancel: &CancelHandle) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(CANCEL_POLL_INTERVAL));
    }
}

#[cfg(test)]
mod tests {
    use super::{SearchOrchestrator, SearchTier};
    use crate::config::SearchConfig;
    use crate::protocol::{
        CacheKey, CancelHandle, FailureKind, Query, QueryStrategy, RemoteCandidate, SearchFailure,
        SearchTierKind,
    };
    use crate::search::candidate_cache::{CandidateCache, MemoryCandidateCache};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type StepResult = Result<Vec<RemoteCandidate>, SearchFailure>;

    /// Scripted tier: pops one step per call, then keeps answering with a
    /// clean empty result.
    struct FakeTier {
        kind: SearchTierKind,
        script: Mutex<VecDeque<StepResult>>,
        calls: Arc<AtomicUsize>,
        seen_queries: Arc<Mutex<Vec<String>>>,
        call_delay: Duration,
    }

    impl FakeTier {
        fn new(kind: SearchTierKind, script: Vec<StepResult>) -> Self {
            Self {
                kind,
                script: Mutex::new(script.into()),
                calls: Arc::new(AtomicUsize::new(0)),
                seen_queries: Arc::new(Mutex::new(Vec::new())),
                call_delay: Duration::ZERO,
            }
        }

        fn with_call_delay(mut self, delay: Duration) -> Self {
            self.call_delay = delay;
            self
        }

        fn call_counter(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.calls)
        }

        fn query_log(&self) -> Arc<Mutex<Vec<String>>> {
            Arc::clone(&self.seen_queries)
        }
    }

    impl SearchTier for FakeTier {
        fn kind(&self) -> SearchTierKind {
            self.kind
        }

        fn search(&self, query: &Query, _cancel: &CancelHandle) -> StepResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_queries.lock().unwrap().push(query.text.clone());
            if !self.call_delay.is_zero() {
                std::thread::sleep(self.call_delay);
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn candidate(title: &str, artist: &str) -> RemoteCandidate {
        RemoteCandidate {
            source_url: format!("https://example.com/track/{title}"),
            title: title.to_string(),
            artist: artist.to_string(),
            ..RemoteCandidate::default()
        }
    }

    fn query(text: &str, strategy: QueryStrategy) -> Query {
        Query {
            text: text.to_string(),
            strategy,
        }
    }

    fn fast_config() -> SearchConfig {
        SearchConfig {
            retry_base_delay_seconds: 0,
            ..SearchConfig::default()
        }
    }

    fn orchestrator(tiers: Vec<Box<dyn SearchTier>>, config: SearchConfig) -> SearchOrchestrator {
        SearchOrchestrator::new(tiers, Arc::new(MemoryCandidateCache::new()), config)
    }

    #[test]
    fn test_search_stops_at_first_tier_with_candidates() {
        let direct = FakeTier::new(
            SearchTierKind::Direct,
            vec![Ok(vec![candidate("Midnight City", "M83")])],
        );
        let web = FakeTier::new(SearchTierKind::WebSearch, vec![]);
        let web_calls = web.call_counter();

        let orchestrator = orchestrator(vec![Box::new(direct), Box::new(web)], fast_config());
        let outcome = orchestrator.search(
            &[query("M83 Midnight City", QueryStrategy::Loose)],
            &CancelHandle::new(),
        );

        assert_eq!(outcome.candidates.len(), 1);
        assert!(outcome.failure.is_none());
        assert_eq!(web_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_search_runs_full_query_sequence_before_next_tier() {
        let direct = FakeTier::new(
            SearchTierKind::Direct,
            vec![Ok(Vec::new()), Ok(Vec::new()), Ok(Vec::new())],
        );
        let direct_log = direct.query_log();
        let web = FakeTier::new(
            SearchTierKind::WebSearch,
            vec![Ok(vec![candidate("Strobe", "deadmau5")])],
        );
        let web_calls = web.call_counter();

        let queries = [
            query("\"deadmau5\" \"Strobe (Club Edit)\"", QueryStrategy::Exact),
            query("deadmau5 Strobe", QueryStrategy::Loose),
            query("Strobe", QueryStrategy::Loose),
        ];
        let orchestrator = orchestrator(vec![Box::new(direct), Box::new(web)], fast_config());
        let outcome = orchestrator.search(&queries, &CancelHandle::new());

        let seen = direct_log.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                "\"deadmau5\" \"Strobe (Club Edit)\"".to_string(),
                "deadmau5 Strobe".to_string(),
                "Strobe".to_string(),
            ]
        );
        assert_eq!(web_calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.candidates[0].title, "Strobe");
        assert!(outcome.failure.is_none());
    }

    #[test]
    fn test_search_site_scoped_queries_skip_catalog_tiers() {
        let direct = FakeTier::new(SearchTierKind::Direct, vec![]);
        let direct_calls = direct.call_counter();
        let web = FakeTier::new(
            SearchTierKind::WebSearch,
            vec![Ok(vec![candidate("Midnight City", "M83")])],
        );

        let orchestrator = orchestrator(vec![Box::new(direct), Box::new(web)], fast_config());
        let outcome = orchestrator.search(
            &[query(
                "site:www.beatport.com M83 Midnight City",
                QueryStrategy::SiteScoped,
            )],
            &CancelHandle::new(),
        );

        assert_eq!(direct_calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.candidates.len(), 1);
    }

    #[test]
    fn test_search_direct_tier_gates_follow_configuration() {
        let config = SearchConfig {
            remix_queries_use_direct_tier: false,
            prefer_direct_tier_for_all_queries: false,
            retry_base_delay_seconds: 0,
            ..SearchConfig::default()
        };
        let direct = FakeTier::new(SearchTierKind::Direct, vec![]);
        let direct_calls = direct.call_counter();
        let web = FakeTier::new(SearchTierKind::WebSearch, vec![]);
        let web_calls = web.call_counter();

        let orchestrator = orchestrator(vec![Box::new(direct), Box::new(web)], config);
        orchestrator.search(
            &[
                query("\"M83\" \"Midnight City (Eric Prydz Remix)\"", QueryStrategy::Exact),
                query("M83 Midnight City Eric Prydz", QueryStrategy::RemixAware),
                query("M83 Midnight City", QueryStrategy::Loose),
            ],
            &CancelHandle::new(),
        );

        assert_eq!(direct_calls.load(Ordering::SeqCst), 0);
        assert_eq!(web_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_search_retries_transient_failures_within_budget() {
        let direct = FakeTier::new(
            SearchTierKind::Direct,
            vec![
                Err(SearchFailure::transient("connection reset")),
                Err(SearchFailure::transient("timed out")),
                Ok(vec![candidate("Midnight City", "M83")]),
            ],
        );
        let direct_calls = direct.call_counter();

        // max_retries defaults to 2, so three attempts fit the budget.
        let orchestrator = orchestrator(vec![Box::new(direct)], fast_config());
        let outcome = orchestrator.search(
            &[query("M83 Midnight City", QueryStrategy::Loose)],
            &CancelHandle::new(),
        );

        assert_eq!(direct_calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.candidates.len(), 1);
        assert!(outcome.failure.is_none());
    }

    #[test]
    fn test_search_does_not_retry_permanent_failures() {
        let direct = FakeTier::new(
            SearchTierKind::Direct,
            vec![Err(SearchFailure::permanent("HTTP 404"))],
        );
        let direct_calls = direct.call_counter();

        let orchestrator = orchestrator(vec![Box::new(direct)], fast_config());
        let outcome = orchestrator.search(
            &[query("M83 Midnight City", QueryStrategy::Loose)],
            &CancelHandle::new(),
        );

        assert_eq!(direct_calls.load(Ordering::SeqCst), 1);
        assert!(outcome.candidates.is_empty());
        assert_eq!(
            outcome.failure.as_ref().map(|failure| failure.kind),
            Some(FailureKind::Permanent)
        );
    }

    #[test]
    fn test_search_transient_exhaustion_still_reaches_later_tiers() {
        let config = SearchConfig {
            max_retries: 1,
            retry_base_delay_seconds: 0,
            ..SearchConfig::default()
        };
        let direct = FakeTier::new(
            SearchTierKind::Direct,
            vec![
                Err(SearchFailure::transient("timed out")),
                Err(SearchFailure::transient("timed out")),
            ],
        );
        let direct_calls = direct.call_counter();
        let rendered = FakeTier::new(
            SearchTierKind::Rendered,
            vec![
                Err(SearchFailure::transient("render timed out")),
                Err(SearchFailure::transient("render timed out")),
            ],
        );
        let rendered_calls = rendered.call_counter();
        let web = FakeTier::new(
            SearchTierKind::WebSearch,
            vec![Ok(vec![candidate("Midnight City", "M83")])],
        );
        let web_calls = web.call_counter();

        let orchestrator = orchestrator(
            vec![Box::new(direct), Box::new(rendered), Box::new(web)],
            config,
        );
        let outcome = orchestrator.search(
            &[query("M83 Midnight City", QueryStrategy::Loose)],
            &CancelHandle::new(),
        );

        // Both catalog tiers burned their full retry budget, then the web
        // tier rescued the search, so no failure is reported.
        assert_eq!(direct_calls.load(Ordering::SeqCst), 2);
        assert_eq!(rendered_calls.load(Ordering::SeqCst), 2);
        assert_eq!(web_calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.candidates.len(), 1);
        assert!(outcome.failure.is_none());
    }

    #[test]
    fn test_search_cache_hit_short_circuits_the_tier() {
        let cache = Arc::new(MemoryCandidateCache::new());
        let key = CacheKey::new("M83 Midnight City", SearchTierKind::Direct);
        cache.put(&key, &[candidate("Midnight City", "M83")]);

        let direct = FakeTier::new(SearchTierKind::Direct, vec![]);
        let direct_calls = direct.call_counter();
        let orchestrator = SearchOrchestrator::new(
            vec![Box::new(direct)],
            cache,
            fast_config(),
        );
        let outcome = orchestrator.search(
            &[query("M83 Midnight City", QueryStrategy::Loose)],
            &CancelHandle::new(),
        );

        assert_eq!(direct_calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.candidates.len(), 1);
    }

    #[test]
    fn test_search_caches_empty_success_but_not_failures() {
        let direct = FakeTier::new(
            SearchTierKind::Direct,
            vec![
                Err(SearchFailure::permanent("HTTP 403")),
                Ok(Vec::new()),
                Ok(vec![candidate("never reached", "nobody")]),
            ],
        );
        let direct_calls = direct.call_counter();
        let orchestrator = orchestrator(vec![Box::new(direct)], fast_config());
        let queries = [query("M83 Midnight City", QueryStrategy::Loose)];

        // First search fails; the failure must not be cached.
        let first = orchestrator.search(&queries, &CancelHandle::new());
        assert!(first.failure.is_some());

        // Second search fetches again and gets the clean empty result.
        let second = orchestrator.search(&queries, &CancelHandle::new());
        assert!(second.candidates.is_empty());
        assert!(second.failure.is_none());

        // Third search hits the cached empty result instead of the script.
        let third = orchestrator.search(&queries, &CancelHandle::new());
        assert!(third.candidates.is_empty());
        assert!(third.failure.is_none());
        assert_eq!(direct_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_search_concurrent_callers_coalesce_to_one_fetch() {
        let direct = FakeTier::new(
            SearchTierKind::Direct,
            vec![Ok(vec![candidate("Midnight City", "M83")])],
        )
        .with_call_delay(Duration::from_millis(100));
        let direct_calls = direct.call_counter();
        let orchestrator = Arc::new(orchestrator(vec![Box::new(direct)], fast_config()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let orchestrator = Arc::clone(&orchestrator);
            handles.push(std::thread::spawn(move || {
                orchestrator.search(
                    &[query("M83 Midnight City", QueryStrategy::Loose)],
                    &CancelHandle::new(),
                )
            }));
        }
        let outcomes: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("search thread should not panic"))
            .collect();

        assert_eq!(direct_calls.load(Ordering::SeqCst), 1);
        for outcome in outcomes {
            assert_eq!(outcome.candidates.len(), 1);
            assert_eq!(outcome.candidates[0].title, "Midnight City");
        }
    }

    #[test]
    fn test_search_cancelled_before_start_yields_failure() {
        let direct = FakeTier::new(SearchTierKind::Direct, vec![]);
        let direct_calls = direct.call_counter();
        let orchestrator = orchestrator(vec![Box::new(direct)], fast_config());

        let cancel = CancelHandle::new();
        cancel.cancel();
        let outcome = orchestrator.search(
            &[query("M83 Midnight City", QueryStrategy::Loose)],
            &cancel,
        );

        assert_eq!(direct_calls.load(Ordering::SeqCst), 0);
        assert!(outcome.candidates.is_empty());
        assert!(outcome.failure.is_some());
    }

    #[test]
    fn test_search_empty_query_list_is_clean_empty() {
        let orchestrator = orchestrator(Vec::new(), fast_config());
        let outcome = orchestrator.search(&[], &CancelHandle::new());
        assert!(outcome.candidates.is_empty());
        assert!(outcome.failure.is_none());
    }

    #[test]
    fn test_retry_delay_grows_exponentially() {
        let config = SearchConfig {
            retry_base_delay_seconds: 1,
            ..SearchConfig::default()
        };
        let orchestrator = orchestrator(Vec::new(), config);
        let failure = SearchFailure::transient("timed out");

        let first = orchestrator.retry_delay(&failure, 1);
        let third = orchestrator.retry_delay(&failure, 3);
        assert!(first >= Duration::from_secs(1));
        assert!(first < Duration::from_secs(2));
        assert!(third >= Duration::from_secs(4));
        assert!(third < Duration::from_secs(5));
    }

    #[test]
    fn test_retry_delay_honors_rate_limit_floor_and_hint() {
        let orchestrator = orchestrator(Vec::new(), fast_config());

        let plain = SearchFailure::rate_limited("HTTP 429", None);
        assert!(orchestrator.retry_delay(&plain, 1) >= Duration::from_secs(5));

        let hinted = SearchFailure::rate_limited("HTTP 429", Some(Duration::from_secs(17)));
        assert!(orchestrator.retry_delay(&hinted, 1) >= Duration::from_secs(17));

        let excessive = SearchFailure::rate_limited("HTTP 429", Some(Duration::from_secs(3600)));
        assert!(orchestrator.retry_delay(&excessive, 1) <= Duration::from_secs(121));
    }
}
