//! Shared data model for the enrichment pipeline.
//!
//! This module defines the track/descriptor/query/candidate value types,
//! the search failure taxonomy, and the progress events broadcast while a
//! batch runs. Nothing here performs I/O.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::text_normalize;

/// One track handed in by the playlist-import collaborator.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RawTrack {
    /// Raw display title, possibly carrying mix labels and feat. markers.
    pub title: String,
    /// Raw artist credit string.
    pub artist: String,
    /// Track length in seconds when the export carried one.
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

/// Structured decomposition of a raw track title.
///
/// Derived once per track and never mutated afterwards; callers recompute
/// rather than patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleDescriptor {
    /// Title with mix labels and feat. markers removed.
    pub base_title: String,
    /// Trailing mix/version qualifier when one was recognized.
    pub mix_label: Option<String>,
    /// Artists named by feat. markers, in title order, with the remixer
    /// appended last when the mix label names one.
    pub featured_artists: Vec<String>,
    /// True when the mix label follows the `<Name> Remix/Edit/Bootleg` form.
    pub is_remix: bool,
}

impl TitleDescriptor {
    /// Fallback descriptor wrapping an undecomposed title.
    pub fn plain(base_title: String) -> Self {
        Self {
            base_title,
            mix_label: None,
            featured_artists: Vec::new(),
            is_remix: false,
        }
    }
}

/// Precision hint attached to each generated search query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStrategy {
    /// Quoted artist + base title + mix label.
    Exact,
    /// Artist + base title + remixer name, matching catalogs that credit
    /// remix tracks to the remixer.
    RemixAware,
    /// Unquoted artist + base title with the mix qualifier dropped.
    Loose,
    /// Loose text restricted to the catalog domain; consumed only by the
    /// web-search tier.
    SiteScoped,
}

/// One search attempt. Sequence position is the attempt order, most precise
/// first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub text: String,
    pub strategy: QueryStrategy,
}

/// The three escalating search tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchTierKind {
    /// Structured endpoints plus server-rendered page parsing.
    Direct,
    /// Headless-browser rendering of the search page.
    Rendered,
    /// Domain-scoped general web search.
    WebSearch,
}

impl SearchTierKind {
    /// Stable short label used in cache keys and log lines.
    pub fn label(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Rendered => "rendered",
            Self::WebSearch => "web",
        }
    }
}

/// Cache identity of one `(query, tier)` fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Normalized query text; queries differing only in case or punctuation
    /// share an entry.
    pub normalized_query: String,
    pub tier: SearchTierKind,
}

impl CacheKey {
    pub fn new(query_text: &str, tier: SearchTierKind) -> Self {
        Self {
            normalized_query: text_normalize::normalize_text(query_text),
            tier,
        }
    }

    /// Single-string form used by the persistent store.
    pub fn storage_key(&self) -> String {
        format!("{}\u{001f}{}", self.tier.label(), self.normalized_query)
    }
}

/// One remote catalog record produced by a search call.
///
/// Value type: produced fresh per call and never mutated. String fields are
/// empty when the source did not carry them.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RemoteCandidate {
    /// Catalog page the candidate was extracted from.
    pub source_url: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub bpm: Option<u32>,
    /// Musical key notation as the catalog prints it (e.g. "A min").
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub release_date: String,
}

/// Classification of a failed search step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeout, 5xx, or connection reset; eligible for retry.
    Transient,
    /// Non-retryable response (4xx other than 408/429).
    Permanent,
    /// HTTP 429; retried after a longer backoff floor.
    RateLimited,
    /// The rendered tier exceeded its budget.
    RenderTimeout,
}

impl FailureKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::RateLimited => "rate_limited",
            Self::RenderTimeout => "render_timeout",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a search step failed, carried through the outcome so the scorer can
/// distinguish a failed search from an empty one.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {detail}")]
pub struct SearchFailure {
    pub kind: FailureKind,
    pub detail: String,
    /// Server-provided retry hint, when one accompanied a rate limit.
    pub retry_after: Option<Duration>,
}

impl SearchFailure {
    pub fn transient(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            detail: detail.into(),
            retry_after: None,
        }
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            detail: detail.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(detail: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: FailureKind::RateLimited,
            detail: detail.into(),
            retry_after,
        }
    }

    pub fn render_timeout(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::RenderTimeout,
            detail: detail.into(),
            retry_after: None,
        }
    }

    /// Whether the bounded retry loop may attempt this step again.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, FailureKind::Transient | FailureKind::RateLimited)
    }
}

/// What the orchestrator hands to the scorer for one track.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub candidates: Vec<RemoteCandidate>,
    /// Set only when every tier came back empty and at least one step
    /// failed; an empty outcome without a failure is a clean no-result.
    pub failure: Option<SearchFailure>,
}

impl SearchOutcome {
    pub fn found(candidates: Vec<RemoteCandidate>) -> Self {
        Self {
            candidates,
            failure: None,
        }
    }

    pub fn failed(failure: SearchFailure) -> Self {
        Self {
            candidates: Vec::new(),
            failure: Some(failure),
        }
    }
}

/// Final disposition for one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Top candidate scored at or above the high-confidence threshold.
    Matched,
    /// Top candidate landed between the floor and the high threshold; kept
    /// but flagged for manual review.
    LowConfidence,
    /// No candidate cleared the confidence floor, or none were found.
    NoMatch,
    /// Search failed on every tier without producing candidates.
    SearchFailed,
}

/// One enrichment verdict, index-aligned with the input batch and immutable
/// once created.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct MatchResult {
    pub track: RawTrack,
    /// Absent for `NoMatch` and `SearchFailed` regardless of score.
    pub best_candidate: Option<RemoteCandidate>,
    /// Composite similarity of the top candidate, in [0, 1].
    pub score: f64,
    pub status: MatchStatus,
}

/// Progress events broadcast while a batch runs.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineMessage {
    /// A track finished processing. `completed` counts finished tracks and
    /// grows monotonically across the batch.
    TrackCompleted {
        /// Input position of the finished track.
        index: usize,
        title: String,
        status: MatchStatus,
        completed: usize,
        total: usize,
    },
    /// The batch ran to completion.
    BatchCompleted {
        total: usize,
        matched: usize,
        low_confidence: usize,
        no_match: usize,
        failed: usize,
    },
    /// The batch stopped on the cancel signal before finishing.
    BatchCancelled { completed: usize, total: usize },
}

/// Cooperative cancellation flag shared between the pipeline and its
/// workers. Cloning shares the flag.
///
/// Workers observe it between tracks, between queries, and between retry
/// waits; an in-flight HTTP call is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Construction-time failures surfaced by `PipelineManager::new`.
///
/// A running batch never fails; per-track trouble resolves to a
/// `MatchStatus` instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The persistent cache store could not be opened or migrated.
    #[error("cache store unavailable: {0}")]
    CacheStore(#[from] rusqlite::Error),
    /// The cache directory could not be created.
    #[error("cache directory unavailable: {0}")]
    CacheDir(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{CacheKey, CancelHandle, SearchFailure, SearchOutcome, SearchTierKind};

    #[test]
    fn test_cache_key_normalizes_query_text() {
        let key = CacheKey::new("  M83  Midnight City!! ", SearchTierKind::Direct);
        assert_eq!(key.normalized_query, "m83 midnight city");
    }

    #[test]
    fn test_cache_key_storage_form_separates_tiers() {
        let direct = CacheKey::new("m83 midnight city", SearchTierKind::Direct);
        let web = CacheKey::new("m83 midnight city", SearchTierKind::WebSearch);
        assert_ne!(direct.storage_key(), web.storage_key());
        assert!(direct.storage_key().starts_with("direct\u{001f}"));
    }

    #[test]
    fn test_search_failure_retryability_by_kind() {
        assert!(SearchFailure::transient("timed out").is_retryable());
        assert!(SearchFailure::rate_limited("429", Some(Duration::from_secs(3))).is_retryable());
        assert!(!SearchFailure::permanent("404").is_retryable());
        assert!(!SearchFailure::render_timeout("budget exceeded").is_retryable());
    }

    #[test]
    fn test_search_failure_display_carries_kind_and_detail() {
        let failure = SearchFailure::rate_limited("too many requests", None);
        assert_eq!(failure.to_string(), "rate_limited: too many requests");
    }

    #[test]
    fn test_empty_outcome_without_failure_is_clean() {
        let outcome = SearchOutcome::default();
        assert!(outcome.candidates.is_empty());
        assert!(outcome.failure.is_none());
    }

    #[test]
    fn test_cancel_handle_clones_share_the_flag() {
        let handle = CancelHandle::new();
        let observer = handle.clone();
        assert!(!observer.is_cancelled());

        handle.cancel();
        assert!(observer.is_cancelled());
    }
}
