//! Track metadata enrichment for DJ collection libraries.
//!
//! Takes raw title/artist pairs the way they appear in a local collection,
//! splits noisy titles into their parts, generates a ladder of search
//! queries, runs them through tiered catalog search with caching and rate
//! limiting, and scores whatever came back into per-track match verdicts.
//!
//! [`PipelineManager`] is the embedding surface: construct it from a
//! [`Config`], subscribe for progress events, and feed it batches of
//! [`RawTrack`]s. The crate never initializes logging or spawns anything
//! outside a running batch.

pub mod config;
pub mod db_manager;
pub mod match_scorer;
pub mod pipeline_manager;
pub mod protocol;
pub mod query_generator;
pub mod search;
pub mod text_normalize;
pub mod title_decomposer;

pub use config::{load_config, Config};
pub use pipeline_manager::PipelineManager;
pub use protocol::{
    CancelHandle, MatchResult, MatchStatus, PipelineError, PipelineMessage, RawTrack,
};

use config::{CatalogConfig, MatchingConfig, PipelineConfig, SearchConfig, WebSearchConfig};

/// Clamps user-supplied settings into operable ranges before anything is
/// built from them.
pub fn sanitize_config(config: Config) -> Config {
    let clamped_workers = config.pipeline.worker_count.clamp(1, 16);
    let clamped_query_cap = config
        .pipeline
        .max_queries_per_track
        .clamp(1, query_generator::MAX_QUERIES_PER_TRACK);
    let clamped_accept = config.matching.accept_threshold.clamp(0.0, 1.0);
    let clamped_floor = config
        .matching
        .candidate_floor
        .clamp(0.0, 1.0)
        .min(clamped_accept);
    let clamped_retries = config.search.max_retries.min(8);
    let clamped_retry_base = config.search.retry_base_delay_seconds.min(30);
    let clamped_render_timeout = config
        .search
        .rendered_fallback_timeout_seconds
        .clamp(1, 120);
    let endpoint_templates = if config.catalog.search_endpoint_templates.is_empty() {
        config::default_search_endpoint_templates()
    } else {
        config.catalog.search_endpoint_templates
    };

    Config {
        search: SearchConfig {
            remix_queries_use_direct_tier: config.search.remix_queries_use_direct_tier,
            prefer_direct_tier_for_all_queries: config.search.prefer_direct_tier_for_all_queries,
            rendered_fallback_enabled: config.search.rendered_fallback_enabled,
            rendered_fallback_timeout_seconds: clamped_render_timeout,
            cache_ttl_seconds: config.search.cache_ttl_seconds,
            max_retries: clamped_retries,
            retry_base_delay_seconds: clamped_retry_base,
        },
        catalog: CatalogConfig {
            base_url: config.catalog.base_url,
            search_endpoint_templates: endpoint_templates,
            search_page_path: config.catalog.search_page_path,
            embedded_payload_marker: config.catalog.embedded_payload_marker,
            site_search_domain: config.catalog.site_search_domain,
            request_interval_seconds: config.catalog.request_interval_seconds.max(1),
            request_timeout_seconds: config.catalog.request_timeout_seconds.clamp(1, 60),
            user_agent: config.catalog.user_agent,
        },
        web_search: WebSearchConfig {
            endpoint_template: config.web_search.endpoint_template,
            request_interval_seconds: config.web_search.request_interval_seconds.max(1),
            request_timeout_seconds: config.web_search.request_timeout_seconds.clamp(1, 60),
            max_results: config.web_search.max_results.clamp(1, 50),
        },
        matching: MatchingConfig {
            accept_threshold: clamped_accept,
            candidate_floor: clamped_floor,
        },
        pipeline: PipelineConfig {
            worker_count: clamped_workers,
            max_queries_per_track: clamped_query_cap,
            cache_db_path: config.pipeline.cache_db_path,
        },
    }
}
