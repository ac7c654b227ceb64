//! Persistent enrichment configuration model and defaults.

use std::path::Path;

use log::warn;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Tier selection, caching, and retry behavior.
    pub search: SearchConfig,
    #[serde(default)]
    /// Remote catalog endpoints used by the direct and rendered tiers.
    pub catalog: CatalogConfig,
    #[serde(default)]
    /// General web search used as the last tier.
    pub web_search: WebSearchConfig,
    #[serde(default)]
    /// Candidate scoring thresholds.
    pub matching: MatchingConfig,
    #[serde(default)]
    /// Batch processing knobs.
    pub pipeline: PipelineConfig,
}

/// Tier selection, caching, and retry preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SearchConfig {
    /// Remix-aware queries are allowed to hit the direct catalog tier.
    #[serde(default = "default_true")]
    pub remix_queries_use_direct_tier: bool,
    /// Every query starts at the direct catalog tier, not just remix queries.
    #[serde(default = "default_true")]
    pub prefer_direct_tier_for_all_queries: bool,
    /// Whether the rendered-page fallback tier may run at all.
    #[serde(default)]
    pub rendered_fallback_enabled: bool,
    /// Budget for one rendered-page attempt, in seconds.
    #[serde(default = "default_rendered_fallback_timeout_seconds")]
    pub rendered_fallback_timeout_seconds: u64,
    /// How long cached search results stay valid, in seconds.
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential retry backoff, in seconds.
    #[serde(default = "default_retry_base_delay_seconds")]
    pub retry_base_delay_seconds: u64,
}

/// Remote catalog endpoints and request shaping.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_base_url")]
    pub base_url: String,
    /// Relative search endpoints tried in order until one responds.
    /// `{query}` is replaced with the URL-encoded query text.
    #[serde(default = "default_search_endpoint_templates")]
    pub search_endpoint_templates: Vec<String>,
    /// Relative path of the human search page, fetched by the rendered tier.
    #[serde(default = "default_search_page_path")]
    pub search_page_path: String,
    /// Marker preceding the JSON payload embedded in rendered search pages.
    #[serde(default = "default_embedded_payload_marker")]
    pub embedded_payload_marker: String,
    /// Domain used for site-scoped web queries.
    #[serde(default = "default_site_search_domain")]
    pub site_search_domain: String,
    /// Minimum spacing between catalog requests, in seconds.
    #[serde(default = "default_catalog_interval_seconds")]
    pub request_interval_seconds: u64,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Web search endpoint and request shaping.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct WebSearchConfig {
    /// Full URL template; `{query}` is replaced with the encoded query text.
    #[serde(default = "default_web_endpoint_template")]
    pub endpoint_template: String,
    #[serde(default = "default_web_interval_seconds")]
    pub request_interval_seconds: u64,
    #[serde(default = "default_web_timeout_seconds")]
    pub request_timeout_seconds: u64,
    /// Result rows parsed out of one response page.
    #[serde(default = "default_web_max_results")]
    pub max_results: usize,
}

/// Candidate scoring thresholds.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct MatchingConfig {
    /// Scores at or above this are accepted as confident matches.
    #[serde(default = "default_accept_threshold")]
    pub accept_threshold: f64,
    /// Scores below this count as no match at all.
    #[serde(default = "default_candidate_floor")]
    pub candidate_floor: f64,
}

/// Batch processing knobs.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_max_queries_per_track")]
    pub max_queries_per_track: usize,
    /// Overrides the cache database location; defaults to the platform data
    /// directory when unset.
    #[serde(default)]
    pub cache_db_path: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            remix_queries_use_direct_tier: true,
            prefer_direct_tier_for_all_queries: true,
            rendered_fallback_enabled: false,
            rendered_fallback_timeout_seconds: default_rendered_fallback_timeout_seconds(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            max_retries: default_max_retries(),
            retry_base_delay_seconds: default_retry_base_delay_seconds(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_catalog_base_url(),
            search_endpoint_templates: default_search_endpoint_templates(),
            search_page_path: default_search_page_path(),
            embedded_payload_marker: default_embedded_payload_marker(),
            site_search_domain: default_site_search_domain(),
            request_interval_seconds: default_catalog_interval_seconds(),
            request_timeout_seconds: default_request_timeout_seconds(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            endpoint_template: default_web_endpoint_template(),
            request_interval_seconds: default_web_interval_seconds(),
            request_timeout_seconds: default_web_timeout_seconds(),
            max_results: default_web_max_results(),
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            accept_threshold: default_accept_threshold(),
            candidate_floor: default_candidate_floor(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            max_queries_per_track: default_max_queries_per_track(),
            cache_db_path: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_rendered_fallback_timeout_seconds() -> u64 {
    12
}

fn default_cache_ttl_seconds() -> u64 {
    // Seven days.
    604_800
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_seconds() -> u64 {
    1
}

fn default_catalog_base_url() -> String {
    "https://www.beatport.com".to_string()
}

pub fn default_search_endpoint_templates() -> Vec<String> {
    vec![
        "/api/v4/catalog/search?q={query}&type=tracks&per_page=20".to_string(),
        "/api/v3/catalog/search?q={query}&type=tracks".to_string(),
    ]
}

fn default_search_page_path() -> String {
    "/search?q={query}".to_string()
}

fn default_embedded_payload_marker() -> String {
    "window.Playables".to_string()
}

fn default_site_search_domain() -> String {
    "www.beatport.com".to_string()
}

fn default_catalog_interval_seconds() -> u64 {
    2
}

fn default_request_timeout_seconds() -> u64 {
    7
}

fn default_user_agent() -> String {
    "cratedig/0.1".to_string()
}

fn default_web_endpoint_template() -> String {
    "https://html.duckduckgo.com/html/?q={query}".to_string()
}

fn default_web_interval_seconds() -> u64 {
    3
}

fn default_web_timeout_seconds() -> u64 {
    10
}

fn default_web_max_results() -> usize {
    10
}

fn default_accept_threshold() -> f64 {
    0.8
}

fn default_candidate_floor() -> f64 {
    0.5
}

fn default_worker_count() -> usize {
    4
}

fn default_max_queries_per_track() -> usize {
    6
}

/// Reads a config file, degrading to defaults when it is missing or broken.
pub fn load_config(path: &Path) -> Config {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(error) => {
            warn!(
                "Could not read config file {}: {error}; using defaults",
                path.display()
            );
            return Config::default();
        }
    };
    match toml::from_str::<Config>(&text) {
        Ok(config) => config,
        Err(error) => {
            warn!(
                "Could not parse config file {}: {error}; using defaults",
                path.display()
            );
            Config::default()
        }
    }
}
