//! Web-search fallback tier.
//!
//! Last resort: asks a general search engine for pages inside the catalog
//! domain and rebuilds candidates from the result titles. Relevance is lower
//! than the direct tiers, so this only runs after they come up empty.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::WebSearchConfig;
use crate::protocol::{CancelHandle, Query, RemoteCandidate, SearchFailure, SearchTierKind};
use crate::search::payload;
use crate::search::rate_gate::RateGate;
use crate::search::transport::HttpTransport;
use crate::search::SearchTier;

pub struct WebTier {
    transport: Arc<HttpTransport>,
    gate: Arc<RateGate>,
    config: WebSearchConfig,
    catalog_domain: String,
}

impl WebTier {
    pub fn new(
        transport: Arc<HttpTransport>,
        gate: Arc<RateGate>,
        config: WebSearchConfig,
        catalog_domain: String,
    ) -> Self {
        Self {
            transport,
            gate,
            config,
            catalog_domain,
        }
    }

    fn search_url(&self, query_text: &str) -> String {
        let encoded = urlencoding::encode(query_text);
        self.config.endpoint_template.replace("{query}", encoded.as_ref())
    }
}

impl SearchTier for WebTier {
    fn kind(&self) -> SearchTierKind {
        SearchTierKind::WebSearch
    }

    fn search(
        &self,
        query: &Query,
        cancel: &CancelHandle,
    ) -> Result<Vec<RemoteCandidate>, SearchFailure> {
        if !self.gate.wait_for_slot(cancel) {
            return Err(SearchFailure::permanent("cancelled before request"));
        }
        let url = self.search_url(&query.text);
        let body = self.transport.get_text(
            &url,
            "text/html",
            Duration::from_secs(self.config.request_timeout_seconds),
        )?;
        Ok(extract_result_candidates(
            &body,
            &self.catalog_domain,
            self.config.max_results,
        ))
    }
}

/// Collects result links pointing into the catalog domain, capped at
/// `max_results`. Engine redirect wrappers are unwrapped first.
fn extract_result_candidates(
    body: &str,
    catalog_domain: &str,
    max_results: usize,
) -> Vec<RemoteCandidate> {
    let keyword = site_keyword(catalog_domain);
    let mut candidates = Vec::new();
    let mut seen_urls = HashSet::new();
    for (href, text) in payload::scan_anchors(body) {
        if candidates.len() >= max_results {
            break;
        }
        let Some(target) = resolve_result_link(&href, catalog_domain) else {
            continue;
        };
        if text.is_empty() || !seen_urls.insert(target.clone()) {
            continue;
        }
        if let Some(candidate) = candidate_from_result_title(&text, &target, &keyword) {
            candidates.push(candidate);
        }
    }
    candidates
}

/// Unwraps the engine's redirect parameter when present and keeps only
/// targets whose host sits inside the catalog domain.
fn resolve_result_link(href: &str, catalog_domain: &str) -> Option<String> {
    let target = match href.find("uddg=") {
        Some(start) => {
            let encoded = &href[start + "uddg=".len()..];
            let encoded = encoded.split('&').next().unwrap_or(encoded);
            urlencoding::decode(encoded).ok()?.into_owned()
        }
        None => href.to_string(),
    };
    let host = target
        .strip_prefix("https://")
        .or_else(|| target.strip_prefix("http://"))?;
    let host = host.split('/').next().unwrap_or(host);
    let bare_domain = catalog_domain.trim_start_matches("www.");
    if host == catalog_domain || host == bare_domain || host.ends_with(&format!(".{bare_domain}")) {
        Some(target)
    } else {
        None
    }
}

/// Rebuilds a candidate from a search-result title. Engine results carry the
/// page title, which the catalog formats as
/// `Title (Mix) [Label] on <Site>` or `Title by Artist on <Site>`; the
/// trailing chrome, label bracket, and artist credit are peeled off in that
/// order.
fn candidate_from_result_title(
    text: &str,
    url: &str,
    site_keyword: &str,
) -> Option<RemoteCandidate> {
    let mut title = text.trim().to_string();
    for separator in [" on ", " | ", " :: "] {
        if let Some((head, tail)) = title.rsplit_once(separator) {
            if !site_keyword.is_empty() && tail.to_lowercase().contains(site_keyword) {
                title = head.trim().to_string();
            }
        }
    }

    let mut label = String::new();
    if title.ends_with(']') {
        if let Some((head, bracket)) = title.rsplit_once('[') {
            label = bracket.trim_end_matches(']').trim().to_string();
            title = head.trim().to_string();
        }
    }

    let mut artist = String::new();
    if let Some((head, tail)) = title.rsplit_once(" by ") {
        if !head.trim().is_empty() && !tail.trim().is_empty() {
            artist = tail.trim().to_string();
            title = head.trim().to_string();
        }
    }

    if title.is_empty() {
        return None;
    }
    Some(RemoteCandidate {
        source_url: url.to_string(),
        title,
        artist,
        label,
        ..RemoteCandidate::default()
    })
}

fn site_keyword(catalog_domain: &str) -> String {
    catalog_domain
        .trim_start_matches("www.")
        .split('.')
        .next()
        .unwrap_or(catalog_domain)
        .to_lowercase()
}
