//! Direct catalog tier.
//!
//! Tries the structured search endpoints in configured order, then falls
//! back to scanning the server-rendered search page for its embedded
//! payload. No browser is involved; that escalation belongs to the rendered
//! tier.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use serde_json::Value;

use crate::config::CatalogConfig;
use crate::protocol::{CancelHandle, Query, RemoteCandidate, SearchFailure, SearchTierKind};
use crate::search::payload;
use crate::search::rate_gate::RateGate;
use crate::search::transport::HttpTransport;
use crate::search::SearchTier;

pub struct DirectTier {
    transport: Arc<HttpTransport>,
    gate: Arc<RateGate>,
    config: CatalogConfig,
}

impl DirectTier {
    pub fn new(transport: Arc<HttpTransport>, gate: Arc<RateGate>, config: CatalogConfig) -> Self {
        Self {
            transport,
            gate,
            config,
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_seconds)
    }

    fn endpoint_url(&self, template: &str, query_text: &str) -> String {
        let encoded = urlencoding::encode(query_text);
        let path = template.replace("{query}", encoded.as_ref());
        join_url(&self.config.base_url, &path)
    }

    /// One structured-endpoint attempt. `Ok(None)` means the endpoint
    /// answered with a shape we do not recognize, which sends the cascade to
    /// the next template.
    fn fetch_endpoint(&self, url: &str) -> Result<Option<Vec<RemoteCandidate>>, SearchFailure> {
        let body = self
            .transport
            .get_text(url, "application/json", self.request_timeout())?;
        interpret_endpoint_body(&body, &self.config.base_url, url)
    }

    fn fetch_search_page(&self, query_text: &str) -> Result<Option<Vec<RemoteCandidate>>, SearchFailure> {
        let url = search_page_url(&self.config, query_text);
        let body = self.transport.get_text(&url, "text/html", self.request_timeout())?;
        Ok(extract_page_candidates(&body, &self.config, &url))
    }
}

impl SearchTier for DirectTier {
    fn kind(&self) -> SearchTierKind {
        SearchTierKind::Direct
    }

    fn search(
        &self,
        query: &Query,
        cancel: &CancelHandle,
    ) -> Result<Vec<RemoteCandidate>, SearchFailure> {
        let mut last_failure: Option<SearchFailure> = None;
        let mut saw_recognized_empty = false;

        for template in &self.config.search_endpoint_templates {
            if !self.gate.wait_for_slot(cancel) {
                return Err(SearchFailure::permanent("cancelled before request"));
            }
            let url = self.endpoint_url(template, &query.text);
            match self.fetch_endpoint(&url) {
                Ok(Some(candidates)) if !candidates.is_empty() => return Ok(candidates),
                Ok(Some(_)) => {
                    saw_recognized_empty = true;
                    debug!("Catalog endpoint {url} answered with zero results");
                }
                Ok(None) => {
                    debug!("Catalog endpoint {url} answered with an unrecognized payload shape");
                }
                Err(failure) => {
                    debug!("Catalog endpoint {url} failed: {failure}");
                    last_failure = Some(failure);
                }
            }
        }

        if !self.gate.wait_for_slot(cancel) {
            return Err(SearchFailure::permanent("cancelled before request"));
        }
        match self.fetch_search_page(&query.text) {
            Ok(Some(candidates)) if !candidates.is_empty() => Ok(candidates),
            // The page recognized the query and showed nothing.
            Ok(Some(_)) => Ok(Vec::new()),
            Ok(None) if saw_recognized_empty => Ok(Vec::new()),
            Ok(None) => match last_failure {
                Some(failure) => Err(failure),
                None => Ok(Vec::new()),
            },
            // An endpoint already answered "no results"; the page failure
            // does not override that.
            Err(_) if saw_recognized_empty => Ok(Vec::new()),
            Err(page_failure) => {
                // Keep whichever failure is still worth retrying.
                let failure = match last_failure {
                    Some(endpoint_failure) if endpoint_failure.is_retryable() => endpoint_failure,
                    _ => page_failure,
                };
                Err(failure)
            }
        }
    }
}

/// Decodes one endpoint response body. Invalid JSON is a permanent failure;
/// valid JSON in an unknown shape is `Ok(None)`.
fn interpret_endpoint_body(
    body: &str,
    base_url: &str,
    url: &str,
) -> Result<Option<Vec<RemoteCandidate>>, SearchFailure> {
    let parsed: Value = serde_json::from_str(body)
        .map_err(|error| SearchFailure::permanent(format!("Invalid JSON response: {error}")))?;
    if !payload::has_track_array(&parsed) {
        return Ok(None);
    }
    Ok(Some(payload::extract_candidates(&parsed, base_url, url)))
}

/// Builds the human-facing search page URL for a query. Shared with the
/// rendered tier, which loads the same page through a browser.
pub(crate) fn search_page_url(config: &CatalogConfig, query_text: &str) -> String {
    let encoded = urlencoding::encode(query_text);
    let path = config.search_page_path.replace("{query}", encoded.as_ref());
    join_url(&config.base_url, &path)
}

/// Runs the page extraction cascade over fetched markup: embedded payload
/// first, track-anchor scan second. `Some` means the page was recognized as
/// a results page, even with zero results; `None` means neither strategy
/// found anything to interpret. Shared with the rendered tier.
pub(crate) fn extract_page_candidates(
    body: &str,
    config: &CatalogConfig,
    page_url: &str,
) -> Option<Vec<RemoteCandidate>> {
    let embedded = payload::extract_embedded_json(body, &config.embedded_payload_marker)
        .map(|value| payload::extract_candidates(&value, &config.base_url, page_url));
    if matches!(&embedded, Some(candidates) if !candidates.is_empty()) {
        return embedded;
    }
    let anchors = payload::scan_track_anchors(body, &config.base_url);
    if !anchors.is_empty() {
        return Some(anchors);
    }
    if embedded.is_some() {
        // The payload was present and genuinely empty.
        return Some(Vec::new());
    }
    debug!("Search page at {page_url} carried no embedded payload or track links");
    None
}

fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base_url.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::{
        extract_page_candidates, interpret_endpoint_body, join_url, search_page_url, DirectTier,
    };
    use crate::config::CatalogConfig;
    use crate::protocol::FailureKind;
    use crate::search::rate_gate::RateGate;
    use crate::search::transport::HttpTransport;
    use std::sync::Arc;
    use std::time::Duration;

    const BASE_URL: &str = "https://www.beatport.com";

    fn sample_tier() -> DirectTier {
        DirectTier::new(
            Arc::new(HttpTransport::new("cratedig/test")),
            Arc::new(RateGate::new(Duration::from_secs(2))),
            CatalogConfig::default(),
        )
    }

    #[test]
    fn test_endpoint_url_encodes_query_into_template() {
        let tier = sample_tier();
        let url = tier.endpoint_url(
            "/api/v4/catalog/search?q={query}&type=tracks&per_page=20",
            "M83 Midnight City",
        );
        assert_eq!(
            url,
            "https://www.beatport.com/api/v4/catalog/search?q=M83%20Midnight%20City&type=tracks&per_page=20"
        );
    }

    #[test]
    fn test_search_page_url_uses_configured_path() {
        let url = search_page_url(&CatalogConfig::default(), "strobe deadmau5");
        assert_eq!(url, "https://www.beatport.com/search?q=strobe%20deadmau5");
    }

    #[test]
    fn test_join_url_handles_slashes_and_absolute_paths() {
        assert_eq!(join_url("https://a.com/", "/x"), "https://a.com/x");
        assert_eq!(join_url("https://a.com", "x"), "https://a.com/x");
        assert_eq!(join_url("https://a.com", "https://b.com/y"), "https://b.com/y");
    }

    #[test]
    fn test_interpret_endpoint_body_with_tracks() {
        let body = r#"{"tracks": {"data": [{"name": "Strobe", "artist": "deadmau5"}]}}"#;
        let outcome = interpret_endpoint_body(body, BASE_URL, "https://www.beatport.com/api")
            .expect("valid body should interpret")
            .expect("shape should be recognized");
        assert_eq!(outcome.len(), 1);
        assert_eq!(outcome[0].title, "Strobe");
    }

    #[test]
    fn test_interpret_endpoint_body_recognizes_empty_results() {
        let body = r#"{"tracks": {"data": []}}"#;
        let outcome = interpret_endpoint_body(body, BASE_URL, "https://www.beatport.com/api")
            .expect("valid body should interpret")
            .expect("shape should be recognized");
        assert!(outcome.is_empty());
    }

    #[test]
    fn test_interpret_endpoint_body_flags_unknown_shape() {
        let body = r#"{"message": "please upgrade to v5"}"#;
        let outcome = interpret_endpoint_body(body, BASE_URL, "https://www.beatport.com/api")
            .expect("valid body should interpret");
        assert!(outcome.is_none());
    }

    #[test]
    fn test_interpret_endpoint_body_rejects_invalid_json() {
        let failure = interpret_endpoint_body("<html>blocked</html>", BASE_URL, "url")
            .expect_err("html body should fail");
        assert_eq!(failure.kind, FailureKind::Permanent);
    }

    #[test]
    fn test_page_cascade_prefers_embedded_payload_over_anchors() {
        let body = r#"<script>window.Playables = {"tracks": [{"name": "Strobe", "artist": "deadmau5"}]};</script>
            <a href="/track/other/1">Other</a>"#;
        let candidates = extract_page_candidates(body, &CatalogConfig::default(), "page")
            .expect("page should be recognized");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "Strobe");
    }

    #[test]
    fn test_page_cascade_falls_back_to_anchor_scan() {
        let body = r#"<div><a href="/track/strobe/777">Strobe</a></div>"#;
        let candidates = extract_page_candidates(body, &CatalogConfig::default(), "page")
            .expect("anchors should be recognized");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].artist, "");
    }

    #[test]
    fn test_page_cascade_empty_payload_is_recognized_empty() {
        let body = r#"<script>window.Playables = {"tracks": []};</script>"#;
        let candidates = extract_page_candidates(body, &CatalogConfig::default(), "page")
            .expect("empty payload should still be recognized");
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_page_cascade_unrecognized_page_is_none() {
        let body = "<html><body>maintenance</body></html>";
        assert!(extract_page_candidates(body, &CatalogConfig::default(), "page").is_none());
    }
}
