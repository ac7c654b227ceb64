//! Search query construction.
//!
//! Turns one track plus its decomposed title into an ordered list of search
//! queries, most specific first. The list is deduplicated on normalized text
//! and capped, so downstream tiers can walk it without further filtering.

use std::collections::HashSet;

use crate::protocol::{Query, QueryStrategy, RawTrack, TitleDescriptor};
use crate::text_normalize::{collapse_whitespace, fold_punctuation, normalize_text};
use crate::title_decomposer::remixer_name;

/// Hard ceiling on queries per track, independent of configuration.
pub const MAX_QUERIES_PER_TRACK: usize = 6;

/// Builds the ordered query list for one track.
///
/// Order is fixed: exact quoted phrase, remix-aware, loose, site-scoped,
/// then title-only and artist-only fallbacks. Duplicates (by normalized
/// text) keep their first, most specific occurrence. The same inputs always
/// produce the same list.
pub fn generate_queries(
    track: &RawTrack,
    descriptor: &TitleDescriptor,
    site_domain: &str,
    max_queries: usize,
) -> Vec<Query> {
    let cap = max_queries.clamp(1, MAX_QUERIES_PER_TRACK);
    let artist = collapse_whitespace(&fold_punctuation(&track.artist));
    let raw_title = collapse_whitespace(&fold_punctuation(&track.title));
    let base_title = descriptor.base_title.trim();

    let mut queries = Vec::new();
    let mut seen = HashSet::new();

    // The quoted phrase is built from the cleaned raw title rather than the
    // reassembled descriptor, so featured-artist credit survives in it and
    // it stays distinct from the remix-aware variant.
    if descriptor.mix_label.is_some() && !artist.is_empty() && !raw_title.is_empty() {
        push_query(
            &mut queries,
            &mut seen,
            format!("\"{artist}\" \"{raw_title}\""),
            QueryStrategy::Exact,
        );
    }

    if descriptor.is_remix {
        if let Some(remixer) = descriptor.mix_label.as_deref().and_then(remixer_name) {
            let text = join_non_empty(&[&artist, base_title, &remixer]);
            push_query(&mut queries, &mut seen, text, QueryStrategy::RemixAware);
        }
    }

    push_query(
        &mut queries,
        &mut seen,
        join_non_empty(&[&artist, base_title]),
        QueryStrategy::Loose,
    );

    if !site_domain.trim().is_empty() {
        let scoped = join_non_empty(&[&artist, base_title]);
        if !scoped.is_empty() {
            push_query(
                &mut queries,
                &mut seen,
                format!("site:{} {scoped}", site_domain.trim()),
                QueryStrategy::SiteScoped,
            );
        }
    }

    // Last-resort variants for sparse exports with a missing field.
    push_query(
        &mut queries,
        &mut seen,
        base_title.to_string(),
        QueryStrategy::Loose,
    );
    push_query(&mut queries, &mut seen, artist, QueryStrategy::Loose);

    queries.truncate(cap);
    queries
}

fn push_query(
    queries: &mut Vec<Query>,
    seen: &mut HashSet<String>,
    text: String,
    strategy: QueryStrategy,
) {
    let normalized = normalize_text(&text);
    if normalized.is_empty() || !seen.insert(normalized) {
        return;
    }
    queries.push(Query { text, strategy });
}

fn join_non_empty(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|part| !part.trim().is_empty())
        .map(|part| part.trim())
        .collect::<Vec<_>>()
        .join(" ")
}
