//! Candidate extraction from catalog payloads.
//!
//! Catalog API versions disagree on payload nesting and field names, and the
//! rendered search page embeds yet another shape. Extraction is therefore a
//! cascade of tolerant lookups: the first path that yields a track array
//! wins, and each field falls back through its known spellings.

use std::collections::HashSet;

use serde_json::Value;

use crate::protocol::RemoteCandidate;
use crate::text_normalize::collapse_whitespace;

/// Nesting paths tried in order when locating the track array.
fn track_array_paths() -> &'static [&'static [&'static str]] {
    &[
        &["tracks", "data"],
        &["results", "tracks"],
        &["results"],
        &["data"],
        &["tracks"],
    ]
}

/// Maps a catalog payload to candidates. Unrecognized payload shapes and
/// items without a usable title produce nothing rather than an error.
pub fn extract_candidates(payload: &Value, base_url: &str, fallback_url: &str) -> Vec<RemoteCandidate> {
    let Some(items) = locate_track_array(payload) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| candidate_from_item(item, base_url, fallback_url))
        .collect()
}

/// Pulls the JSON value assigned to `marker` out of page HTML, e.g.
/// `window.Playables = {...};`. Returns `None` when the marker is absent,
/// not followed by an assignment, or the braces never balance.
pub fn extract_embedded_json(html: &str, marker: &str) -> Option<Value> {
    let marker_start = html.find(marker)?;
    let rest = html[marker_start + marker.len()..].trim_start();
    let rest = rest.strip_prefix('=')?.trim_start();

    let open = rest.chars().next()?;
    if open != '{' && open != '[' {
        return None;
    }
    let close = if open == '{' { '}' } else { ']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (index, ch) in rest.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        if ch == '"' {
            in_string = true;
        } else if ch == open {
            depth += 1;
        } else if ch == close {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return serde_json::from_str(&rest[..index + ch.len_utf8()]).ok();
            }
        }
    }
    None
}

/// Whether the payload carries a recognizable track array at all. An empty
/// array is still recognized; callers use this to tell "zero results" apart
/// from "wrong payload shape".
pub fn has_track_array(payload: &Value) -> bool {
    locate_track_array(payload).is_some()
}

/// Scans server-rendered markup for anchors linking to track pages. Last
/// extraction strategy in the cascade; the anchors carry only a title and a
/// URL, so these candidates lean entirely on title similarity downstream.
pub fn scan_track_anchors(html: &str, base_url: &str) -> Vec<RemoteCandidate> {
    let mut candidates = Vec::new();
    let mut seen_urls = HashSet::new();
    for (href, title) in scan_anchors(html) {
        if !href.contains("/track/") || title.is_empty() {
            continue;
        }
        let source_url = absolutize(&href, base_url);
        if !seen_urls.insert(source_url.clone()) {
            continue;
        }
        candidates.push(RemoteCandidate {
            source_url,
            title,
            ..RemoteCandidate::default()
        });
    }
    candidates
}

/// Lists every anchor in the markup as `(href, text)`, with the text
/// tag-stripped, entity-decoded, and whitespace-collapsed. Anchors without
/// an href are skipped; empty text is kept so callers can decide.
pub(crate) fn scan_anchors(html: &str) -> Vec<(String, String)> {
    let mut anchors = Vec::new();
    let mut rest = html;
    while let Some(anchor_start) = rest.find("<a ") {
        let after = &rest[anchor_start..];
        let Some(tag_end) = after.find('>') else { break };
        let tag = &after[..tag_end];
        let beyond_tag = &after[tag_end + 1..];
        let Some(close) = beyond_tag.find("</a>") else {
            rest = beyond_tag;
            continue;
        };
        let inner = &beyond_tag[..close];
        rest = &beyond_tag[close + "</a>".len()..];

        let Some(href) = attribute_value(tag, "href") else {
            continue;
        };
        let text = collapse_whitespace(&decode_entities(&strip_markup(inner)));
        anchors.push((href.to_string(), text));
    }
    anchors
}

fn attribute_value<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("{name}=\"");
    let start = tag.find(&needle)? + needle.len();
    let rest = &tag[start..];
    rest.find('"').map(|end| &rest[..end])
}

fn strip_markup(fragment: &str) -> String {
    let mut text = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for ch in fragment.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }
    text
}

// `&amp;` decodes last so entity names it shadows are not decoded twice.
fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn absolutize(href: &str, base_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        href.trim_start_matches('/')
    )
}

fn locate_track_array(payload: &Value) -> Option<&Vec<Value>> {
    for path in track_array_paths() {
        let mut cursor = payload;
        for segment in *path {
            cursor = &cursor[*segment];
        }
        if let Some(items) = cursor.as_array() {
            return Some(items);
        }
    }
    // A bare top-level array is already the track list.
    payload.as_array()
}

fn candidate_from_item(item: &Value, base_url: &str, fallback_url: &str) -> Option<RemoteCandidate> {
    let mut title = first_string(item, &["name", "title", "track_name"]);
    if title.is_empty() {
        return None;
    }
    let mix_name = first_string(item, &["mix_name", "mix"]);
    if !mix_name.is_empty() && !title.to_lowercase().contains(&mix_name.to_lowercase()) {
        title = format!("{title} ({mix_name})");
    }

    Some(RemoteCandidate {
        source_url: source_url(item, base_url, fallback_url),
        title,
        artist: artist_text(item),
        label: label_text(item),
        bpm: item["bpm"].as_u64().map(|bpm| bpm.min(u32::MAX as u64) as u32),
        key: nested_or_flat(item, "key", "name"),
        genre: genre_text(item),
        release_date: first_string(item, &["publish_date", "release_date", "new_release_date", "date"]),
    })
}

fn first_string(item: &Value, keys: &[&str]) -> String {
    for key in keys {
        let text = item[*key].as_str().unwrap_or_default().trim();
        if !text.is_empty() {
            return text.to_string();
        }
    }
    String::new()
}

fn nested_or_flat(item: &Value, outer: &str, inner: &str) -> String {
    let nested = item[outer][inner].as_str().unwrap_or_default().trim();
    if !nested.is_empty() {
        return nested.to_string();
    }
    item[outer].as_str().unwrap_or_default().trim().to_string()
}

fn artist_text(item: &Value) -> String {
    if let Some(artists) = item["artists"].as_array() {
        let names: Vec<&str> = artists
            .iter()
            .map(|artist| {
                artist["name"]
                    .as_str()
                    .unwrap_or_else(|| artist.as_str().unwrap_or_default())
                    .trim()
            })
            .filter(|name| !name.is_empty())
            .collect();
        if !names.is_empty() {
            return names.join(", ");
        }
    }
    first_string(item, &["artist", "artist_name"])
}

fn genre_text(item: &Value) -> String {
    let genre = nested_or_flat(item, "genre", "name");
    if !genre.is_empty() {
        return genre;
    }
    item["genres"][0]["name"]
        .as_str()
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn label_text(item: &Value) -> String {
    let release_label = item["release"]["label"]["name"]
        .as_str()
        .unwrap_or_default()
        .trim();
    if !release_label.is_empty() {
        return release_label.to_string();
    }
    nested_or_flat(item, "label", "name")
}

fn source_url(item: &Value, base_url: &str, fallback_url: &str) -> String {
    let explicit = first_string(item, &["url", "link"]);
    if !explicit.is_empty() {
        return explicit;
    }
    let slug = item["slug"].as_str().unwrap_or_default().trim();
    if let (false, Some(id)) = (slug.is_empty(), item["id"].as_u64()) {
        return format!("{}/track/{slug}/{id}", base_url.trim_end_matches('/'));
    }
    fallback_url.to_string()
}
