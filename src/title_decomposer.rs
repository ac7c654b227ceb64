//! Raw track title decomposition.
//!
//! DJ playlist exports carry version qualifiers and guest credits inside the
//! title string ("Midnight City (Eric Prydz Remix)", "Lean On feat. MØ").
//! `decompose` splits those out into a structured descriptor; it never fails
//! and degrades to the trimmed raw title when a parse is ambiguous.

use log::debug;

use crate::protocol::TitleDescriptor;
use crate::text_normalize::{collapse_whitespace, fold_punctuation, normalize_text};

/// Version qualifiers recognized as complete mix labels.
fn mix_label_vocabulary() -> &'static [&'static str] {
    &[
        "original mix",
        "extended mix",
        "radio edit",
        "club mix",
        "dub",
        "instrumental",
    ]
}

/// Trailing words that turn `<Name> <word>` into a remixer credit.
fn remix_suffixes() -> &'static [&'static str] {
    &["remix", "edit", "bootleg"]
}

#[derive(Debug, Clone)]
struct MixLabelMatch {
    /// Label as written in the title, whitespace collapsed.
    label: String,
    /// Remixer name when the label follows the `<Name> Remix` form.
    remixer: Option<String>,
}

/// Splits a raw title into base title, mix label, and featured artists.
///
/// Worst case returns the trimmed raw title with no label and no features.
/// Idempotent: decomposing a descriptor's `base_title` yields the same base
/// with `mix_label = None`.
pub fn decompose(raw_title: &str) -> TitleDescriptor {
    let cleaned = collapse_whitespace(&fold_punctuation(raw_title));
    if cleaned.is_empty() {
        return TitleDescriptor::plain(cleaned);
    }

    let (without_label, label_match) = strip_mix_label(&cleaned);
    let (base_title, mut featured_artists) = extract_featured_artists(&without_label);

    let mut mix_label = None;
    let mut is_remix = false;
    if let Some(found) = label_match {
        mix_label = Some(found.label);
        if let Some(remixer) = found.remixer {
            is_remix = true;
            push_unique_name(&mut featured_artists, remixer);
        }
    }

    let base_title = collapse_whitespace(&base_title);
    if base_title.is_empty() {
        // The whole title was qualifiers; keep the raw string instead.
        debug!("Title decomposition emptied \"{cleaned}\"; keeping raw title");
        return TitleDescriptor::plain(cleaned);
    }

    TitleDescriptor {
        base_title,
        mix_label,
        featured_artists,
        is_remix,
    }
}

/// Recovers the `<Name>` token from a remix-form mix label.
///
/// Returns `None` for vocabulary labels ("Radio Edit") and for labels with
/// no name ahead of the suffix.
pub fn remixer_name(mix_label: &str) -> Option<String> {
    let trimmed = collapse_whitespace(mix_label);
    if mix_label_vocabulary().contains(&normalize_text(&trimmed).as_str()) {
        return None;
    }
    let mut words: Vec<&str> = trimmed.split_whitespace().collect();
    let last = words.pop()?;
    let is_suffix = remix_suffixes()
        .iter()
        .any(|suffix| last.eq_ignore_ascii_case(suffix));
    if !is_suffix || words.is_empty() {
        return None;
    }
    Some(words.join(" "))
}

fn recognize_mix_label(segment: &str) -> Option<MixLabelMatch> {
    let trimmed = collapse_whitespace(segment);
    if trimmed.is_empty() {
        return None;
    }
    if mix_label_vocabulary().contains(&normalize_text(&trimmed).as_str()) {
        return Some(MixLabelMatch {
            label: trimmed,
            remixer: None,
        });
    }
    let remixer = remixer_name(&trimmed)?;
    Some(MixLabelMatch {
        label: trimmed,
        remixer: Some(remixer),
    })
}

/// Splits off the rightmost trailing bracketed segment, returning the
/// prefix, the segment interior, and the opening bracket character.
fn split_trailing_segment(value: &str) -> Option<(&str, &str, char)> {
    let trimmed = value.trim_end();
    let (open, close) = match trimmed.chars().last()? {
        ')' => ('(', ')'),
        ']' => ('[', ']'),
        _ => return None,
    };
    let close_index = trimmed.len() - close.len_utf8();
    let mut depth = 0i32;
    for (index, ch) in trimmed.char_indices().rev() {
        if ch == close {
            depth += 1;
        } else if ch == open {
            depth -= 1;
            if depth == 0 {
                let inner = &trimmed[index + open.len_utf8()..close_index];
                return Some((&trimmed[..index], inner, open));
            }
        }
    }
    None
}

/// Removes the first mix label found scanning the run of trailing bracketed
/// segments right to left, falling back to a trailing " - <label>" suffix.
/// Non-matching bracketed segments are preserved in the returned title.
fn strip_mix_label(title: &str) -> (String, Option<MixLabelMatch>) {
    let mut trailing: Vec<(String, char)> = Vec::new();
    let mut head = title;
    loop {
        match split_trailing_segment(head) {
            Some((prefix, inner, open)) => {
                trailing.push((inner.to_string(), open));
                head = prefix;
            }
            None => {
                let trimmed = head.trim_end();
                if trimmed.ends_with(')') || trimmed.ends_with(']') {
                    debug!("Unbalanced bracket in title \"{title}\"; keeping segment as-is");
                }
                break;
            }
        }
    }

    let mut matched_position = None;
    let mut label_match = None;
    for (position, (inner, _)) in trailing.iter().enumerate() {
        if let Some(found) = recognize_mix_label(inner) {
            matched_position = Some(position);
            label_match = Some(found);
            break;
        }
    }

    if label_match.is_none() {
        // No bracketed label; try the trailing dash-suffix export form.
        if let Some((prefix, suffix)) = title.rsplit_once(" - ") {
            if let Some(found) = recognize_mix_label(suffix) {
                return (prefix.to_string(), Some(found));
            }
        }
        return (title.to_string(), None);
    }

    let mut rebuilt = head.trim_end().to_string();
    for (position, (inner, open)) in trailing.iter().enumerate().rev() {
        if matched_position == Some(position) {
            continue;
        }
        let close = if *open == '(' { ')' } else { ']' };
        rebuilt.push(' ');
        rebuilt.push(*open);
        rebuilt.push_str(inner);
        rebuilt.push(close);
    }
    (rebuilt, label_match)
}

fn marker_token(token: &str) -> Option<&'static str> {
    let stripped = token.trim_end_matches('.').to_ascii_lowercase();
    match stripped.as_str() {
        "feat" => Some("feat"),
        "ft" => Some("ft"),
        "featuring" => Some("featuring"),
        "with" => Some("with"),
        _ => None,
    }
}

/// Moves feat./ft./featuring/with credits out of the title.
///
/// Bracketed forms accept every marker; the open form accepts only the
/// feat variants, because "with" mid-sentence is usually part of the title.
fn extract_featured_artists(title: &str) -> (String, Vec<String>) {
    let mut working = title.to_string();
    let mut names = Vec::new();

    while let Some((range, inner)) = find_bracketed_feature_segment(&working) {
        let name_text = inner
            .split_whitespace()
            .skip(1)
            .collect::<Vec<_>>()
            .join(" ");
        for name in split_artist_names(&name_text) {
            push_unique_name(&mut names, name);
        }
        working.replace_range(range, "");
    }

    let working = collapse_whitespace(&working);
    let tokens: Vec<&str> = working.split_whitespace().collect();
    let open_marker = tokens.iter().enumerate().skip(1).find_map(|(index, token)| {
        match marker_token(token) {
            Some(marker) if marker != "with" => Some(index),
            _ => None,
        }
    });

    let Some(marker_index) = open_marker else {
        return (working, names);
    };
    let after = &tokens[marker_index + 1..];
    let dash_position = after.iter().position(|token| *token == "-");
    let (name_tokens, tail) = match dash_position {
        Some(position) => (&after[..position], &after[position..]),
        None => (after, &[] as &[&str]),
    };
    if name_tokens.is_empty() {
        return (working, names);
    }
    for name in split_artist_names(&name_tokens.join(" ")) {
        push_unique_name(&mut names, name);
    }
    let mut base_tokens = tokens[..marker_index].to_vec();
    base_tokens.extend_from_slice(tail);
    (base_tokens.join(" "), names)
}

/// Finds a bracketed segment whose first word is a feature marker and
/// returns its byte range (brackets included) plus interior text.
fn find_bracketed_feature_segment(value: &str) -> Option<(std::ops::Range<usize>, String)> {
    let mut open_stack: Vec<(usize, char)> = Vec::new();
    for (index, ch) in value.char_indices() {
        match ch {
            '(' | '[' => open_stack.push((index, ch)),
            ')' | ']' => {
                let expected_open = if ch == ')' { '(' } else { '[' };
                let Some((open_index, open_char)) = open_stack.pop() else {
                    continue;
                };
                if open_char != expected_open {
                    continue;
                }
                let inner = &value[open_index + 1..index];
                let first_word = inner.split_whitespace().next().unwrap_or("");
                let has_names = inner.split_whitespace().nth(1).is_some();
                if marker_token(first_word).is_some() && has_names {
                    return Some((open_index..index + 1, inner.to_string()));
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits a credit run on commas, ampersands, and the word "and".
fn split_artist_names(value: &str) -> Vec<String> {
    let mut names = Vec::new();
    for comma_part in value.split(',') {
        let mut current: Vec<&str> = Vec::new();
        for word in comma_part.split_whitespace() {
            if word == "&" || word.eq_ignore_ascii_case("and") {
                if !current.is_empty() {
                    names.push(current.join(" "));
                    current.clear();
                }
            } else {
                current.push(word);
            }
        }
        if !current.is_empty() {
            names.push(current.join(" "));
        }
    }
    names
}

fn push_unique_name(names: &mut Vec<String>, candidate: String) {
    let normalized = normalize_text(&candidate);
    if normalized.is_empty() {
        return;
    }
    if names
        .iter()
        .any(|existing| normalize_text(existing) == normalized)
    {
        return;
    }
    names.push(candidate);
}
