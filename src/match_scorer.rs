//! Best-candidate selection.
//!
//! Each remote candidate gets a composite similarity blending title, artist,
//! and mix-label agreement, and the top candidate is graded against two
//! thresholds: below the floor it is no match at all, above the accept
//! threshold it is a confident match, and anything between is kept but
//! flagged for manual review.

use crate::config::MatchingConfig;
use crate::protocol::{
    MatchResult, MatchStatus, RawTrack, RemoteCandidate, SearchOutcome, TitleDescriptor,
};
use crate::text_normalize::{containment_ratio, contains_normalized, normalize_text, text_similarity};
use crate::title_decomposer::{decompose, remixer_name};

/// Scores this close together count as a tie and break on artist equality.
const TIE_EPSILON: f64 = 0.01;

// Weights when the input title carries a mix label; the spare tenth rewards
// candidates whose title repeats the label or remixer.
const TITLE_WEIGHT_WITH_MIX: f64 = 0.55;
const ARTIST_WEIGHT_WITH_MIX: f64 = 0.35;
const MIX_BONUS_WEIGHT: f64 = 0.10;

// Weights for plain titles.
const TITLE_WEIGHT_PLAIN: f64 = 0.60;
const ARTIST_WEIGHT_PLAIN: f64 = 0.40;

/// Grades one track's search outcome into a final verdict.
///
/// An empty candidate list resolves to `SearchFailed` when the outcome
/// carries a failure reason and to `NoMatch` when the search ran cleanly.
pub fn score(
    track: &RawTrack,
    outcome: &SearchOutcome,
    thresholds: &MatchingConfig,
) -> MatchResult {
    if outcome.candidates.is_empty() {
        let status = if outcome.failure.is_some() {
            MatchStatus::SearchFailed
        } else {
            MatchStatus::NoMatch
        };
        return MatchResult {
            track: track.clone(),
            best_candidate: None,
            score: 0.0,
            status,
        };
    }

    let descriptor = decompose(&track.title);
    let normalized_artist = normalize_text(&track.artist);

    let mut best: Option<(&RemoteCandidate, f64, bool)> = None;
    for candidate in &outcome.candidates {
        let composite = composite_score(track, &descriptor, candidate);
        let exact_artist = !normalized_artist.is_empty()
            && normalize_text(&candidate.artist) == normalized_artist;
        let wins = match &best {
            None => true,
            Some((_, best_score, best_exact)) => {
                composite > best_score + TIE_EPSILON
                    || ((composite - best_score).abs() <= TIE_EPSILON
                        && exact_artist
                        && !best_exact)
            }
        };
        if wins {
            best = Some((candidate, composite, exact_artist));
        }
    }

    let Some((best_candidate, top_score, _)) = best else {
        return MatchResult {
            track: track.clone(),
            best_candidate: None,
            score: 0.0,
            status: MatchStatus::NoMatch,
        };
    };

    let (status, retained) = if top_score < thresholds.candidate_floor {
        (MatchStatus::NoMatch, None)
    } else if top_score >= thresholds.accept_threshold {
        (MatchStatus::Matched, Some(best_candidate.clone()))
    } else {
        (MatchStatus::LowConfidence, Some(best_candidate.clone()))
    };

    MatchResult {
        track: track.clone(),
        best_candidate: retained,
        score: top_score,
        status,
    }
}

/// Composite similarity in [0, 1] for one candidate.
fn composite_score(
    track: &RawTrack,
    descriptor: &TitleDescriptor,
    candidate: &RemoteCandidate,
) -> f64 {
    // Compare base titles so differently worded mix labels do not drag the
    // title similarity down.
    let candidate_descriptor = decompose(&candidate.title);
    let title = text_similarity(&descriptor.base_title, &candidate_descriptor.base_title);
    let artist = artist_similarity(&track.artist, &candidate.artist);

    let composite = match mix_token(descriptor) {
        Some(token) => {
            let bonus = if contains_normalized(&candidate.title, &token) {
                1.0
            } else {
                0.0
            };
            TITLE_WEIGHT_WITH_MIX * title
                + ARTIST_WEIGHT_WITH_MIX * artist
                + MIX_BONUS_WEIGHT * bonus
        }
        None => TITLE_WEIGHT_PLAIN * title + ARTIST_WEIGHT_PLAIN * artist,
    };
    composite.clamp(0.0, 1.0)
}

/// The token the mix bonus looks for in candidate titles: the remixer name
/// for remix labels, the label itself otherwise.
fn mix_token(descriptor: &TitleDescriptor) -> Option<String> {
    let label = descriptor.mix_label.as_deref()?;
    Some(remixer_name(label).unwrap_or_else(|| label.to_string()))
}

/// Artist similarity tolerant of multi-artist credit strings: a credit that
/// contains the input artist wholesale counts as a full match. An empty
/// side scores zero, which keeps title-only candidates out of the confident
/// band.
fn artist_similarity(input_artist: &str, candidate_artist: &str) -> f64 {
    let input = normalize_text(input_artist);
    let candidate = normalize_text(candidate_artist);
    if input.is_empty() || candidate.is_empty() {
        return 0.0;
    }
    if input == candidate {
        return 1.0;
    }
    // Containment works on normalized words so "M83" lines up with the
    // "M83," in a joined credit string.
    text_similarity(input_artist, candidate_artist).max(containment_ratio(&input, &candidate))
}
