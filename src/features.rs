//! Behavioral feature extraction
//!
//! Turns a session's event log into the fixed 14-feature vector. Extraction runs
//! in two phases: the primary counts are read off the event log, then the
//! derived ratios are computed from those counts.

use crate::types::{Event, FeatureVector, PrimaryFeatures, Session};
use std::collections::HashMap;
use tracing::debug;

/// Sessions shorter than this yield the all-zero vector
pub const MIN_EVENTS_FOR_FEATURES: usize = 2;

/// Substrings of a lower-cased action label that mark a block manipulation.
///
/// Maps onto Parsons actions such as `moveOutput`, `addOutput`, `removeOutput`.
pub const MANIPULATION_KEYWORDS: [&str; 8] = [
    "add", "move", "delete", "remove", "insert", "connect", "edit", "change",
];

/// Substrings of lower-cased hint feedback that point at block ordering
pub const POSITION_ERROR_KEYWORDS: [&str; 5] = ["order", "position", "sequence", "before", "after"];

/// Substrings of lower-cased hint feedback that point at indentation
pub const INDENT_ERROR_KEYWORDS: [&str; 5] = ["indent", "nest", "inside", "block", "structure"];

/// Feature extractor for session event logs
pub struct FeatureExtractor;

impl FeatureExtractor {
    /// Extract the behavioral feature vector for a session
    pub fn extract(session: &Session) -> FeatureVector {
        let events = &session.events;

        if events.len() < MIN_EVENTS_FOR_FEATURES {
            debug!(
                session_id = %session.session_id,
                events = events.len(),
                "too few events for feature extraction"
            );
            return FeatureVector::zeros();
        }

        let (start_time, end_time) = session.bounds();
        let visits = count_state_visits(events);

        let primary = PrimaryFeatures {
            total_time: end_time.saturating_sub(start_time),
            time_to_first_feedback: time_to_first_feedback(events),
            avg_time_between_actions: avg_time_between(events),
            manipulation_count: count_manipulations(events),
            feedback_count: count_feedback(events),
            unique_states: visits.len() as u32,
            state_revisits: visits.values().filter(|&&count| count > 1).count() as u32,
            max_visits_to_state: visits.values().copied().max().unwrap_or(0),
            success_rate: success_rate(events),
            consecutive_failures: max_consecutive_failures(events),
            incorrect_position_errors: count_hint_feedback_matching(
                events,
                &POSITION_ERROR_KEYWORDS,
            ),
            incorrect_indent_errors: count_hint_feedback_matching(events, &INDENT_ERROR_KEYWORDS),
        };

        FeatureVector::from_primary(primary, events.len())
    }
}

/// Time from the first event to the first hint request.
///
/// Returns 0 when no hint was requested, which is indistinguishable from a
/// hint requested on the very first event.
fn time_to_first_feedback(events: &[Event]) -> i64 {
    let Some(first) = events.first() else {
        return 0;
    };

    events
        .iter()
        .find(|e| e.is_hint())
        .map(|hint| hint.time.saturating_sub(first.time))
        .unwrap_or(0)
}

/// Mean of consecutive time deltas. Out-of-order timestamps give negative deltas.
fn avg_time_between(events: &[Event]) -> f64 {
    if events.len() < 2 {
        return 0.0;
    }

    let total: i128 = events
        .windows(2)
        .map(|pair| i128::from(pair[1].time) - i128::from(pair[0].time))
        .sum();
    total as f64 / (events.len() - 1) as f64
}

/// True when the lower-cased text contains any of the keywords
fn contains_any(text: &str, keywords: &[&str]) -> bool {
    let folded = text.to_lowercase();
    keywords.iter().any(|keyword| folded.contains(keyword))
}

/// Count events whose action is a block manipulation (one count per event)
fn count_manipulations(events: &[Event]) -> u32 {
    events
        .iter()
        .filter(|e| contains_any(&e.action, &MANIPULATION_KEYWORDS))
        .count() as u32
}

fn count_feedback(events: &[Event]) -> u32 {
    events.iter().filter(|e| e.is_hint()).count() as u32
}

/// Visit count per distinct observed state
fn count_state_visits(events: &[Event]) -> HashMap<&str, u32> {
    let mut visits: HashMap<&str, u32> = HashMap::new();
    for state in events.iter().filter_map(Event::state) {
        *visits.entry(state).or_insert(0) += 1;
    }
    visits
}

/// Fraction of hint requests after which the program state changed.
///
/// A hint that ends the session has no following event and can never count as
/// a success, but it still counts toward the denominator.
fn success_rate(events: &[Event]) -> f64 {
    let mut hints = 0u32;
    let mut successful = 0u32;

    for (idx, event) in events.iter().enumerate() {
        if !event.is_hint() {
            continue;
        }
        hints += 1;

        if let Some(next) = events.get(idx + 1) {
            if next.ast != event.ast {
                successful += 1;
            }
        }
    }

    if hints == 0 {
        return 0.0;
    }
    successful as f64 / hints as f64
}

/// Longest run of non-hint events that left the program state unchanged.
///
/// The state before the first event is taken to be absent, so a leading event
/// without a snapshot starts a run.
fn max_consecutive_failures(events: &[Event]) -> u32 {
    let mut max_streak = 0u32;
    let mut current_streak = 0u32;
    let mut last_ast: Option<&str> = None;

    for event in events {
        let current_ast = event.ast.as_deref();

        if current_ast == last_ast && !event.is_hint() {
            current_streak += 1;
            max_streak = max_streak.max(current_streak);
        } else {
            current_streak = 0;
        }

        last_ast = current_ast;
    }

    max_streak
}

/// Count hint events whose feedback mentions any of the keywords
fn count_hint_feedback_matching(events: &[Event], keywords: &[&str]) -> u32 {
    events
        .iter()
        .filter(|e| e.is_hint())
        .filter_map(Event::feedback_text)
        .filter(|feedback| contains_any(feedback, keywords))
        .count() as u32
}
