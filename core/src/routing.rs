//! Routing keys and binding patterns.
//!
//! Events are routed by dot-delimited keys (`quest.progress.updated`).
//! Queue bindings use the same grammar plus `*`, which matches exactly one
//! segment: `achievement.*` matches `achievement.completed` but neither
//! `achievement` nor `achievement.progress.updated`.

/// Normalize an event type into a routing key.
///
/// Legacy producers emit a `scope:event` form; only the first `:` becomes a
/// `.`, any later ones are part of the name.
#[must_use]
pub fn normalize_routing_key(event_type: &str) -> String {
    event_type.replacen(':', ".", 1)
}

/// Whether a binding pattern matches a routing key.
///
/// Segment counts must agree; `*` matches any single segment and everything
/// else matches literally. A pattern without wildcards is an exact string
/// comparison.
#[must_use]
pub fn pattern_matches(pattern: &str, routing_key: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == routing_key;
    }

    let mut pattern_segments = pattern.split('.');
    let mut key_segments = routing_key.split('.');
    loop {
        match (pattern_segments.next(), key_segments.next()) {
            (None, None) => return true,
            (Some(p), Some(k)) if p == "*" || p == k => {}
            _ => return false,
        }
    }
}
