//! Suppression of internal routing-control payloads.
//!
//! The graph decides per query whether to answer directly or run retrieval
//! first, and that decision travels on the same channel as real assistant
//! tokens. A raw `{"route":"direct"}` must never render as chat content,
//! but "retrieve" is also an ordinary English word, so suppression requires
//! an exact shape match plus a length ceiling.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Ceiling on the trimmed length of a payload the filter may suppress.
/// Tuned against real traffic; long-form answers never match.
pub const ROUTE_PAYLOAD_MAX_LEN: usize = 240;

/// Matches a single `route: direct` / `route=retrieve` style line.
static ROUTE_LINE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^route\s*[:=]\s*(direct|retrieve)\.?$").expect("invalid route line regex")
});

/// Whether `text` is an internal route decision with the default ceiling.
pub fn is_route_control_payload(text: &str) -> bool {
    is_route_control_payload_with_limit(text, ROUTE_PAYLOAD_MAX_LEN)
}

/// Whether `text` is an internal route decision, using `max_len` as the
/// suppression ceiling.
///
/// True only when the trimmed text stays within `max_len` and matches one
/// of three shapes: a bare `direct`/`retrieve`, a single `route[:=] ...`
/// line, or a JSON object (optionally fenced) whose keys are a subset of
/// `{route, reason, explanation}`.
pub fn is_route_control_payload_with_limit(text: &str, max_len: usize) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.len() > max_len {
        return false;
    }

    if trimmed.eq_ignore_ascii_case("direct") || trimmed.eq_ignore_ascii_case("retrieve") {
        return true;
    }

    if !trimmed.contains('\n') && ROUTE_LINE_REGEX.is_match(trimmed) {
        return true;
    }

    is_route_json(trimmed)
}

fn is_route_json(text: &str) -> bool {
    let body = strip_code_fence(text);
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) else {
        return false;
    };
    let Some(Value::String(route)) = map.get("route") else {
        return false;
    };
    if !route.eq_ignore_ascii_case("direct") && !route.eq_ignore_ascii_case("retrieve") {
        return false;
    }
    map.keys()
        .all(|key| matches!(key.as_str(), "route" | "reason" | "explanation"))
}

/// Unwrap a ``` fenced block, dropping an optional language tag.
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return text;
    };
    match body.split_once('\n') {
        Some((first, tail)) if !first.trim_start().starts_with('{') => tail.trim(),
        _ => body.trim(),
    }
}
