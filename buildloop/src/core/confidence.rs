//! Extraction of the agent's self-reported confidence score.

use std::sync::LazyLock;

use regex::Regex;

static CONFIDENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bconfidence\b\s*(?:score|level)?\s*[:=]?\s*\**\s*(\d{1,3})(?:\s*/\s*10)?\b")
        .expect("confidence regex should be valid")
});

/// Extract the last `confidence: N` (0-10) reported in `text`.
///
/// Out-of-range values are ignored rather than clamped.
pub fn extract_confidence(text: &str) -> Option<u8> {
    CONFIDENCE_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u8>().ok())
        .filter(|value| *value <= 10)
        .last()
}
