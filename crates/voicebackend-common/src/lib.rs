//! Shared error types and small helpers used across the voice-backend crates.

use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceBackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("manifest invalid: {0}")]
    ManifestInvalid(String),

    #[error("engine unsupported: {0}")]
    EngineUnsupported(String),

    #[error("provider not ready: {0}")]
    NotReady(String),
}

pub type Result<T> = std::result::Result<T, VoiceBackendError>;

/// Current UTC time formatted as `%Y-%m-%dT%H:%M:%SZ`, matching the wire
/// format every timestamp field in this system uses.
pub fn utc_now_rfc3339() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Seconds since the Unix epoch, used for TTL/monotonic-ish bookkeeping.
/// `SystemTime` is monotonic enough for the eviction math in this system,
/// which only ever compares two timestamps taken from the same clock.
pub fn monotonic_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Read an integer environment variable, clamping to `[min, max]` and
/// silently falling back to `default` on an absent or unparsable value.
pub fn int_env(name: &str, default: i64, min: i64, max: i64) -> i64 {
    let raw = std::env::var(name).unwrap_or_default();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return default;
    }
    match trimmed.parse::<i64>() {
        Ok(v) => v.clamp(min, max),
        Err(_) => default,
    }
}

/// Read a float environment variable, clamping to `[min, max]`.
pub fn float_env(name: &str, default: f64, min: f64, max: f64) -> f64 {
    let raw = std::env::var(name).unwrap_or_default();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return default;
    }
    match trimmed.parse::<f64>() {
        Ok(v) => v.clamp(min, max),
        Err(_) => default,
    }
}

/// Read a boolean environment variable; truthy values are `1`, `true`,
/// `yes`, `on` (case-insensitive).
pub fn bool_env(name: &str, default: bool) -> bool {
    let raw = std::env::var(name).unwrap_or_default();
    let trimmed = raw.trim().to_ascii_lowercase();
    if trimmed.is_empty() {
        return default;
    }
    matches!(trimmed.as_str(), "1" | "true" | "yes" | "on")
}

/// Read a string environment variable, returning `None` when unset or blank.
pub fn string_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Truncate `text` to at most `max_chars` *characters* (not bytes), returning
/// the truncated text and whether truncation occurred.
pub fn truncate_text(text: &str, max_chars: usize) -> (String, bool) {
    if text.chars().count() <= max_chars {
        return (text.to_string(), false);
    }
    let truncated: String = text.chars().take(max_chars).collect();
    (truncated, true)
}

/// Clamp for captured subprocess/log output, shared by `ProcessRunner`'s
/// stdout/stderr truncation and the provider bench/probe log capture.
pub fn log_capture_max_chars() -> i64 {
    int_env("ST_YOUTUBE_LOG_CAPTURE_MAX_CHARS", 12_000, 1_000, 200_000)
}

/// Replace every byte outside `[A-Za-z0-9_-]` with `_`, strip leading and
/// trailing `_`, and cap the result at 96 bytes.
pub fn sanitize_folder_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('_');
    let mut bytes = trimmed.as_bytes();
    if bytes.len() > 96 {
        bytes = &bytes[..96];
    }
    // A truncation point that lands mid-codepoint would produce invalid
    // UTF-8; back off to the nearest char boundary.
    let mut end = bytes.len();
    while end > 0 && std::str::from_utf8(&bytes[..end]).is_err() {
        end -= 1;
    }
    std::str::from_utf8(&bytes[..end]).unwrap_or("").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_env_defaults_on_missing() {
        std::env::remove_var("VB_TEST_INT_ENV_MISSING");
        assert_eq!(int_env("VB_TEST_INT_ENV_MISSING", 5, 1, 10), 5);
    }

    #[test]
    fn int_env_clamps() {
        std::env::set_var("VB_TEST_INT_ENV_CLAMP", "999");
        assert_eq!(int_env("VB_TEST_INT_ENV_CLAMP", 5, 1, 10), 10);
        std::env::remove_var("VB_TEST_INT_ENV_CLAMP");
    }

    #[test]
    fn int_env_falls_back_on_garbage() {
        std::env::set_var("VB_TEST_INT_ENV_GARBAGE", "not-a-number");
        assert_eq!(int_env("VB_TEST_INT_ENV_GARBAGE", 5, 1, 10), 5);
        std::env::remove_var("VB_TEST_INT_ENV_GARBAGE");
    }

    #[test]
    fn bool_env_truthy_values() {
        for v in ["1", "true", "YES", "On"] {
            std::env::set_var("VB_TEST_BOOL_ENV", v);
            assert!(bool_env("VB_TEST_BOOL_ENV", false), "{v} should be truthy");
        }
        std::env::remove_var("VB_TEST_BOOL_ENV");
    }

    #[test]
    fn sanitize_folder_component_strips_and_truncates() {
        assert_eq!(sanitize_folder_component("abc-DEF_123"), "abc-DEF_123");
        assert_eq!(sanitize_folder_component("__weird/../path__"), "weird___path");
        assert_eq!(sanitize_folder_component(""), "");
        let long = "a".repeat(200);
        assert_eq!(sanitize_folder_component(&long).len(), 96);
    }

    #[test]
    fn truncate_text_reports_truncation() {
        let (s, truncated) = truncate_text("hello", 3);
        assert_eq!(s, "hel");
        assert!(truncated);
        let (s, truncated) = truncate_text("hi", 10);
        assert_eq!(s, "hi");
        assert!(!truncated);
    }
}
