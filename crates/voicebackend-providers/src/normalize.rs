//! Engine-tag and language normalization shared by the provider registry
//! and the HTTP surface.

/// Normalize a TTS engine tag; blank defaults to `"windows"`.
pub fn normalize_tts_engine(value: Option<&str>) -> String {
    let normalized = value.unwrap_or("").trim().to_ascii_lowercase();
    if normalized.is_empty() {
        "windows".to_string()
    } else {
        normalized
    }
}

/// Normalize an STT engine tag; blank defaults to `"faster-whisper"`, and the
/// legacy alias `"whisper"` is folded into it.
pub fn normalize_stt_engine(value: Option<&str>) -> String {
    let normalized = value.unwrap_or("").trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return "faster-whisper".to_string();
    }
    if normalized == "whisper" {
        return "faster-whisper".to_string();
    }
    normalized
}

/// Normalize a language hint: blank becomes `"en"`, `auto`/`detect` become
/// empty (meaning "let the provider auto-detect"), everything else is
/// lowercased and trimmed.
pub fn normalize_stt_language(value: Option<&str>) -> String {
    let normalized = value.unwrap_or("").trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return "en".to_string();
    }
    if normalized == "auto" || normalized == "detect" {
        return String::new();
    }
    normalized
}

/// Resolve the effective STT model id: an explicit non-empty id wins, else
/// each engine has its own sensible default (only `faster-whisper` has one).
pub fn resolve_stt_model_id(engine: &str, model_id: Option<&str>) -> String {
    let candidate = model_id.unwrap_or("").trim();
    if !candidate.is_empty() {
        return candidate.to_string();
    }
    if engine == "faster-whisper" {
        "base".to_string()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stt_engine_aliases_whisper() {
        assert_eq!(normalize_stt_engine(Some("Whisper")), "faster-whisper");
        assert_eq!(normalize_stt_engine(Some("")), "faster-whisper");
        assert_eq!(normalize_stt_engine(Some("qwen3asr")), "qwen3asr");
    }

    #[test]
    fn language_auto_becomes_empty() {
        assert_eq!(normalize_stt_language(Some("auto")), "");
        assert_eq!(normalize_stt_language(Some("Detect")), "");
        assert_eq!(normalize_stt_language(Some("")), "en");
        assert_eq!(normalize_stt_language(Some(" FR ")), "fr");
    }

    #[test]
    fn model_id_resolution_defaults_per_engine() {
        assert_eq!(resolve_stt_model_id("faster-whisper", None), "base");
        assert_eq!(resolve_stt_model_id("qwen3asr", None), "");
        assert_eq!(
            resolve_stt_model_id("faster-whisper", Some("large-v3")),
            "large-v3"
        );
    }
}
