use super::SttProvider;
use crate::probe::{FileProbeResult, InitProbeResult, ProbeState};
use voicebackend_common::VoiceBackendError;

/// Placeholder for an engine tag the registry doesn't recognize. Construction
/// never fails: the "unsupported" state surfaces through the same
/// probe/health path as any other provider failure.
pub struct UnsupportedSttProvider {
    engine: String,
    model_id: String,
    probe: ProbeState,
}

impl UnsupportedSttProvider {
    pub fn new(engine: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            model_id: model_id.into(),
            probe: ProbeState::default(),
        }
    }
}

impl SttProvider for UnsupportedSttProvider {
    fn engine(&self) -> &str {
        &self.engine
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn probe_state(&self) -> &ProbeState {
        &self.probe
    }

    fn file_probe(&self) -> FileProbeResult {
        FileProbeResult::unsupported(&self.engine)
    }

    fn run_init_probe(&self) -> InitProbeResult {
        InitProbeResult {
            ready: false,
            startup_ms: 0,
            last_error: format!("{}_engine_unsupported", self.engine),
        }
    }

    fn transcribe(
        &self,
        _audio_wav: &[u8],
        _language: &str,
        _request_id: &str,
    ) -> Result<String, VoiceBackendError> {
        Err(VoiceBackendError::EngineUnsupported(self.engine.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_engine_never_panics_at_construction() {
        let provider = UnsupportedSttProvider::new("made-up-engine", "");
        let probe = provider.file_probe();
        assert!(!probe.installed);
        assert!(provider.transcribe(&[], "en", "req-1").is_err());
    }
}
