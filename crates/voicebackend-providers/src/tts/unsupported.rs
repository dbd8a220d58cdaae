use super::TtsProvider;
use crate::probe::{FileProbeResult, InitProbeResult, ProbeState};
use voicebackend_common::VoiceBackendError;

pub struct UnsupportedTtsProvider {
    engine: String,
    model_id: String,
    voice_id: String,
    probe: ProbeState,
}

impl UnsupportedTtsProvider {
    pub fn new(engine: impl Into<String>, model_id: impl Into<String>, voice_id: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            model_id: model_id.into(),
            voice_id: voice_id.into(),
            probe: ProbeState::default(),
        }
    }
}

impl TtsProvider for UnsupportedTtsProvider {
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
        FileProbeResult {
            installed: false,
            missing: vec![format!("tts_engine:{}", self.engine)],
            last_error: format!("tts_engine_unsupported:{}", self.engine),
        }
    }

    fn run_init_probe(&self) -> InitProbeResult {
        InitProbeResult {
            ready: false,
            startup_ms: 0,
            last_error: format!("tts_engine_unsupported:{}", self.engine),
        }
    }

    fn synthesize(&self, _text: &str, _request_id: &str) -> Result<(Vec<u8>, i32), VoiceBackendError> {
        let _ = &self.voice_id;
        Err(VoiceBackendError::EngineUnsupported(self.engine.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_engine_never_panics_at_construction() {
        let provider = UnsupportedTtsProvider::new("made-up-engine", "", "voice-1");
        assert!(!provider.file_probe().installed);
        assert!(provider.synthesize("hi", "req-1").is_err());
    }
}
