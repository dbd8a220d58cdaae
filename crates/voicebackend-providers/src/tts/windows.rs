use super::TtsProvider;
use crate::probe::{FileProbeResult, InitProbeResult, ProbeState};
use voicebackend_common::VoiceBackendError;

/// The `windows` engine tag is a pass-through placeholder: the real
/// synthesis runs in an external runtime (the OS speech API) that this
/// process never drives directly. The file/init probe always reports ready,
/// but `synthesize` always fails: callers of this engine are expected to
/// request synthesis out-of-process.
pub struct WindowsTtsProvider {
    probe: ProbeState,
}

impl Default for WindowsTtsProvider {
    fn default() -> Self {
        Self {
            probe: ProbeState::default(),
        }
    }
}

impl TtsProvider for WindowsTtsProvider {
    fn engine(&self) -> &str {
        "windows"
    }

    fn model_id(&self) -> &str {
        ""
    }

    fn requires_init_probe(&self) -> bool {
        false
    }

    fn probe_state(&self) -> &ProbeState {
        &self.probe
    }

    fn file_probe(&self) -> FileProbeResult {
        FileProbeResult::ok()
    }

    fn run_init_probe(&self) -> InitProbeResult {
        InitProbeResult {
            ready: true,
            startup_ms: 0,
            last_error: String::new(),
        }
    }

    fn synthesize(&self, _text: &str, _request_id: &str) -> Result<(Vec<u8>, i32), VoiceBackendError> {
        Err(VoiceBackendError::NotReady(
            "windows_engine_external_runtime".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_provider_probes_ready_but_never_synthesizes() {
        let provider = WindowsTtsProvider::default();
        assert!(provider.file_probe().installed);
        assert!(!provider.requires_init_probe());
        assert!(provider.synthesize("hello", "req-1").is_err());
    }
}
