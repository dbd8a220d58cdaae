mod faster_whisper;
mod qwen3_asr;
mod unsupported;

pub use faster_whisper::{FasterWhisperConfig, FasterWhisperProvider};
pub use qwen3_asr::{Qwen3AsrConfig, Qwen3AsrProvider};
pub use unsupported::UnsupportedSttProvider;

use crate::probe::{build_engine_status, EngineStatus, FileProbeResult, InitProbeResult, ProbeState};
use voicebackend_common::VoiceBackendError;

/// Common shape every speech-to-text engine implements: a two-phase
/// readiness probe plus a synchronous transcription call.
pub trait SttProvider: Send + Sync {
    fn engine(&self) -> &str;
    fn model_id(&self) -> &str;

    fn requires_init_probe(&self) -> bool {
        true
    }

    fn engine_version(&self) -> String {
        String::new()
    }

    fn probe_state(&self) -> &ProbeState;
    fn file_probe(&self) -> FileProbeResult;
    fn run_init_probe(&self) -> InitProbeResult;

    fn init_probe(&self, force: bool) -> InitProbeResult {
        self.probe_state().init_probe(
            force,
            self.requires_init_probe(),
            || self.file_probe(),
            || self.run_init_probe(),
        )
    }

    fn cached_init_probe(&self) -> Option<InitProbeResult> {
        self.probe_state().cached()
    }

    /// Build a health fragment; runs the init probe only when asked and the
    /// cache is empty or not-yet-ready.
    fn build_status(&self, instance_id: &str, run_init_probe: bool) -> EngineStatus {
        let file_probe = self.file_probe();
        let mut cached = self.cached_init_probe();
        if run_init_probe && !cached.as_ref().is_some_and(|c| c.ready) {
            cached = Some(self.init_probe(false));
        }
        build_engine_status(
            instance_id,
            self.engine(),
            &self.engine_version(),
            self.model_id(),
            self.requires_init_probe(),
            file_probe,
            cached,
        )
    }

    /// Transcribe 16kHz mono WAV bytes. Requires a successful prior init
    /// probe; implementations run it lazily if the cache is empty.
    fn transcribe(
        &self,
        audio_wav: &[u8],
        language: &str,
        request_id: &str,
    ) -> Result<String, VoiceBackendError>;
}
