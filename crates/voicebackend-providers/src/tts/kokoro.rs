use super::{pcm16_to_wav, TtsProvider};
use crate::probe::{verify_manifest_bundle, FileProbeResult, InitProbeResult, ProbeState};
use std::collections::HashSet;
use std::path::PathBuf;
use voicebackend_common::VoiceBackendError;

const KOKORO_ALLOWED_EXTENSIONS: &[&str] = &[".onnx", ".bin", ".npy", ".npz", ".json"];

#[derive(Debug, Clone)]
pub struct KokoroConfig {
    pub model_id: String,
    pub voice_id: String,
    pub voices_root: PathBuf,
}

/// Local ONNX-based kokoro voice bundle. `file_probe` verifies the voice
/// bundle manifest the same way STT model bundles are verified; synthesis
/// itself requires the optional `tts-local` feature's native runtime, which
/// this build does not compile in.
pub struct KokoroProvider {
    config: KokoroConfig,
    probe: ProbeState,
}

impl KokoroProvider {
    pub fn new(config: KokoroConfig) -> Self {
        Self {
            config,
            probe: ProbeState::default(),
        }
    }

    fn voice_dir(&self) -> PathBuf {
        self.config.voices_root.join(&self.config.voice_id)
    }
}

impl TtsProvider for KokoroProvider {
    fn engine(&self) -> &str {
        "kokoro"
    }

    fn model_id(&self) -> &str {
        &self.config.model_id
    }

    fn probe_state(&self) -> &ProbeState {
        &self.probe
    }

    fn file_probe(&self) -> FileProbeResult {
        if self.config.voice_id.trim().is_empty() {
            return FileProbeResult {
                installed: false,
                missing: vec!["voiceId".to_string()],
                last_error: "tts_voice_id_required".to_string(),
            };
        }
        let allowed: HashSet<&str> = KOKORO_ALLOWED_EXTENSIONS.iter().copied().collect();
        verify_manifest_bundle(
            &self.voice_dir(),
            &allowed,
            &format!("voices/{}", self.config.voice_id),
        )
    }

    fn run_init_probe(&self) -> InitProbeResult {
        InitProbeResult {
            ready: false,
            startup_ms: 0,
            last_error: "kokoro_runtime_not_compiled".to_string(),
        }
    }

    fn synthesize(&self, _text: &str, _request_id: &str) -> Result<(Vec<u8>, i32), VoiceBackendError> {
        Err(VoiceBackendError::NotReady(
            "kokoro_runtime_not_compiled".to_string(),
        ))
    }
}

/// Clamp raw float samples in `[-1.0, 1.0]` to PCM16 and wrap in a WAV
/// container. Exposed for a future native kokoro backend to reuse.
pub fn floats_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, VoiceBackendError> {
    let pcm: Vec<i16> = samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect();
    pcm16_to_wav(&pcm, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_probe_requires_voice_id() {
        let provider = KokoroProvider::new(KokoroConfig {
            model_id: String::new(),
            voice_id: String::new(),
            voices_root: PathBuf::from("/tmp/voices"),
        });
        let probe = provider.file_probe();
        assert!(!probe.installed);
        assert_eq!(probe.last_error, "tts_voice_id_required");
    }

    #[test]
    fn file_probe_fails_without_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let provider = KokoroProvider::new(KokoroConfig {
            model_id: "kokoro-v1".to_string(),
            voice_id: "af_heart".to_string(),
            voices_root: dir.path().to_path_buf(),
        });
        assert!(!provider.file_probe().installed);
    }

    #[test]
    fn floats_to_wav_clamps_out_of_range_samples() {
        let wav = floats_to_wav(&[2.0, -2.0, 0.5], 24000).unwrap();
        assert!(wav.starts_with(b"RIFF"));
    }
}
