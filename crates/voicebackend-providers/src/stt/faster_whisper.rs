use super::SttProvider;
use crate::probe::{verify_manifest_bundle, FileProbeResult, InitProbeResult, ProbeState};
use std::collections::HashSet;
use std::path::PathBuf;
use voicebackend_common::VoiceBackendError;

const STT_ALLOWED_EXTENSIONS: &[&str] = &[
    ".onnx", ".json", ".txt", ".bin", ".safetensors", ".model", ".wav",
];

#[derive(Debug, Clone)]
pub struct FasterWhisperConfig {
    pub model_id: String,
    pub model_dir: PathBuf,
    pub device: String,
}

/// Local CPU/GPU whisper-family provider. `file_probe` verifies the on-disk
/// model bundle; `run_init_probe` performs a short warm-up transcription to
/// confirm the engine actually loads.
pub struct FasterWhisperProvider {
    config: FasterWhisperConfig,
    probe: ProbeState,
}

impl FasterWhisperProvider {
    pub fn new(config: FasterWhisperConfig) -> Self {
        Self {
            config,
            probe: ProbeState::default(),
        }
    }

    fn allowed_extensions() -> HashSet<&'static str> {
        STT_ALLOWED_EXTENSIONS.iter().copied().collect()
    }
}

impl SttProvider for FasterWhisperProvider {
    fn engine(&self) -> &str {
        "faster-whisper"
    }

    fn model_id(&self) -> &str {
        &self.config.model_id
    }

    fn probe_state(&self) -> &ProbeState {
        &self.probe
    }

    fn file_probe(&self) -> FileProbeResult {
        verify_manifest_bundle(
            &self.config.model_dir,
            &Self::allowed_extensions(),
            "faster-whisper",
        )
    }

    #[cfg(any(feature = "stt-local-cpu", feature = "stt-local-cuda"))]
    fn run_init_probe(&self) -> InitProbeResult {
        match run_warmup(&self.config) {
            Ok(()) => InitProbeResult {
                ready: true,
                startup_ms: 0,
                last_error: String::new(),
            },
            Err(e) => InitProbeResult {
                ready: false,
                startup_ms: 0,
                last_error: e,
            },
        }
    }

    #[cfg(not(any(feature = "stt-local-cpu", feature = "stt-local-cuda")))]
    fn run_init_probe(&self) -> InitProbeResult {
        InitProbeResult {
            ready: false,
            startup_ms: 0,
            last_error: "faster_whisper_backend_not_compiled".to_string(),
        }
    }

    #[cfg(any(feature = "stt-local-cpu", feature = "stt-local-cuda"))]
    fn transcribe(
        &self,
        audio_wav: &[u8],
        language: &str,
        request_id: &str,
    ) -> Result<String, VoiceBackendError> {
        let cached = self.cached_init_probe();
        if !cached.is_some_and(|p| p.ready) {
            let probe = self.init_probe(false);
            if !probe.ready {
                return Err(VoiceBackendError::NotReady(probe.last_error));
            }
        }
        run_transcription(&self.config, audio_wav, language, request_id)
    }

    #[cfg(not(any(feature = "stt-local-cpu", feature = "stt-local-cuda")))]
    fn transcribe(
        &self,
        _audio_wav: &[u8],
        _language: &str,
        _request_id: &str,
    ) -> Result<String, VoiceBackendError> {
        Err(VoiceBackendError::NotReady(
            "faster_whisper_backend_not_compiled".to_string(),
        ))
    }
}

#[cfg(any(feature = "stt-local-cpu", feature = "stt-local-cuda"))]
fn run_warmup(config: &FasterWhisperConfig) -> Result<(), String> {
    // 1s of silence is enough to confirm the model loads and runs.
    let silence = vec![0i16; 16_000];
    transcribe_samples(config, &silence).map(|_| ()).map_err(|e| e.to_string())
}

#[cfg(any(feature = "stt-local-cpu", feature = "stt-local-cuda"))]
fn run_transcription(
    config: &FasterWhisperConfig,
    audio_wav: &[u8],
    language: &str,
    request_id: &str,
) -> Result<String, VoiceBackendError> {
    use hound::WavReader;
    use std::io::Cursor;

    log::debug!("faster-whisper transcribe requestId={request_id}");
    let mut reader = WavReader::new(Cursor::new(audio_wav))
        .map_err(|e| VoiceBackendError::ManifestInvalid(format!("invalid wav: {e}")))?;
    let samples: Vec<i16> = reader
        .samples::<i16>()
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| VoiceBackendError::ManifestInvalid(format!("wav decode failed: {e}")))?;

    let text = transcribe_samples_with_language(config, &samples, language)
        .map_err(|e| VoiceBackendError::NotReady(e.to_string()))?;
    Ok(text)
}

#[cfg(any(feature = "stt-local-cpu", feature = "stt-local-cuda"))]
fn transcribe_samples(config: &FasterWhisperConfig, samples: &[i16]) -> anyhow::Result<String> {
    transcribe_samples_with_language(config, samples, "en")
}

#[cfg(any(feature = "stt-local-cpu", feature = "stt-local-cuda"))]
fn transcribe_samples_with_language(
    config: &FasterWhisperConfig,
    samples: &[i16],
    language: &str,
) -> anyhow::Result<String> {
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    let model_path = config.model_dir.join("model.bin");
    let mut ctx_params = WhisperContextParameters::default();
    ctx_params.use_gpu = config.device.eq_ignore_ascii_case("cuda") || config.device.eq_ignore_ascii_case("gpu");
    let ctx = WhisperContext::new_with_params(
        model_path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("non-utf8 model path"))?,
        ctx_params,
    )?;
    let mut state = ctx.create_state()?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    if !language.is_empty() {
        params.set_language(Some(language));
    }
    params.set_print_progress(false);
    params.set_print_special(false);
    params.set_print_realtime(false);

    let floats: Vec<f32> = samples.iter().map(|&s| s as f32 / 32768.0).collect();
    state.full(params, &floats)?;

    let num_segments = state.full_n_segments()?;
    let mut out = String::new();
    for i in 0..num_segments {
        out.push_str(&state.full_get_segment_text(i)?);
    }
    Ok(out.trim().to_string())
}
