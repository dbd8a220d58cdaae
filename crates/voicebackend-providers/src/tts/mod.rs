mod kokoro;
mod unsupported;
mod windows;

pub use kokoro::{KokoroConfig, KokoroProvider};
pub use unsupported::UnsupportedTtsProvider;
pub use windows::WindowsTtsProvider;

use crate::probe::{build_engine_status, EngineStatus, FileProbeResult, InitProbeResult, ProbeState};
use voicebackend_common::VoiceBackendError;

/// Common shape every text-to-speech engine implements. Mirrors
/// [`crate::stt::SttProvider`]'s two-phase probe.
pub trait TtsProvider: Send + Sync {
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

    /// Synthesize `text` to mono PCM16 WAV bytes, returning `(wav_bytes,
    /// sample_rate)`.
    fn synthesize(&self, text: &str, request_id: &str) -> Result<(Vec<u8>, i32), VoiceBackendError>;
}

/// Pack raw little-endian PCM16 mono samples into a WAV container.
pub fn pcm16_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, VoiceBackendError> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| VoiceBackendError::ManifestInvalid(format!("wav_writer_init_failed:{e}")))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| VoiceBackendError::ManifestInvalid(format!("wav_write_failed:{e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| VoiceBackendError::ManifestInvalid(format!("wav_finalize_failed:{e}")))?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_to_wav_produces_riff_header() {
        let wav = pcm16_to_wav(&[0, 100, -100, 200], 24000).unwrap();
        assert!(wav.starts_with(b"RIFF"));
        assert!(wav.len() > 44);
    }
}
