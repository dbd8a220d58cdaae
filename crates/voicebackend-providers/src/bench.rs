//! Small helpers backing the `/stt/bench` diagnostic endpoint: audio
//! duration from a WAV buffer and the current process's resident set size.

use std::io::Cursor;
use voicebackend_common::VoiceBackendError;

/// Duration in seconds of a WAV buffer, computed from its sample count and
/// sample rate rather than trusting any duration header.
pub fn audio_seconds_from_wav(wav_bytes: &[u8]) -> Result<f64, VoiceBackendError> {
    let reader = hound::WavReader::new(Cursor::new(wav_bytes))
        .map_err(|e| VoiceBackendError::ManifestInvalid(format!("wav_read_failed:{e}")))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 || spec.channels == 0 {
        return Err(VoiceBackendError::ManifestInvalid("wav_spec_invalid".to_string()));
    }
    let frames = reader.duration() as f64;
    Ok(frames / spec.sample_rate as f64)
}

/// Resident set size of the current process, in megabytes. Reads
/// `/proc/self/status` on Linux; returns `0.0` where that isn't available
/// rather than failing the caller's bench response.
pub fn current_working_set_mb() -> f64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    let kb: f64 = rest.trim().trim_end_matches(" kB").trim().parse().unwrap_or(0.0);
                    return kb / 1024.0;
                }
            }
        }
        0.0
    }
    #[cfg(not(target_os = "linux"))]
    {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_seconds_from_wav_matches_sample_count() {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..16_000 {
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        let bytes = cursor.into_inner();
        let seconds = audio_seconds_from_wav(&bytes).unwrap();
        assert!((seconds - 1.0).abs() < 1e-6);
    }

    #[test]
    fn current_working_set_mb_is_non_negative() {
        assert!(current_working_set_mb() >= 0.0);
    }
}
