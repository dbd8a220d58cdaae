use super::SttProvider;
use crate::probe::{FileProbeResult, InitProbeResult, ProbeState};
use serde::Deserialize;
use std::time::Duration;
use voicebackend_common::VoiceBackendError;

#[derive(Debug, Clone)]
pub struct Qwen3AsrConfig {
    pub model_id: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct AsrResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    ready: bool,
}

/// Remote HTTP speech-to-text engine. `file_probe` treats an empty endpoint
/// as "not installed"; `run_init_probe` pings the remote health endpoint.
pub struct Qwen3AsrProvider {
    config: Qwen3AsrConfig,
    probe: ProbeState,
    client: reqwest::blocking::Client,
}

impl Qwen3AsrProvider {
    pub fn new(config: Qwen3AsrConfig) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self {
            config,
            probe: ProbeState::default(),
            client,
        }
    }

    fn authorize(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match &self.config.api_key {
            Some(key) if !key.is_empty() => builder.bearer_auth(key),
            _ => builder,
        }
    }
}

impl SttProvider for Qwen3AsrProvider {
    fn engine(&self) -> &str {
        "qwen3asr"
    }

    fn model_id(&self) -> &str {
        &self.config.model_id
    }

    fn probe_state(&self) -> &ProbeState {
        &self.probe
    }

    fn file_probe(&self) -> FileProbeResult {
        if self.config.endpoint.trim().is_empty() {
            return FileProbeResult {
                installed: false,
                missing: vec!["qwen3asr/endpoint".to_string()],
                last_error: "endpoint_not_configured".to_string(),
            };
        }
        FileProbeResult::ok()
    }

    fn run_init_probe(&self) -> InitProbeResult {
        let url = format!("{}/health", self.config.endpoint.trim_end_matches('/'));
        let request = self.authorize(self.client.get(&url));
        match request.send() {
            Ok(resp) if resp.status().is_success() => {
                let ready = resp
                    .json::<HealthResponse>()
                    .map(|h| h.ready)
                    .unwrap_or(true);
                InitProbeResult {
                    ready,
                    startup_ms: 0,
                    last_error: if ready {
                        String::new()
                    } else {
                        "remote_reported_not_ready".to_string()
                    },
                }
            }
            Ok(resp) => InitProbeResult {
                ready: false,
                startup_ms: 0,
                last_error: format!("remote_health_status:{}", resp.status().as_u16()),
            },
            Err(e) => InitProbeResult {
                ready: false,
                startup_ms: 0,
                last_error: format!("remote_health_unreachable:{e}"),
            },
        }
    }

    fn transcribe(
        &self,
        audio_wav: &[u8],
        language: &str,
        request_id: &str,
    ) -> Result<String, VoiceBackendError> {
        log::debug!(
            "qwen3asr transcribe requestId={request_id} bytes={}",
            audio_wav.len()
        );
        let url = format!("{}/v1/transcribe", self.config.endpoint.trim_end_matches('/'));
        let part = reqwest::blocking::multipart::Part::bytes(audio_wav.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceBackendError::NotReady(format!("multipart_build_failed:{e}")))?;
        let form = reqwest::blocking::multipart::Form::new()
            .part("audio", part)
            .text("language", language.to_string())
            .text("model", self.config.model_id.clone());

        let request = self.authorize(self.client.post(&url)).multipart(form);
        let response = request
            .send()
            .map_err(|e| VoiceBackendError::NotReady(format!("remote_request_failed:{e}")))?;

        if !response.status().is_success() {
            return Err(VoiceBackendError::NotReady(format!(
                "remote_status:{}",
                response.status().as_u16()
            )));
        }

        let parsed: AsrResponse = response
            .json()
            .map_err(|e| VoiceBackendError::NotReady(format!("remote_response_invalid:{e}")))?;
        Ok(parsed.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_probe_fails_without_endpoint() {
        let provider = Qwen3AsrProvider::new(Qwen3AsrConfig {
            model_id: String::new(),
            endpoint: String::new(),
            api_key: None,
            timeout_secs: 5,
        });
        let probe = provider.file_probe();
        assert!(!probe.installed);
        assert_eq!(probe.last_error, "endpoint_not_configured");
    }

    #[test]
    fn file_probe_passes_with_endpoint_configured() {
        let provider = Qwen3AsrProvider::new(Qwen3AsrConfig {
            model_id: "qwen3-asr".to_string(),
            endpoint: "http://localhost:9{unused}".to_string(),
            api_key: None,
            timeout_secs: 5,
        });
        assert!(provider.file_probe().installed);
    }
}
