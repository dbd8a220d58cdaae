//! Lazily-constructed, cached-by-key provider registry.

use crate::normalize::{normalize_stt_engine, normalize_stt_language, normalize_tts_engine, resolve_stt_model_id};
use crate::stt::{FasterWhisperConfig, FasterWhisperProvider, Qwen3AsrConfig, Qwen3AsrProvider, SttProvider, UnsupportedSttProvider};
use crate::tts::{KokoroConfig, KokoroProvider, TtsProvider, UnsupportedTtsProvider, WindowsTtsProvider};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use voicebackend_common::string_env;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub port: u16,
    pub stt_engine: String,
    pub stt_model_id: String,
    pub stt_language: String,
    pub stt_device: String,
    pub tts_engine: String,
    pub tts_model_id: String,
    pub tts_voice_id: String,
    pub models_root: PathBuf,
    pub voices_root: PathBuf,
    pub qwen3_endpoint: String,
    pub qwen3_api_key: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            port: 8001,
            stt_engine: "faster-whisper".to_string(),
            stt_model_id: "base".to_string(),
            stt_language: "en".to_string(),
            stt_device: "cpu".to_string(),
            tts_engine: "windows".to_string(),
            tts_model_id: String::new(),
            tts_voice_id: String::new(),
            models_root: PathBuf::from("models"),
            voices_root: PathBuf::from("voices"),
            qwen3_endpoint: String::new(),
            qwen3_api_key: None,
        }
    }
}

impl RuntimeConfig {
    /// Resolve a runtime configuration from explicit overrides, falling
    /// back to environment variables and finally hard defaults.
    pub fn from_env_and_overrides(
        port: Option<u16>,
        stt_engine: Option<String>,
        stt_model_id: Option<String>,
        stt_language: Option<String>,
        stt_device: Option<String>,
        tts_engine: Option<String>,
        tts_model_id: Option<String>,
        tts_voice_id: Option<String>,
    ) -> Self {
        let resolved_stt_engine = normalize_stt_engine(
            stt_engine
                .or_else(|| string_env("ST_VOICE_STT_ENGINE"))
                .or_else(|| string_env("WHISPER_ENGINE"))
                .as_deref(),
        );
        let resolved_stt_model = resolve_stt_model_id(
            &resolved_stt_engine,
            stt_model_id
                .or_else(|| string_env("ST_VOICE_STT_MODEL_ID"))
                .or_else(|| string_env("WHISPER_MODEL"))
                .as_deref(),
        );
        let resolved_stt_language = normalize_stt_language(
            stt_language
                .or_else(|| string_env("ST_VOICE_STT_LANGUAGE"))
                .or(Some("en".to_string()))
                .as_deref(),
        );
        let resolved_tts_engine = normalize_tts_engine(
            tts_engine.or_else(|| string_env("ST_VOICE_TTS_ENGINE")).as_deref(),
        );
        let resolved_tts_model = tts_model_id
            .or_else(|| string_env("ST_VOICE_TTS_MODEL_ID"))
            .unwrap_or_default();
        let resolved_tts_voice = tts_voice_id
            .or_else(|| string_env("ST_VOICE_TTS_VOICE_ID"))
            .unwrap_or_default();
        let resolved_device = stt_device
            .or_else(|| string_env("WHISPER_DEVICE"))
            .unwrap_or_else(|| "cpu".to_string())
            .trim()
            .to_ascii_lowercase();
        let resolved_device = if resolved_device.is_empty() {
            "cpu".to_string()
        } else {
            resolved_device
        };
        let resolved_port = port.unwrap_or_else(|| {
            string_env("PORT")
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(8001)
        });
        let models_root = string_env("ST_VOICE_MODELS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("models"));
        let voices_root = string_env("ST_VOICE_VOICES_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("voices"));

        Self {
            port: resolved_port,
            stt_engine: resolved_stt_engine,
            stt_model_id: resolved_stt_model,
            stt_language: resolved_stt_language,
            stt_device: resolved_device,
            tts_engine: resolved_tts_engine,
            tts_model_id: resolved_tts_model,
            tts_voice_id: resolved_tts_voice,
            models_root,
            voices_root,
            qwen3_endpoint: string_env("ST_VOICE_QWEN3ASR_ENDPOINT").unwrap_or_default(),
            qwen3_api_key: string_env("ST_VOICE_QWEN3ASR_API_KEY"),
        }
    }
}

type TtsKey = (String, String, String);
type SttKey = (String, String, String);

/// Caches one provider instance per distinct `(engine, model, extra)` key so
/// repeated requests for the same configuration reuse warm-up state instead
/// of re-probing every call.
pub struct ProviderRegistry {
    pub runtime_config: RuntimeConfig,
    tts_cache: Mutex<HashMap<TtsKey, Arc<dyn TtsProvider>>>,
    stt_cache: Mutex<HashMap<SttKey, Arc<dyn SttProvider>>>,
}

impl ProviderRegistry {
    pub fn new(runtime_config: RuntimeConfig) -> Self {
        Self {
            runtime_config,
            tts_cache: Mutex::new(HashMap::new()),
            stt_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_tts(
        &self,
        engine: Option<&str>,
        model_id: Option<&str>,
        voice_id: Option<&str>,
    ) -> Arc<dyn TtsProvider> {
        let resolved_engine = normalize_tts_engine(Some(engine.unwrap_or(&self.runtime_config.tts_engine)));
        let resolved_model = model_id
            .unwrap_or(&self.runtime_config.tts_model_id)
            .trim()
            .to_string();
        let resolved_voice = voice_id
            .unwrap_or(&self.runtime_config.tts_voice_id)
            .trim()
            .to_string();
        let key = (resolved_engine.clone(), resolved_model.clone(), resolved_voice.clone());

        let mut cache = self.tts_cache.lock();
        if let Some(provider) = cache.get(&key) {
            return provider.clone();
        }
        let provider: Arc<dyn TtsProvider> = self.create_tts_provider(&resolved_engine, &resolved_model, &resolved_voice);
        cache.insert(key, provider.clone());
        provider
    }

    pub fn get_stt(
        &self,
        engine: Option<&str>,
        model_id: Option<&str>,
        language: Option<&str>,
    ) -> Arc<dyn SttProvider> {
        let resolved_engine = normalize_stt_engine(Some(engine.unwrap_or(&self.runtime_config.stt_engine)));
        let resolved_model = resolve_stt_model_id(
            &resolved_engine,
            Some(model_id.unwrap_or(&self.runtime_config.stt_model_id)),
        );
        let resolved_language = normalize_stt_language(Some(
            language.unwrap_or(&self.runtime_config.stt_language),
        ));
        let key = (resolved_engine.clone(), resolved_model.clone(), resolved_language.clone());

        let mut cache = self.stt_cache.lock();
        if let Some(provider) = cache.get(&key) {
            return provider.clone();
        }
        let provider: Arc<dyn SttProvider> =
            self.create_stt_provider(&resolved_engine, &resolved_model, &resolved_language);
        cache.insert(key, provider.clone());
        provider
    }

    fn create_tts_provider(&self, engine: &str, model_id: &str, voice_id: &str) -> Arc<dyn TtsProvider> {
        match engine {
            "windows" => Arc::new(WindowsTtsProvider::default()),
            "kokoro" => Arc::new(KokoroProvider::new(KokoroConfig {
                model_id: model_id.to_string(),
                voice_id: voice_id.to_string(),
                voices_root: self.runtime_config.voices_root.clone(),
            })),
            other => Arc::new(UnsupportedTtsProvider::new(other, model_id, voice_id)),
        }
    }

    fn create_stt_provider(&self, engine: &str, model_id: &str, _language: &str) -> Arc<dyn SttProvider> {
        match engine {
            "faster-whisper" => Arc::new(FasterWhisperProvider::new(FasterWhisperConfig {
                model_id: model_id.to_string(),
                model_dir: self.runtime_config.models_root.join(model_id),
                device: self.runtime_config.stt_device.clone(),
            })),
            "qwen3asr" => Arc::new(Qwen3AsrProvider::new(Qwen3AsrConfig {
                model_id: model_id.to_string(),
                endpoint: self.runtime_config.qwen3_endpoint.clone(),
                api_key: self.runtime_config.qwen3_api_key.clone(),
                timeout_secs: 30,
            })),
            other => Arc::new(UnsupportedSttProvider::new(other, model_id)),
        }
    }
}
