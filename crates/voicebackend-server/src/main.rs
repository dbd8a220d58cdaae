//! Process entry point: CLI parsing, logging setup, provider registry and
//! job manager construction, and the bound HTTP server.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use voicebackend_providers::{ProviderRegistry, RuntimeConfig};
use voicebackend_server::server;
use voicebackend_youtube::JobManager;

/// Voice backend: YouTube job pipeline plus local STT/TTS HTTP surface.
#[derive(Parser, Debug)]
#[command(name = "voicebackend-server", version)]
struct Cli {
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    #[arg(long = "stt-engine", env = "ST_VOICE_STT_ENGINE")]
    stt_engine: Option<String>,

    #[arg(long = "stt-model-id", env = "ST_VOICE_STT_MODEL_ID")]
    stt_model_id: Option<String>,

    #[arg(long = "stt-language", env = "ST_VOICE_STT_LANGUAGE")]
    stt_language: Option<String>,

    #[arg(long = "device", env = "WHISPER_DEVICE")]
    device: Option<String>,

    #[arg(long = "tts-engine", env = "ST_VOICE_TTS_ENGINE")]
    tts_engine: Option<String>,

    #[arg(long = "tts-model-id", env = "ST_VOICE_TTS_MODEL_ID")]
    tts_model_id: Option<String>,

    #[arg(long = "tts-voice-id", env = "ST_VOICE_TTS_VOICE_ID")]
    tts_voice_id: Option<String>,

    /// Kokoro voice-pack variant; used as the TTS model id when
    /// `--tts-model-id` is not given and the engine resolves to `kokoro`.
    #[arg(long = "kokoro-variant", env = "ST_VOICE_KOKORO_VARIANT")]
    kokoro_variant: Option<String>,

    /// Root directory the YouTube pipeline writes `<videoId>/` output under.
    #[arg(long = "data-root", env = "ST_YOUTUBE_DATA_ROOT", default_value = "data")]
    data_root: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let tts_model_override = cli.tts_model_id.clone().or_else(|| cli.kokoro_variant.clone());
    let runtime_config = RuntimeConfig::from_env_and_overrides(
        cli.port,
        cli.stt_engine,
        cli.stt_model_id,
        cli.stt_language,
        cli.device,
        cli.tts_engine,
        tts_model_override,
        cli.tts_voice_id,
    );

    let port = runtime_config.port;
    let registry = Arc::new(ProviderRegistry::new(runtime_config));
    let asr_callback = Arc::new(server::ProviderAsrCallback::new(registry.clone()));
    let job_manager = Arc::new(JobManager::new(cli.data_root, asr_callback));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let bind_addr = format!("0.0.0.0:{port}");
        let handle = server::HttpServer::bind(&bind_addr, registry, job_manager).await?;
        handle.run().await
    })
}
