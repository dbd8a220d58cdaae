//! HTTP surface: health, ASR/TTS inference, diagnostic test/bench routes,
//! shutdown, and the YouTube job-pipeline endpoints.

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use log::{error, info};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use voicebackend_providers::{ProviderRegistry, audio_seconds_from_wav, current_working_set_mb, normalize_stt_language};
use voicebackend_youtube::{AsrCallback, GenerationConfig, JobManager, StartJobRequest};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Bridges the job pipeline's abstract ASR callback to a concrete provider
/// resolved through the registry, so `voicebackend-youtube` never needs to
/// know about provider construction.
pub struct ProviderAsrCallback {
    registry: Arc<ProviderRegistry>,
}

impl ProviderAsrCallback {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }
}

impl AsrCallback for ProviderAsrCallback {
    fn transcribe(
        &self,
        audio_wav: &[u8],
        engine: &str,
        model: &str,
        language: &str,
        request_id: &str,
    ) -> std::result::Result<String, String> {
        let effective_language = normalize_stt_language(Some(language));
        let provider = self.registry.get_stt(Some(engine), Some(model), Some(&effective_language));
        provider
            .transcribe(audio_wav, &effective_language, request_id)
            .map_err(|e| e.to_string())
    }
}

#[derive(Clone)]
struct AppState {
    registry: Arc<ProviderRegistry>,
    jobs: Arc<JobManager>,
    instance_id: String,
}

pub struct HttpServer {
    handle: JoinHandle<()>,
}

impl HttpServer {
    pub async fn bind(bind_addr: &str, registry: Arc<ProviderRegistry>, jobs: Arc<JobManager>) -> Result<Self> {
        let instance_id = uuid::Uuid::new_v4().to_string();
        let state = AppState { registry, jobs, instance_id };

        let app = Router::new()
            .route("/health", get(handle_health))
            .route("/asr", post(handle_asr))
            .route("/tts", post(handle_tts))
            .route("/tts/test", post(handle_tts_test))
            .route("/stt/test", post(handle_stt_test))
            .route("/stt/bench", post(handle_stt_bench))
            .route("/shutdown", post(handle_shutdown))
            .route("/youtube/jobs", post(handle_start_job))
            .route("/youtube/jobs/:id", get(handle_get_job))
            .route("/youtube/jobs/:id/cancel", post(handle_cancel_job))
            .route("/youtube/status", get(handle_youtube_status))
            .layer(middleware::from_fn(request_id_middleware))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state);

        let addr: SocketAddr = bind_addr.parse()?;
        let listener = TcpListener::bind(&addr).await.with_context(|| format!("binding {bind_addr}"))?;
        let server = axum::serve(listener, app);

        let handle = tokio::spawn(async move {
            if let Err(e) = server.await {
                error!("axum server error: {e}");
            }
        });

        info!("HTTP server listening on {bind_addr}");
        Ok(Self { handle })
    }

    pub async fn run(self) -> Result<()> {
        self.handle.await.context("server task panicked")
    }
}

/// Echo `X-Request-Id` on every response, generating one when the request
/// didn't carry it.
async fn request_id_middleware(req: axum::extract::Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("req-{}", uuid::Uuid::new_v4().simple()));

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn extract_request_id(headers: &HeaderMap, provided: Option<String>) -> String {
    if let Some(p) = provided.filter(|p| !p.trim().is_empty()) {
        return p;
    }
    if let Some(h) = headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()).filter(|h| !h.trim().is_empty()) {
        return h.to_string();
    }
    format!("req-{}", uuid::Uuid::new_v4().simple())
}

fn error_response(status: StatusCode, error_code: &str, message: &str) -> Response {
    (status, Json(json!({ "error": message, "errorCode": error_code, "message": message }))).into_response()
}

fn insert_header(headers: &mut axum::http::HeaderMap, name: &'static str, value: &str) {
    if let Ok(v) = HeaderValue::from_str(value) {
        headers.insert(name, v);
    }
}

async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    let asr = state.registry.get_stt(None, None, None);
    let tts = state.registry.get_tts(None, None, None);
    let asr_status = asr.build_status(&state.instance_id, true);
    let tts_status = tts.build_status(&state.instance_id, true);
    let ready = asr_status.ready && tts_status.ready;

    let (error_code, message): (Option<&str>, String) = if !asr_status.ready {
        (Some("asr_not_ready"), asr_status.details.last_error.clone())
    } else if !tts_status.ready {
        (Some("tts_not_ready"), tts_status.details.last_error.clone())
    } else {
        (None, String::new())
    };

    Json(json!({
        "schemaVersion": 1,
        "instanceId": state.instance_id,
        "timestampUtc": voicebackend_common::utc_now_rfc3339(),
        "status": if ready { "ok" } else { "loading" },
        "ready": ready,
        "asrReady": asr_status.ready,
        "ttsReady": tts_status.ready,
        "version": env!("CARGO_PKG_VERSION"),
        "errorCode": error_code,
        "message": message,
        "asr": asr_status,
        "tts": tts_status,
    }))
}

struct AsrFields {
    audio: Option<Vec<u8>>,
    request_id: Option<String>,
    engine: Option<String>,
    model_id: Option<String>,
    language: Option<String>,
}

async fn collect_asr_fields(multipart: &mut Multipart) -> std::result::Result<AsrFields, String> {
    let mut fields = AsrFields { audio: None, request_id: None, engine: None, model_id: None, language: None };
    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "audio" | "file" => {
                fields.audio = Some(field.bytes().await.map_err(|e| e.to_string())?.to_vec());
            }
            "requestId" => fields.request_id = field.text().await.ok(),
            "engine" => fields.engine = field.text().await.ok(),
            "modelId" => fields.model_id = field.text().await.ok(),
            "language" => fields.language = field.text().await.ok(),
            _ => {
                let _ = field.bytes().await;
            }
        }
    }
    Ok(fields)
}

async fn handle_asr(State(state): State<AppState>, headers: HeaderMap, mut multipart: Multipart) -> Response {
    let fields = match collect_asr_fields(&mut multipart).await {
        Ok(f) => f,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "invalid_multipart", &e),
    };

    let Some(audio_bytes) = fields.audio else {
        return error_response(StatusCode::BAD_REQUEST, "missing_audio", "multipart field 'audio' or 'file' is required");
    };

    let request_id = extract_request_id(&headers, fields.request_id);
    let effective_language = normalize_stt_language(fields.language.as_deref());
    let provider = state.registry.get_stt(fields.engine.as_deref(), fields.model_id.as_deref(), Some(&effective_language));

    let probe = provider.init_probe(false);
    if !probe.ready {
        let engine_status = provider.build_status(&state.instance_id, false);
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "stt engine is not ready",
                "errorCode": "stt_unavailable",
                "requestId": request_id,
                "engineStatus": engine_status,
                "message": probe.last_error,
            })),
        )
            .into_response();
    }

    match provider.transcribe(&audio_bytes, &effective_language, &request_id) {
        Ok(text) => Json(json!({ "text": text, "requestId": request_id })).into_response(),
        Err(e) => {
            let engine_status = provider.build_status(&state.instance_id, false);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "transcription failed",
                    "errorCode": "stt_unavailable",
                    "requestId": request_id,
                    "engineStatus": engine_status,
                    "message": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
struct TtsRequest {
    text: String,
    #[serde(rename = "requestId")]
    request_id: Option<String>,
    engine: Option<String>,
    #[serde(rename = "modelId")]
    model_id: Option<String>,
    #[serde(rename = "voiceId")]
    voice_id: Option<String>,
    voice: Option<String>,
    format: Option<String>,
    #[serde(rename = "sampleRate")]
    #[allow(dead_code)]
    sample_rate: Option<u32>,
}

async fn handle_tts(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<TtsRequest>) -> Response {
    if body.text.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "empty_text", "text must not be empty");
    }

    let request_id = extract_request_id(&headers, body.request_id.clone());
    let voice = body.voice_id.clone().or_else(|| body.voice.clone());
    let provider = state.registry.get_tts(body.engine.as_deref(), body.model_id.as_deref(), voice.as_deref());

    let probe = provider.init_probe(false);
    if !probe.ready {
        let engine_status = provider.build_status(&state.instance_id, false);
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "tts engine is not ready",
                "errorCode": "tts_unavailable",
                "requestId": request_id,
                "engineStatus": engine_status,
                "message": probe.last_error,
            })),
        )
            .into_response();
    }

    match provider.synthesize(&body.text, &request_id) {
        Ok((wav_bytes, sample_rate)) => {
            let format = body.format.unwrap_or_else(|| "wav".to_string());
            let mut response = Response::new(axum::body::Body::from(wav_bytes));
            insert_header(response.headers_mut(), "content-type", "audio/wav");
            insert_header(response.headers_mut(), "x-sample-rate", &sample_rate.to_string());
            insert_header(response.headers_mut(), "x-channels", "1");
            insert_header(response.headers_mut(), "x-format", &format);
            insert_header(response.headers_mut(), "x-request-id", &request_id);
            response
        }
        Err(e) => {
            let engine_status = provider.build_status(&state.instance_id, false);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "synthesis failed",
                    "errorCode": "tts_unavailable",
                    "requestId": request_id,
                    "engineStatus": engine_status,
                    "message": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize, Default)]
struct EngineTestRequest {
    engine: Option<String>,
    #[serde(rename = "modelId")]
    model_id: Option<String>,
    #[serde(rename = "voiceId")]
    voice_id: Option<String>,
    language: Option<String>,
}

async fn handle_tts_test(State(state): State<AppState>, Json(body): Json<EngineTestRequest>) -> Json<Value> {
    let provider = state.registry.get_tts(body.engine.as_deref(), body.model_id.as_deref(), body.voice_id.as_deref());
    let probe = provider.init_probe(true);
    Json(json!({
        "engineStatus": provider.build_status(&state.instance_id, false),
        "probe": { "ready": probe.ready, "startupMs": probe.startup_ms, "lastError": probe.last_error },
    }))
}

async fn handle_stt_test(State(state): State<AppState>, Json(body): Json<EngineTestRequest>) -> Json<Value> {
    let effective_language = normalize_stt_language(body.language.as_deref());
    let provider = state.registry.get_stt(body.engine.as_deref(), body.model_id.as_deref(), Some(&effective_language));
    let probe = provider.init_probe(true);
    Json(json!({
        "engineStatus": provider.build_status(&state.instance_id, false),
        "probe": { "ready": probe.ready, "startupMs": probe.startup_ms, "lastError": probe.last_error },
    }))
}

async fn handle_stt_bench(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let fields = match collect_asr_fields(&mut multipart).await {
        Ok(f) => f,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "invalid_multipart", &e),
    };

    let Some(audio_bytes) = fields.audio else {
        return error_response(StatusCode::BAD_REQUEST, "missing_audio", "multipart field 'audio' or 'file' is required");
    };

    let audio_seconds = match audio_seconds_from_wav(&audio_bytes) {
        Ok(s) if s > 0.0 => s,
        _ => return error_response(StatusCode::BAD_REQUEST, "invalid_wav", "audio must be a valid non-empty WAV file"),
    };

    let effective_language = normalize_stt_language(fields.language.as_deref());
    let provider = state.registry.get_stt(fields.engine.as_deref(), fields.model_id.as_deref(), Some(&effective_language));

    let probe = provider.init_probe(false);
    if !probe.ready {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "stt_unavailable", &probe.last_error);
    }

    let started = Instant::now();
    let result = provider.transcribe(&audio_bytes, &effective_language, "bench");
    let wall_ms = started.elapsed().as_millis() as i64;

    match result {
        Ok(_) => Json(json!({
            "audioSeconds": audio_seconds,
            "wallMs": wall_ms,
            "rtf": (wall_ms as f64 / 1000.0) / audio_seconds,
            "startupMs": probe.startup_ms,
            "processWorkingSetMb": current_working_set_mb(),
            "device": state.registry.runtime_config.stt_device,
        }))
        .into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, "stt_unavailable", &e.to_string()),
    }
}

async fn handle_shutdown() -> Json<Value> {
    tokio::spawn(async {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        std::process::exit(0);
    });
    Json(json!({ "status": "shutting down" }))
}

#[derive(Deserialize)]
struct StartYoutubeJobBody {
    #[serde(rename = "videoUrl")]
    video_url: String,
    #[serde(rename = "languageHint", default)]
    language_hint: Option<String>,
    #[serde(rename = "keepAudio", default)]
    keep_audio: bool,
    #[serde(rename = "asrEngine", default)]
    asr_engine: Option<String>,
    #[serde(rename = "asrModel", default)]
    asr_model: Option<String>,
    #[serde(rename = "generationConfig", default)]
    generation_config: Option<GenerationConfigBody>,
    #[serde(rename = "draftTone", default)]
    draft_tone: Option<String>,
}

#[derive(Deserialize, Default)]
struct GenerationConfigBody {
    #[serde(rename = "baseUrl")]
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f64>,
    #[serde(rename = "maxInputChars")]
    max_input_chars: Option<usize>,
    #[serde(rename = "timeoutSec")]
    timeout_sec: Option<u64>,
}

fn resolve_generation_config(body: Option<GenerationConfigBody>) -> GenerationConfig {
    let defaults = GenerationConfig::default();
    match body {
        None => defaults,
        Some(g) => GenerationConfig {
            base_url: g.base_url.unwrap_or(defaults.base_url),
            model: g.model.unwrap_or(defaults.model),
            temperature: g.temperature.unwrap_or(defaults.temperature),
            max_input_chars: g.max_input_chars.unwrap_or(defaults.max_input_chars),
            timeout_sec: g.timeout_sec.unwrap_or(defaults.timeout_sec),
        },
    }
}

async fn handle_start_job(State(state): State<AppState>, Json(body): Json<StartYoutubeJobBody>) -> Response {
    let request = StartJobRequest {
        video_url: body.video_url,
        language_hint: body.language_hint.unwrap_or_default(),
        keep_audio: body.keep_audio,
        asr_engine: body.asr_engine.unwrap_or_default(),
        asr_model: body.asr_model.unwrap_or_default(),
        generation_config: resolve_generation_config(body.generation_config),
        draft_tone: body.draft_tone.unwrap_or_default(),
    };

    match state.jobs.start_job(request) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(e.to_wire())).into_response(),
    }
}

async fn handle_get_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.jobs.get_job(&id) {
        Some(view) => Json(view).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "job_not_found", "no job with that id"),
    }
}

async fn handle_cancel_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.jobs.cancel_job(&id) {
        Some(view) => Json(view).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "job_not_found", "no job with that id"),
    }
}

async fn handle_youtube_status(State(state): State<AppState>) -> Json<Value> {
    Json(state.jobs.dependency_status())
}
