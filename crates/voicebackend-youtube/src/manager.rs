//! `JobManager`: the top-level pipeline orchestrator. Accepts a job request,
//! admits it through a bounded concurrency semaphore, drives the fixed
//! eight-stage state machine, and publishes observable status through the
//! shared [`JobStore`].

use crate::error::PipelineError;
use crate::facts::derive_facts_sheet;
use crate::generation_client::GenerationClient;
use crate::job::{CancelHandle, DraftTone, GenerationConfig, Job, JobInputs, JobView, Stage};
use crate::process_runner::ProcessRunner;
use crate::store::JobStore;
use crate::validator::{
    extract_json_object, extract_x_thread_post_bodies, is_newsletter_usable, linkedin_fallback_template,
    newsletter_fallback_template, normalize_hooks, normalize_linkedin, normalize_x_thread, number_x_thread_posts,
    payload_is_placeholder, split_drafts, truncate_x_thread_posts, Hook, HooksPayload,
};
use log::{error, info, warn};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use voicebackend_common::{int_env, sanitize_folder_component};

/// The injected STT callback: invokes an internal speech-to-text engine
/// through an abstract interface. Kept as a trait object so this crate
/// never depends on a concrete provider implementation; `voicebackend-server`
/// wires a `ProviderRegistry`-backed implementation at startup.
pub trait AsrCallback: Send + Sync {
    fn transcribe(
        &self,
        audio_wav: &[u8],
        engine: &str,
        model: &str,
        language: &str,
        request_id: &str,
    ) -> Result<String, String>;
}

pub struct StartJobRequest {
    pub video_url: String,
    pub language_hint: String,
    pub keep_audio: bool,
    pub asr_engine: String,
    pub asr_model: String,
    pub generation_config: GenerationConfig,
    pub draft_tone: String,
}

struct ToolBinary {
    path: String,
    available: bool,
}

fn resolve_tool(env_var: &str, default_name: &str) -> ToolBinary {
    let configured = voicebackend_common::string_env(env_var);
    let candidate = configured.unwrap_or_else(|| default_name.to_string());
    let available = std::process::Command::new(&candidate)
        .arg("--version")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    ToolBinary {
        path: candidate,
        available,
    }
}

pub struct JobManager {
    store: Arc<JobStore>,
    semaphore: Arc<tokio::sync::Semaphore>,
    max_concurrent_jobs: usize,
    data_root: PathBuf,
    yt_dlp: ToolBinary,
    ffmpeg: ToolBinary,
    asr: Arc<dyn AsrCallback>,
    download_timeout_sec: u64,
    convert_timeout_sec: u64,
}

impl JobManager {
    pub fn new(data_root: PathBuf, asr: Arc<dyn AsrCallback>) -> Self {
        let max_concurrent_jobs = int_env("ST_YOUTUBE_MAX_CONCURRENT_JOBS", 1, 1, 4) as usize;
        let yt_dlp = resolve_tool("ST_YOUTUBE_YTDLP_PATH", "yt-dlp");
        let ffmpeg = resolve_tool("ST_YOUTUBE_FFMPEG_PATH", "ffmpeg");
        info!(
            "YOUTUBE_PIPELINE_READY ytDlpAvailable={} ffmpegAvailable={} maxConcurrentJobs={}",
            yt_dlp.available, ffmpeg.available, max_concurrent_jobs
        );
        Self {
            store: Arc::new(JobStore::from_env()),
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent_jobs)),
            max_concurrent_jobs,
            data_root,
            yt_dlp,
            ffmpeg,
            asr,
            download_timeout_sec: int_env("ST_YOUTUBE_DOWNLOAD_TIMEOUT_SEC", 1200, 60, 10_800) as u64,
            convert_timeout_sec: int_env("ST_YOUTUBE_CONVERT_TIMEOUT_SEC", 1200, 60, 10_800) as u64,
        }
    }

    pub fn dependency_status(&self) -> Value {
        json!({
            "ready": self.yt_dlp.available && self.ffmpeg.available,
            "ytDlp": { "available": self.yt_dlp.available, "path": self.yt_dlp.path },
            "ffmpeg": { "available": self.ffmpeg.available, "path": self.ffmpeg.path },
            "dataRoot": self.data_root.display().to_string(),
            "maxConcurrentJobs": self.max_concurrent_jobs,
        })
    }

    pub fn get_job(&self, job_id: &str) -> Option<JobView> {
        self.store.get_view(job_id)
    }

    /// Idempotent on terminal jobs. `Queued` jobs transition directly to
    /// `Cancelled`; `Running` jobs have their cancel signal raised and
    /// attached process terminated, with the worker completing the
    /// transition once its current blocking operation returns.
    pub fn cancel_job(&self, job_id: &str) -> Option<JobView> {
        let handle = self.store.get_handle(job_id)?;
        let mut job = handle.lock();
        if job.status.is_terminal() {
            return Some(job.to_view());
        }
        info!("YOUTUBE_JOB_CANCEL_REQUESTED jobId={job_id} stage={:?}", job.stage);
        job.cancel.signal();
        if job.status == crate::job::Status::Queued {
            job.finish_failed(PipelineError::job_cancelled());
        } else {
            job.cancel.kill_attached(Duration::from_secs(5));
        }
        Some(job.to_view())
    }

    /// Validates the request synchronously; on success creates the job,
    /// enqueues it, and spawns its worker.
    pub fn start_job(self: &Arc<Self>, request: StartJobRequest) -> Result<JobView, PipelineError> {
        validate_video_url(&request.video_url)?;
        if request.asr_model.trim().is_empty() {
            return Err(PipelineError::asr_model_unavailable("asrModel must not be empty"));
        }

        let inputs = JobInputs {
            video_url: request.video_url,
            language_hint: request.language_hint,
            keep_audio: request.keep_audio,
            asr_engine: request.asr_engine,
            asr_model: request.asr_model,
            generation_config: request.generation_config,
            draft_tone: DraftTone::parse(&request.draft_tone),
        };

        let job = Job::new(crate::job::generate_job_id(), inputs);
        let view = job.to_view();
        info!("YOUTUBE_JOB_CREATED jobId={} videoUrl={}", view.job_id, view.video_url);
        let handle = self.store.insert(job);

        let manager = self.clone();
        tokio::task::spawn_blocking(move || manager.run_worker(handle));

        Ok(view)
    }

    fn run_worker(&self, handle: Arc<Mutex<Job>>) {
        let cancel = handle.lock().cancel.clone();
        let job_id = handle.lock().job_id.clone();

        loop {
            if cancel.is_cancelled() {
                warn!("YOUTUBE_JOB_CANCELLED_WHILE_QUEUED jobId={job_id}");
                handle.lock().finish_failed(
                    PipelineError::job_cancelled()
                        .with_details(json!({ "message": "Job cancelled while waiting for execution slot." })),
                );
                return;
            }
            match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => {
                    info!("YOUTUBE_JOB_STARTED jobId={job_id}");
                    self.execute_pipeline(&handle, &cancel);
                    drop(permit);
                    return;
                }
                Err(_) => std::thread::sleep(Duration::from_millis(250)),
            }
        }
    }

    fn execute_pipeline(&self, handle: &Arc<Mutex<Job>>, cancel: &Arc<CancelHandle>) {
        if let Err(e) = self.run_stages(handle, cancel) {
            let job_id = handle.lock().job_id.clone();
            if e.is_cancelled() {
                warn!("YOUTUBE_JOB_CANCELLED jobId={job_id}");
            } else {
                error!("YOUTUBE_JOB_FAILED jobId={job_id} code={} message={}", e.code, e.message);
            }
            handle.lock().finish_failed(e);
        }
    }

    fn check_cancel(cancel: &CancelHandle) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            Err(PipelineError::job_cancelled())
        } else {
            Ok(())
        }
    }

    fn run_stages(&self, handle: &Arc<Mutex<Job>>, cancel: &Arc<CancelHandle>) -> Result<(), PipelineError> {
        let (job_id, video_url, language_hint, asr_engine, asr_model, keep_audio, draft_tone, gen_config) = {
            let job = handle.lock();
            (
                job.job_id.clone(),
                job.inputs.video_url.clone(),
                job.inputs.language_hint.clone(),
                job.inputs.asr_engine.clone(),
                job.inputs.asr_model.clone(),
                job.inputs.keep_audio,
                job.inputs.draft_tone,
                job.inputs.generation_config.clone(),
            )
        };

        if !self.yt_dlp.available || !self.ffmpeg.available {
            warn!("YOUTUBE_DEPENDENCY_MISSING jobId={job_id} ytDlpAvailable={} ffmpegAvailable={}", self.yt_dlp.available, self.ffmpeg.available);
            return Err(PipelineError::dependency_missing(
                "Required tools are missing. Install yt-dlp and ffmpeg.",
            )
            .with_details(self.dependency_status()));
        }

        handle.lock().advance(Stage::Resolving, 0.05);
        log_stage_changed(&job_id, Stage::Resolving, 0.05);
        Self::check_cancel(cancel)?;
        let metadata = self.resolve_metadata(&video_url, cancel)?;

        let output_dir = self.data_root.join("youtube").join(&metadata.video_id);
        let work_dir = output_dir.join("work");
        std::fs::create_dir_all(&work_dir).map_err(|e| PipelineError::io_write_failed(e.to_string()))?;
        std::fs::create_dir_all(&output_dir).map_err(|e| PipelineError::io_write_failed(e.to_string()))?;

        {
            let mut job = handle.lock();
            job.artifacts.video_id = metadata.video_id.clone();
            job.artifacts.title = metadata.title.clone();
            job.artifacts.channel = metadata.channel.clone();
            job.artifacts.duration_sec = metadata.duration_sec;
            job.artifacts.output_dir = output_dir.display().to_string();
            job.advance(Stage::Resolving, 0.12);
        }
        log_stage_changed(&job_id, Stage::Resolving, 0.12);

        Self::check_cancel(cancel)?;
        handle.lock().advance(Stage::DownloadingAudio, 0.12);
        log_stage_changed(&job_id, Stage::DownloadingAudio, 0.12);
        let source_path = self.download_audio(&video_url, &work_dir, cancel)?;

        Self::check_cancel(cancel)?;
        handle.lock().advance(Stage::ConvertingAudio, 0.20);
        log_stage_changed(&job_id, Stage::ConvertingAudio, 0.20);
        let wav_path = self.convert_audio(&source_path, &work_dir, cancel)?;
        handle.lock().advance(Stage::ConvertingAudio, 0.35);

        Self::check_cancel(cancel)?;
        handle.lock().advance(Stage::Transcribing, 0.35);
        log_stage_changed(&job_id, Stage::Transcribing, 0.35);
        let audio_bytes = std::fs::read(&wav_path).map_err(|e| PipelineError::asr_transcribe_failed(e.to_string()))?;
        let request_id = job_id.clone();
        let transcript = self
            .asr
            .transcribe(&audio_bytes, &asr_engine, &asr_model, &language_hint, &request_id)
            .map_err(|e| {
                error!("YOUTUBE_ASR_TRANSCRIBE_FAILED jobId={job_id} message={e}");
                PipelineError::asr_transcribe_failed(e)
            })?;
        handle.lock().advance(Stage::Transcribing, 0.38);

        Self::check_cancel(cancel)?;
        handle.lock().advance(Stage::WritingTranscript, 0.38);
        log_stage_changed(&job_id, Stage::WritingTranscript, 0.38);
        let transcript_path = output_dir.join("transcript.txt");
        write_text_file(&transcript_path, &transcript, true)?;
        handle.lock().artifacts.transcript_path = Some(transcript_path.display().to_string());
        handle.lock().advance(Stage::WritingTranscript, 0.55);

        Self::check_cancel(cancel)?;
        handle.lock().advance(Stage::ExtractingHooks, 0.55);
        log_stage_changed(&job_id, Stage::ExtractingHooks, 0.55);
        let generation_client = GenerationClient::new(gen_config.clone());
        let hooks_payload = self.extract_hooks(
            &generation_client,
            &transcript,
            &metadata,
            draft_tone,
            gen_config.max_input_chars,
        )?;
        let facts = derive_facts_sheet(&metadata.title, &metadata.channel, &hooks_payload.hooks, draft_tone);
        let hooks_path = output_dir.join("hooks.json");
        write_json_file(&hooks_path, &hooks_payload)?;
        let facts_path = output_dir.join("facts_sheet.json");
        write_json_file(&facts_path, &facts)?;
        {
            let mut job = handle.lock();
            job.artifacts.hooks_path = Some(hooks_path.display().to_string());
            job.artifacts.facts_sheet_path = Some(facts_path.display().to_string());
            job.advance(Stage::ExtractingHooks, 0.80);
        }
        log_stage_changed(&job_id, Stage::ExtractingHooks, 0.80);

        Self::check_cancel(cancel)?;
        handle.lock().advance(Stage::GeneratingDrafts, 0.80);
        log_stage_changed(&job_id, Stage::GeneratingDrafts, 0.80);
        let drafts = self.generate_drafts(&generation_client, &hooks_payload, draft_tone, &facts)?;
        handle.lock().advance(Stage::GeneratingDrafts, 0.92);

        Self::check_cancel(cancel)?;
        handle.lock().advance(Stage::WritingAssets, 0.92);
        log_stage_changed(&job_id, Stage::WritingAssets, 0.92);
        let linkedin_path = output_dir.join("linkedin_carousel.md");
        write_text_file(&linkedin_path, &drafts.linkedin, true)?;
        let x_thread_path = output_dir.join("x_thread.txt");
        write_text_file(&x_thread_path, &drafts.x_thread, true)?;
        let newsletter_path = output_dir.join("newsletter_summary.md");
        write_text_file(&newsletter_path, &drafts.newsletter, true)?;

        let summary = build_summary(&metadata.title, &hooks_payload.hooks);
        let summary_path = output_dir.join("summary.txt");
        write_text_file(&summary_path, &summary, false)?;

        {
            let mut job = handle.lock();
            job.artifacts.linkedin_carousel_path = Some(linkedin_path.display().to_string());
            job.artifacts.x_thread_path = Some(x_thread_path.display().to_string());
            job.artifacts.newsletter_summary_path = Some(newsletter_path.display().to_string());
            job.artifacts.summary_path = Some(summary_path.display().to_string());
        }

        {
            let job = handle.lock();
            write_metadata_json(&output_dir, &job, &metadata)?;
        }

        if !keep_audio {
            let _ = std::fs::remove_dir_all(&work_dir);
        }

        handle.lock().finish_done(summary);
        info!("YOUTUBE_JOB_COMPLETED jobId={job_id} videoId={}", metadata.video_id);
        Ok(())
    }

    fn resolve_metadata(&self, video_url: &str, cancel: &CancelHandle) -> Result<VideoMetadata, PipelineError> {
        let timeout = self.download_timeout_sec.min(300);
        let args = vec![
            "--dump-single-json".to_string(),
            "--no-warnings".to_string(),
            "--no-playlist".to_string(),
            video_url.to_string(),
        ];
        let (stdout, _stderr) = ProcessRunner::run(
            &self.yt_dlp.path,
            &args,
            "INVALID_URL",
            "Unable to resolve YouTube video metadata.",
            timeout,
            cancel,
        )
        .map_err(|e| log_process_failure("YOUTUBE_METADATA_RESOLVE_FAILED", e))?;

        let parsed: Value = serde_json::from_str(&stdout)
            .map_err(|e| PipelineError::new("INVALID_URL", format!("yt-dlp metadata output was not valid JSON: {e}")))?;

        let video_id_raw = parsed.get("id").and_then(Value::as_str).unwrap_or("");
        let video_id = sanitize_folder_component(video_id_raw);
        if video_id.is_empty() {
            return Err(PipelineError::invalid_url("resolved video id is empty"));
        }

        let title = parsed.get("title").and_then(Value::as_str).unwrap_or("Untitled").to_string();
        let channel = parsed
            .get("uploader")
            .and_then(Value::as_str)
            .or_else(|| parsed.get("channel").and_then(Value::as_str))
            .unwrap_or("")
            .to_string();
        let duration_sec = parsed.get("duration").and_then(Value::as_f64).unwrap_or(0.0);

        Ok(VideoMetadata {
            video_id,
            title,
            channel,
            duration_sec,
        })
    }

    fn download_audio(&self, video_url: &str, work_dir: &PathBuf, cancel: &CancelHandle) -> Result<PathBuf, PipelineError> {
        let template = work_dir.join("source.%(ext)s");
        let args = vec![
            "-f".to_string(),
            "bestaudio".to_string(),
            "--no-playlist".to_string(),
            "-o".to_string(),
            template.display().to_string(),
            video_url.to_string(),
        ];
        ProcessRunner::run(
            &self.yt_dlp.path,
            &args,
            "YOUTUBE_DOWNLOAD_FAILED",
            "Failed to download audio.",
            self.download_timeout_sec,
            cancel,
        )
        .map_err(|e| log_process_failure("YOUTUBE_DOWNLOAD_FAILED", e))?;

        let mut candidates: Vec<PathBuf> = std::fs::read_dir(work_dir)
            .map_err(|e| PipelineError::new("YOUTUBE_DOWNLOAD_FAILED", e.to_string()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| {
                p.file_stem().and_then(|s| s.to_str()) == Some("source")
            })
            .collect();

        if candidates.is_empty() {
            return Err(PipelineError::new("YOUTUBE_DOWNLOAD_FAILED", "no downloaded source file found"));
        }

        candidates.sort_by_key(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok());
        Ok(candidates.pop().unwrap())
    }

    fn convert_audio(&self, source: &PathBuf, work_dir: &PathBuf, cancel: &CancelHandle) -> Result<PathBuf, PipelineError> {
        let output = work_dir.join("audio.wav");
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            source.display().to_string(),
            "-ar".to_string(),
            "16000".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            output.display().to_string(),
        ];
        ProcessRunner::run(
            &self.ffmpeg.path,
            &args,
            "AUDIO_CONVERT_FAILED",
            "Failed to convert audio.",
            self.convert_timeout_sec,
            cancel,
        )
        .map_err(|e| log_process_failure("AUDIO_CONVERT_FAILED", e))?;
        if !output.exists() {
            return Err(PipelineError::new("AUDIO_CONVERT_FAILED", "converted audio file was not produced"));
        }
        Ok(output)
    }

    fn extract_hooks(
        &self,
        client: &GenerationClient,
        transcript: &str,
        metadata: &VideoMetadata,
        draft_tone: DraftTone,
        max_input_chars: usize,
    ) -> Result<HooksPayload, PipelineError> {
        let excerpt = build_smart_excerpt(transcript, max_input_chars);
        let system_prompt = "You extract structured value hooks from a transcript. \
            Respond with raw JSON only — no markdown code fences, no commentary.";
        let user_prompt = hooks_user_prompt(&excerpt, metadata, draft_tone);

        let first_response = client.complete(system_prompt, &user_prompt, 0.2, 2000)?;
        let mut parsed = extract_json_object(&first_response).and_then(|v| normalize_hooks(&v, draft_tone).ok());

        if parsed.is_none() {
            let repair_prompt = format!(
                "The following is supposed to be JSON matching the hooks schema but may be malformed. \
                 Fix it and respond with corrected raw JSON only, no commentary:\n\n{first_response}"
            );
            let repaired = client.complete(system_prompt, &repair_prompt, 0.0, 2200)?;
            parsed = extract_json_object(&repaired).and_then(|v| normalize_hooks(&v, draft_tone).ok());
        }

        let mut payload = parsed.ok_or_else(|| PipelineError::hooks_extraction_failed("model output did not parse as valid hooks JSON"))?;

        if payload_is_placeholder(&payload) {
            if let Some(derived) = derive_hooks_from_transcript(transcript, draft_tone) {
                payload = derived;
            }
        }

        Ok(payload)
    }

    fn generate_drafts(
        &self,
        client: &GenerationClient,
        hooks: &HooksPayload,
        draft_tone: DraftTone,
        facts: &crate::facts::FactsSheet,
    ) -> Result<Drafts, PipelineError> {
        let grounding = build_grounding_context(hooks);
        let system_prompt = "You write social and newsletter drafts from a grounding context. \
            Respond with exactly three sections in order, each introduced by its own delimiter line: \
            ===LINKEDIN_CAROUSEL===, ===X_THREAD===, ===NEWSLETTER_SUMMARY===.";
        let user_prompt = drafts_user_prompt(&grounding, draft_tone);

        let first = client.complete(system_prompt, &user_prompt, 0.3, 3000)?;
        let mut sections = split_drafts(&first);

        if sections.is_none() {
            let repair_prompt = format!(
                "The following response was supposed to contain three delimited sections \
                 (===LINKEDIN_CAROUSEL===, ===X_THREAD===, ===NEWSLETTER_SUMMARY===) but the delimiters are \
                 missing or malformed. Reformat it with exactly those three delimiters, preserving content:\n\n{first}"
            );
            let repaired = client.complete(system_prompt, &repair_prompt, 0.1, 3200)?;
            sections = split_drafts(&repaired);
        }

        let (linkedin_raw, x_thread_raw, newsletter_raw) = match sections {
            Some(s) => s,
            None => {
                let linkedin = client.complete(system_prompt, &format!("Write only the LinkedIn carousel section.\n\n{grounding}"), 0.25, 1200)?;
                let x_thread = client.complete(system_prompt, &format!("Write only the X thread section.\n\n{grounding}"), 0.25, 1200)?;
                let newsletter = client.complete(system_prompt, &format!("Write only the newsletter summary section.\n\n{grounding}"), 0.25, 1200)?;
                (linkedin, x_thread, newsletter)
            }
        };

        let linkedin = match normalize_linkedin(&linkedin_raw) {
            Some(ok) => ok,
            None => {
                let repaired = client.complete(system_prompt, &format!("Rewrite as 5-8 slides, each starting with 'Slide N:'.\n\n{linkedin_raw}"), 0.25, 1200)?;
                normalize_linkedin(&repaired)
                    .unwrap_or_else(|| linkedin_fallback_template(&hooks.hooks, &facts.topic))
            }
        };

        let x_thread = match normalize_x_thread(&x_thread_raw) {
            Some(ok) => ok,
            None => {
                let repaired = client.complete(system_prompt, &format!("Rewrite as exactly 5 posts, each starting with '[N/5] ' and at most 280 characters.\n\n{x_thread_raw}"), 0.25, 1200)?;
                match normalize_x_thread(&repaired) {
                    Some(ok) => ok,
                    None => {
                        let bodies = extract_x_thread_post_bodies(&repaired);
                        if bodies.len() == 5 {
                            let numbered = number_x_thread_posts(&bodies);
                            let truncated = truncate_x_thread_posts(&numbered);
                            truncated.join("\n")
                        } else {
                            return Err(PipelineError::drafts_generation_failed(
                                "X thread could not be normalized to exactly 5 posts within the size limit",
                            ));
                        }
                    }
                }
            }
        };

        let newsletter = if is_newsletter_usable(&newsletter_raw) {
            newsletter_raw
        } else {
            let repaired = client.complete(system_prompt, &format!("Rewrite as markdown with at least one '## ' heading and at least one bullet list, at least 320 characters, with no '===' markers.\n\n{newsletter_raw}"), 0.25, 1200)?;
            if is_newsletter_usable(&repaired) {
                repaired
            } else {
                newsletter_fallback_template(&hooks.hooks, facts)
            }
        };

        Ok(Drafts {
            linkedin,
            x_thread,
            newsletter,
        })
    }
}

struct Drafts {
    linkedin: String,
    x_thread: String,
    newsletter: String,
}

struct VideoMetadata {
    video_id: String,
    title: String,
    channel: String,
    duration_sec: f64,
}

fn log_stage_changed(job_id: &str, stage: Stage, progress: f64) {
    info!("YOUTUBE_JOB_STAGE_CHANGED jobId={job_id} stage={stage:?} progress={progress:.2}");
}

/// Log a process-launch failure at `warn` if it was caused by cancellation,
/// `error` otherwise, and pass the error through unchanged.
fn log_process_failure(context: &str, e: PipelineError) -> PipelineError {
    if e.is_cancelled() {
        warn!("{context} code={} message={}", e.code, e.message);
    } else {
        error!("{context} code={} message={}", e.code, e.message);
    }
    e
}

fn validate_video_url(url: &str) -> Result<(), PipelineError> {
    let trimmed = url.trim();
    let scheme_end = trimmed
        .find("://")
        .filter(|_| trimmed.starts_with("http://") || trimmed.starts_with("https://"))
        .ok_or_else(|| PipelineError::invalid_url("URL must start with http:// or https://"))?;
    let rest = &trimmed[scheme_end + 3..];
    let host = rest.split('/').next().unwrap_or("").to_ascii_lowercase();
    let host = host.split('@').next_back().unwrap_or(&host);
    let host = host.split(':').next().unwrap_or(host);
    let host = host.strip_prefix("www.").unwrap_or(host);
    if host == "youtube.com" || host.ends_with(".youtube.com") || host == "youtu.be" {
        Ok(())
    } else {
        Err(PipelineError::invalid_url(format!("unsupported host: {host}")))
    }
}

fn write_text_file(path: &std::path::Path, content: &str, trailing_newline_if_nonempty: bool) -> Result<(), PipelineError> {
    let mut body = content.to_string();
    if trailing_newline_if_nonempty && !body.is_empty() && !body.ends_with('\n') {
        body.push('\n');
    }
    std::fs::write(path, body).map_err(|e| PipelineError::io_write_failed(e.to_string()))
}

fn write_json_file<T: serde::Serialize>(path: &std::path::Path, value: &T) -> Result<(), PipelineError> {
    let body = serde_json::to_string_pretty(value).map_err(|e| PipelineError::io_write_failed(e.to_string()))?;
    std::fs::write(path, body).map_err(|e| PipelineError::io_write_failed(e.to_string()))
}

fn write_metadata_json(output_dir: &std::path::Path, job: &Job, metadata: &VideoMetadata) -> Result<(), PipelineError> {
    let value = json!({
        "url": job.inputs.video_url,
        "videoId": metadata.video_id,
        "title": metadata.title,
        "channel": metadata.channel,
        "durationSec": metadata.duration_sec,
        "createdAtUtc": job.created_at_utc,
        "updatedAtUtc": voicebackend_common::utc_now_rfc3339(),
        "asrProvider": job.inputs.asr_engine,
        "asrModel": job.inputs.asr_model,
        "keepAudio": job.inputs.keep_audio,
        "outputDir": output_dir.display().to_string(),
        "transcriptPath": job.artifacts.transcript_path,
        "summaryPath": job.artifacts.summary_path,
        "hooksPath": job.artifacts.hooks_path,
        "factsSheetPath": job.artifacts.facts_sheet_path,
        "linkedinCarouselPath": job.artifacts.linkedin_carousel_path,
        "xThreadPath": job.artifacts.x_thread_path,
        "newsletterSummaryPath": job.artifacts.newsletter_summary_path,
    });
    write_json_file(&output_dir.join("metadata.json"), &value)
}

/// Build the "smart excerpt": whole transcript if it already fits, else
/// head+middle+tail slices separated by `"\n[...]\n"`.
fn build_smart_excerpt(transcript: &str, max_input_chars: usize) -> String {
    let max_input_chars = max_input_chars.max(2000);
    if transcript.chars().count() <= max_input_chars {
        return transcript.to_string();
    }

    let separator = "\n[...]\n";
    let sep_len = separator.chars().count() * 2;
    if max_input_chars <= sep_len {
        return transcript.chars().take(max_input_chars).collect();
    }

    let slice_len = 2000.min((max_input_chars - sep_len) / 3);
    let chars: Vec<char> = transcript.chars().collect();
    let total = chars.len();
    let mid = total / 2;
    let half_slice = slice_len / 2;

    let head: String = chars.iter().take(slice_len).collect();
    let mid_start = mid.saturating_sub(half_slice);
    let mid_end = (mid_start + slice_len).min(total);
    let middle: String = chars[mid_start..mid_end].iter().collect();
    let tail_start = total.saturating_sub(slice_len);
    let tail: String = chars[tail_start..].iter().collect();

    format!("{head}{separator}{middle}{separator}{tail}")
}

fn hooks_user_prompt(excerpt: &str, metadata: &VideoMetadata, draft_tone: DraftTone) -> String {
    format!(
        "Target JSON schema:\n\
         {{ \"hasTimestamps\": false, \"hooks\": [ {{ \"rank\": 1, \"hook\": string, \"who\": string, \
         \"outcome\": string, \"proof\": string, \"supporting_moments\": [ {{ \"quote\": string }} ] }} ] }}\n\n\
         Title: {}\nChannel: {}\nDuration (seconds): {}\nDraft tone: {}\n\nTranscript excerpt:\n{}",
        metadata.title,
        metadata.channel,
        metadata.duration_sec,
        draft_tone.as_str(),
        excerpt
    )
}

fn drafts_user_prompt(grounding: &str, draft_tone: DraftTone) -> String {
    format!(
        "Draft tone: {}\n\nGrounding context:\n{}",
        draft_tone.as_str(),
        grounding
    )
}

/// The hooks JSON plus up to nine deduplicated (case-insensitive) quote
/// cues from `supporting_moments`, preserving first occurrence.
fn build_grounding_context(hooks: &HooksPayload) -> String {
    let hooks_json = serde_json::to_string_pretty(hooks).unwrap_or_default();
    let mut seen = std::collections::HashSet::new();
    let mut quotes = Vec::new();
    for hook in &hooks.hooks {
        for moment in &hook.supporting_moments {
            let key = moment.quote.to_ascii_lowercase();
            if seen.insert(key) {
                quotes.push(moment.quote.clone());
            }
            if quotes.len() >= 9 {
                break;
            }
        }
        if quotes.len() >= 9 {
            break;
        }
    }
    format!("Hooks:\n{hooks_json}\n\nQuote cues:\n{}", quotes.join("\n"))
}

const HOOK_KEYWORDS: &[&str] = &[
    "because", "result", "learned", "important", "key", "mistake", "works", "realized", "discovered", "tip",
];

/// Deterministic hook derivation from the transcript: select up to six
/// sentences of at least 45 characters by keyword ranking, then populate
/// three templates. Returns `None` if the transcript is too sparse.
fn derive_hooks_from_transcript(transcript: &str, draft_tone: DraftTone) -> Option<HooksPayload> {
    let mut sentences: Vec<&str> = transcript
        .split(|c| c == '.' || c == '!' || c == '?')
        .map(str::trim)
        .filter(|s| s.chars().count() >= 45)
        .collect();

    if sentences.is_empty() {
        return None;
    }

    sentences.sort_by_key(|s| {
        let lower = s.to_ascii_lowercase();
        std::cmp::Reverse(HOOK_KEYWORDS.iter().filter(|k| lower.contains(*k)).count())
    });
    sentences.truncate(6);
    if sentences.is_empty() {
        return None;
    }

    let templates = ["Here's what stands out: {s}", "A key takeaway: {s}", "Worth remembering: {s}"];
    let mut hooks = Vec::new();
    for (i, sentence) in sentences.iter().take(3).enumerate() {
        let template = templates[i % templates.len()];
        let hook_text = template.replace("{s}", sentence);
        hooks.push(Hook {
            rank: (i + 1) as u8,
            hook: hook_text,
            who: "the audience".to_string(),
            outcome: sentence.to_string(),
            proof: sentence.to_string(),
            supporting_moments: vec![
                crate::validator::SupportingMoment {
                    quote: sentence.to_string(),
                    start_sec: None,
                    end_sec: None,
                },
                crate::validator::SupportingMoment {
                    quote: "No supporting quote provided.".to_string(),
                    start_sec: None,
                    end_sec: None,
                },
            ],
        });
    }

    if hooks.is_empty() {
        return None;
    }

    Some(HooksPayload {
        has_timestamps: false,
        generated_at_utc: voicebackend_common::utc_now_rfc3339(),
        draft_tone: draft_tone.as_str().to_string(),
        hooks,
    })
}

/// `"<title> highlights <outcome1>; <outcome2>; <outcome3>."`, truncated to
/// 800 bytes with a trailing `...`, or a fallback sentence if no outcomes.
fn build_summary(title: &str, hooks: &[Hook]) -> String {
    let outcomes: Vec<&str> = hooks.iter().map(|h| h.outcome.as_str()).filter(|s| !s.is_empty()).collect();
    let summary = if outcomes.is_empty() {
        format!("{title} highlights several practical takeaways.")
    } else {
        format!("{title} highlights {}.", outcomes.join("; "))
    };
    if summary.len() <= 800 {
        summary
    } else {
        let mut truncated: String = summary.chars().take(797).collect();
        truncated.push_str("...");
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_youtube_hosts() {
        assert!(validate_video_url("https://www.youtube.com/watch?v=AAAAAAAAAAA").is_ok());
        assert!(validate_video_url("https://youtu.be/AAAAAAAAAAA").is_ok());
        assert!(validate_video_url("https://example.com/video").is_err());
        assert!(validate_video_url("ftp://youtube.com/x").is_err());
    }

    #[test]
    fn smart_excerpt_returns_whole_transcript_when_short() {
        let transcript = "short transcript";
        assert_eq!(build_smart_excerpt(transcript, 2000), transcript);
    }

    #[test]
    fn smart_excerpt_splits_long_transcript_into_three_parts() {
        let transcript = "a".repeat(10_000);
        let excerpt = build_smart_excerpt(&transcript, 3000);
        assert_eq!(excerpt.matches("[...]").count(), 2);
    }

    #[test]
    fn summary_truncates_to_800_bytes() {
        let hooks = vec![Hook {
            rank: 1,
            hook: "x".to_string(),
            who: "x".to_string(),
            outcome: "x".repeat(900),
            proof: "x".to_string(),
            supporting_moments: vec![],
        }];
        let summary = build_summary("Title", &hooks);
        assert!(summary.len() <= 800);
        assert!(summary.ends_with("..."));
    }
}
