//! The `Job` record and its public projection `JobView`: a job mutates only
//! through the orchestrator worker or `cancel_job`, and external observers
//! only ever see cloned snapshots.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use voicebackend_common::{monotonic_secs, utc_now_rfc3339};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Status {
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Failed | Status::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Stage {
    Resolving,
    DownloadingAudio,
    ConvertingAudio,
    Transcribing,
    WritingTranscript,
    ExtractingHooks,
    GeneratingDrafts,
    WritingAssets,
    Done,
    Failed,
    Cancelled,
}

impl Stage {
    /// The `(start, end)` progress anchors for this stage.
    pub fn progress_anchors(self) -> (f64, f64) {
        match self {
            Stage::Resolving => (0.05, 0.12),
            Stage::DownloadingAudio => (0.12, 0.20),
            Stage::ConvertingAudio => (0.20, 0.35),
            Stage::Transcribing => (0.35, 0.38),
            Stage::WritingTranscript => (0.38, 0.55),
            Stage::ExtractingHooks => (0.55, 0.80),
            Stage::GeneratingDrafts => (0.80, 0.92),
            Stage::WritingAssets => (0.92, 1.0),
            Stage::Done => (1.0, 1.0),
            Stage::Failed | Stage::Cancelled => (0.0, 0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftTone {
    Professional,
    Playful,
    Direct,
}

impl Default for DraftTone {
    fn default() -> Self {
        DraftTone::Professional
    }
}

impl DraftTone {
    pub fn as_str(self) -> &'static str {
        match self {
            DraftTone::Professional => "professional",
            DraftTone::Playful => "playful",
            DraftTone::Direct => "direct",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "playful" => DraftTone::Playful,
            "direct" => DraftTone::Direct,
            _ => DraftTone::Professional,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_input_chars: usize,
    pub timeout_sec: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:1234".to_string(),
            model: "local-model".to_string(),
            temperature: 0.2,
            max_input_chars: 12_000,
            timeout_sec: 120,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobInputs {
    pub video_url: String,
    pub language_hint: String,
    pub keep_audio: bool,
    pub asr_engine: String,
    pub asr_model: String,
    pub generation_config: GenerationConfig,
    pub draft_tone: DraftTone,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolvedArtifacts {
    #[serde(rename = "videoId")]
    pub video_id: String,
    pub title: String,
    pub channel: String,
    #[serde(rename = "durationSec")]
    pub duration_sec: f64,
    #[serde(rename = "outputDir")]
    pub output_dir: String,
    #[serde(rename = "transcriptPath", skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
    #[serde(rename = "summaryPath", skip_serializing_if = "Option::is_none")]
    pub summary_path: Option<String>,
    #[serde(rename = "hooksPath", skip_serializing_if = "Option::is_none")]
    pub hooks_path: Option<String>,
    #[serde(rename = "factsSheetPath", skip_serializing_if = "Option::is_none")]
    pub facts_sheet_path: Option<String>,
    #[serde(rename = "linkedinCarouselPath", skip_serializing_if = "Option::is_none")]
    pub linkedin_carousel_path: Option<String>,
    #[serde(rename = "xThreadPath", skip_serializing_if = "Option::is_none")]
    pub x_thread_path: Option<String>,
    #[serde(rename = "newsletterSummaryPath", skip_serializing_if = "Option::is_none")]
    pub newsletter_summary_path: Option<String>,
}

/// One-shot cancellation signal plus the currently-attached child process
/// handle, if any. A job has at most one attached child at a time; detach
/// is guaranteed on every exit path from [`crate::process_runner::ProcessRunner::run`].
#[derive(Default)]
pub struct CancelHandle {
    signalled: AtomicBool,
    child: parking_lot::Mutex<Option<Child>>,
}

impl CancelHandle {
    pub fn is_cancelled(&self) -> bool {
        self.signalled.load(Ordering::SeqCst)
    }

    pub fn signal(&self) {
        self.signalled.store(true, Ordering::SeqCst);
    }

    pub fn attach(&self, child: Child) {
        *self.child.lock() = Some(child);
    }

    pub fn detach(&self) {
        *self.child.lock() = None;
    }

    /// Poll the attached child without blocking; `Ok(None)` means still
    /// running (or nothing attached).
    pub fn try_wait_attached(&self) -> std::io::Result<Option<std::process::ExitStatus>> {
        let mut guard = self.child.lock();
        match guard.as_mut() {
            Some(child) => child.try_wait(),
            None => Ok(None),
        }
    }

    /// Terminate the attached child, if any: SIGTERM-equivalent first, hard
    /// kill if it's still alive after the grace period.
    pub fn kill_attached(&self, grace: std::time::Duration) {
        let mut guard = self.child.lock();
        if let Some(child) = guard.as_mut() {
            let _ = child.kill();
            let deadline = std::time::Instant::now() + grace;
            while std::time::Instant::now() < deadline {
                match child.try_wait() {
                    Ok(Some(_)) => break,
                    _ => std::thread::sleep(std::time::Duration::from_millis(50)),
                }
            }
            let _ = child.kill();
        }
        *guard = None;
    }
}

pub struct Job {
    pub job_id: String,
    pub inputs: JobInputs,
    pub status: Status,
    pub stage: Stage,
    pub progress: f64,
    pub created_at_utc: String,
    pub updated_at_utc: String,
    pub created_ts: f64,
    pub updated_ts: f64,
    pub artifacts: ResolvedArtifacts,
    pub summary: Option<String>,
    pub error: Option<PipelineError>,
    pub cancel: Arc<CancelHandle>,
}

impl Job {
    pub fn new(job_id: String, inputs: JobInputs) -> Self {
        let now_utc = utc_now_rfc3339();
        let now_ts = monotonic_secs();
        Self {
            job_id,
            inputs,
            status: Status::Queued,
            stage: Stage::Resolving,
            progress: 0.0,
            created_at_utc: now_utc.clone(),
            updated_at_utc: now_utc,
            created_ts: now_ts,
            updated_ts: now_ts,
            artifacts: ResolvedArtifacts::default(),
            summary: None,
            error: None,
            cancel: Arc::new(CancelHandle::default()),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at_utc = utc_now_rfc3339();
        self.updated_ts = monotonic_secs();
    }

    /// Advance to a new stage/progress, unless the job has already reached
    /// a terminal status (the cancel path may have beaten the worker to it).
    pub fn advance(&mut self, stage: Stage, progress: f64) {
        if self.status.is_terminal() {
            return;
        }
        self.status = Status::Running;
        self.stage = stage;
        self.progress = self.progress.max(progress);
        self.touch();
    }

    pub fn finish_done(&mut self, summary: String) {
        if self.status.is_terminal() {
            return;
        }
        self.status = Status::Done;
        self.stage = Stage::Done;
        self.progress = 1.0;
        self.summary = Some(summary);
        self.touch();
    }

    pub fn finish_failed(&mut self, error: PipelineError) {
        if self.status.is_terminal() {
            return;
        }
        if error.is_cancelled() {
            self.status = Status::Cancelled;
            self.stage = Stage::Cancelled;
        } else {
            self.status = Status::Failed;
            self.stage = Stage::Failed;
        }
        self.error = Some(error);
        self.touch();
    }

    pub fn to_view(&self) -> JobView {
        JobView {
            job_id: self.job_id.clone(),
            status: self.status,
            stage: self.stage,
            progress: self.progress,
            created_at_utc: self.created_at_utc.clone(),
            updated_at_utc: self.updated_at_utc.clone(),
            video_url: self.inputs.video_url.clone(),
            draft_tone: self.inputs.draft_tone,
            artifacts: self.artifacts.clone(),
            summary: self.summary.clone(),
            error: self.error.as_ref().map(PipelineError::to_wire),
        }
    }
}

/// Primitive-copy external projection of a [`Job`]: no live references back
/// into the store, so a caller can never observe a torn or mutating read.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    #[serde(rename = "jobId")]
    pub job_id: String,
    pub status: Status,
    pub stage: Stage,
    pub progress: f64,
    #[serde(rename = "createdAtUtc")]
    pub created_at_utc: String,
    #[serde(rename = "updatedAtUtc")]
    pub updated_at_utc: String,
    #[serde(rename = "videoUrl")]
    pub video_url: String,
    #[serde(rename = "draftTone")]
    pub draft_tone: DraftTone,
    #[serde(flatten)]
    pub artifacts: ResolvedArtifacts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

/// Generate a job id of the form `ytjob-<32 lowercase hex chars>` (128-bit
/// random).
pub fn generate_job_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("ytjob-{hex}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_has_expected_shape() {
        let id = generate_job_id();
        assert!(id.starts_with("ytjob-"));
        assert_eq!(id.len(), "ytjob-".len() + 32);
    }

    #[test]
    fn terminal_status_is_sticky() {
        let mut job = Job::new(generate_job_id(), test_inputs());
        job.finish_done("done".to_string());
        job.advance(Stage::Resolving, 0.5);
        assert_eq!(job.status, Status::Done);
        assert_eq!(job.progress, 1.0);
    }

    #[test]
    fn progress_never_decreases() {
        let mut job = Job::new(generate_job_id(), test_inputs());
        job.advance(Stage::ExtractingHooks, 0.7);
        job.advance(Stage::Transcribing, 0.1);
        assert_eq!(job.progress, 0.7);
    }

    fn test_inputs() -> JobInputs {
        JobInputs {
            video_url: "https://www.youtube.com/watch?v=AAAAAAAAAAA".to_string(),
            language_hint: "en".to_string(),
            keep_audio: false,
            asr_engine: "faster-whisper".to_string(),
            asr_model: "base".to_string(),
            generation_config: GenerationConfig::default(),
            draft_tone: DraftTone::Professional,
        }
    }
}
