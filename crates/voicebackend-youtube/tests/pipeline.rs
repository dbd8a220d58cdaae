//! End-to-end job-pipeline tests driving `JobManager` against mock
//! `yt-dlp`/`ffmpeg` shell scripts and a tiny in-process mock of the
//! chat-completion endpoint, instead of real network/media tools.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use voicebackend_youtube::{AsrCallback, GenerationConfig, JobManager, Stage, StartJobRequest, Status};

/// `JobManager::new` reads `ST_YOUTUBE_*` env vars at construction time;
/// serialize every test that touches them so parallel test threads don't
/// stomp on each other's process-wide environment.
static ENV_LOCK: Mutex<()> = Mutex::new(());

struct FixedTranscriptAsr(String);

impl AsrCallback for FixedTranscriptAsr {
    fn transcribe(
        &self,
        _audio_wav: &[u8],
        _engine: &str,
        _model: &str,
        _language: &str,
        _request_id: &str,
    ) -> Result<String, String> {
        Ok(self.0.clone())
    }
}

fn write_executable_script(path: &Path, content: &str) {
    std::fs::write(path, content).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms).unwrap();
    }
}

/// A mock `yt-dlp`: answers `--version`, `--dump-single-json` with a fixed
/// metadata blob, and `-f bestaudio ...` by dropping a `source.<ext>` file
/// next to the `-o` template (after an optional sleep, to model a slow
/// download for cancel/timeout scenarios).
fn write_mock_ytdlp(path: &Path, download_sleep_secs: u64) {
    let script = format!(
        r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  exit 0
fi
if [ "$1" = "--dump-single-json" ]; then
  cat <<'JSON'
{{"id":"AAAAAAAAAAA","title":"Test Title","uploader":"Test Channel","duration":60}}
JSON
  exit 0
fi
if [ "$1" = "-f" ]; then
  sleep {download_sleep_secs}
  out=""
  prev=""
  for a in "$@"; do
    if [ "$prev" = "-o" ]; then out="$a"; fi
    prev="$a"
  done
  dir=$(dirname "$out")
  printf 'fake-audio-bytes' > "$dir/source.webm"
  exit 0
fi
exit 1
"#
    );
    write_executable_script(path, &script);
}

/// A mock `ffmpeg`: answers `--version` and otherwise copies a pre-built
/// WAV fixture to whatever output path it was asked to produce.
fn write_mock_ffmpeg(path: &Path, fixture_wav: &Path) {
    let script = format!(
        r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  exit 0
fi
if [ "$1" = "-y" ]; then
  last=""
  for a in "$@"; do last="$a"; done
  cp "{}" "$last"
  exit 0
fi
exit 1
"#,
        fixture_wav.display()
    );
    write_executable_script(path, &script);
}

fn write_wav_fixture(path: &Path) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..16_000 {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Read one minimal HTTP/1.1 request off `stream` (headers + body sized by
/// `Content-Length`) and reply with a chat-completion-shaped JSON body
/// whose `choices[0].message.content` is `content`.
fn respond_with_chat_completion(stream: &mut std::net::TcpStream, content: &str) {
    let mut buf = [0u8; 8192];
    let mut request = Vec::new();
    loop {
        let n = stream.read(&mut buf).unwrap_or(0);
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
        if let Some(header_end) = find_subslice(&request, b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&request[..header_end]);
            let content_length: usize = headers
                .lines()
                .find_map(|l| {
                    l.to_ascii_lowercase()
                        .strip_prefix("content-length:")
                        .map(|v| v.trim().to_string())
                })
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let body_so_far = request.len() - (header_end + 4);
            if body_so_far >= content_length {
                break;
            }
        }
    }

    let body = serde_json::json!({
        "choices": [{ "message": { "content": content } }]
    })
    .to_string();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

/// Spin up a background thread that answers exactly `responses.len()`
/// sequential connections, one response each, then stops accepting.
fn start_mock_generation_server(responses: Vec<String>) -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for (i, stream) in listener.incoming().enumerate() {
            if i >= responses.len() {
                break;
            }
            if let Ok(mut stream) = stream {
                respond_with_chat_completion(&mut stream, &responses[i]);
            }
        }
    });
    format!("http://{addr}")
}

fn hooks_response_json() -> String {
    serde_json::json!({
        "hasTimestamps": false,
        "hooks": [
            {
                "hook": "Do X first",
                "who": "beginners",
                "outcome": "faster setup",
                "proof": "demonstrated in the video",
                "supporting_moments": [{ "quote": "quote one" }, { "quote": "quote two" }]
            },
            {
                "hook": "Avoid the Y mistake",
                "who": "intermediate users",
                "outcome": "fewer errors",
                "proof": "shown via example",
                "supporting_moments": [{ "quote": "quote three" }, { "quote": "quote four" }]
            },
            {
                "hook": "Use the Z trick",
                "who": "advanced users",
                "outcome": "saves time",
                "proof": "demonstrated live",
                "supporting_moments": [{ "quote": "quote five" }, { "quote": "quote six" }]
            }
        ]
    })
    .to_string()
}

fn drafts_response_text() -> String {
    let newsletter_filler = "This issue recaps the practical points raised in the source video so you can skim it in under a minute. ".repeat(3);
    format!(
        "===LINKEDIN_CAROUSEL===\n\
         Slide 1: What this video gets right\n\
         Slide 2: Do X first\n\
         Slide 3: Why it matters: faster setup\n\
         Slide 4: Avoid the Y mistake\n\
         Slide 5: Use the Z trick\n\
         ===X_THREAD===\n\
         [1/5] Post one covers the setup tip.\n\
         [2/5] Post two covers the common mistake.\n\
         [3/5] Post three covers the advanced trick.\n\
         [4/5] Post four ties it back to the main outcome.\n\
         [5/5] Post five wraps up with a call to action.\n\
         ===NEWSLETTER_SUMMARY===\n\
         ## Overview\n\n\
         {newsletter_filler}\n\n\
         ### Key Takeaways\n\n\
         - Do X first for a faster setup\n\
         - Avoid the Y mistake to cut down on errors\n\
         - Use the Z trick to save time\n"
    )
}

fn wait_for_terminal(manager: &JobManager, job_id: &str, timeout: Duration) -> voicebackend_youtube::JobView {
    let deadline = Instant::now() + timeout;
    loop {
        let view = manager.get_job(job_id).expect("job should exist");
        if view.status != Status::Queued && view.status != Status::Running {
            return view;
        }
        if Instant::now() > deadline {
            panic!("job did not reach a terminal state in time, last view: {view:?}");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_url_is_rejected_synchronously() {
    let _guard = ENV_LOCK.lock().unwrap();
    let data_root = tempfile::tempdir().unwrap();
    let asr = Arc::new(FixedTranscriptAsr("unused".to_string()));
    let manager = Arc::new(JobManager::new(data_root.path().to_path_buf(), asr));

    let result = manager.start_job(StartJobRequest {
        video_url: "https://example.com/not-youtube".to_string(),
        language_hint: "en".to_string(),
        keep_audio: false,
        asr_engine: "test-engine".to_string(),
        asr_model: "test-model".to_string(),
        generation_config: GenerationConfig::default(),
        draft_tone: "professional".to_string(),
    });

    let err = result.expect_err("non-youtube URL must be rejected");
    assert_eq!(err.code, "INVALID_URL");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_while_queued_skips_execution() {
    let _guard = ENV_LOCK.lock().unwrap();
    std::env::set_var("ST_YOUTUBE_MAX_CONCURRENT_JOBS", "1");

    let data_root = tempfile::tempdir().unwrap();
    let scripts_dir = tempfile::tempdir().unwrap();
    let ytdlp_path = scripts_dir.path().join("yt-dlp-slow.sh");
    write_mock_ytdlp(&ytdlp_path, 3);
    let ffmpeg_path = scripts_dir.path().join("ffmpeg.sh");
    let fixture_wav = scripts_dir.path().join("fixture.wav");
    write_wav_fixture(&fixture_wav);
    write_mock_ffmpeg(&ffmpeg_path, &fixture_wav);

    std::env::set_var("ST_YOUTUBE_YTDLP_PATH", &ytdlp_path);
    std::env::set_var("ST_YOUTUBE_FFMPEG_PATH", &ffmpeg_path);

    let asr = Arc::new(FixedTranscriptAsr("hello world".to_string()));
    let manager = Arc::new(JobManager::new(data_root.path().to_path_buf(), asr));

    let job_a = manager
        .start_job(StartJobRequest {
            video_url: "https://www.youtube.com/watch?v=AAAAAAAAAAA".to_string(),
            language_hint: "en".to_string(),
            keep_audio: false,
            asr_engine: "test-engine".to_string(),
            asr_model: "test-model".to_string(),
            generation_config: GenerationConfig::default(),
            draft_tone: "professional".to_string(),
        })
        .unwrap();

    // Give job A's worker time to acquire the single concurrency slot
    // before job B is admitted behind it.
    std::thread::sleep(Duration::from_millis(300));

    let job_b = manager
        .start_job(StartJobRequest {
            video_url: "https://www.youtube.com/watch?v=BBBBBBBBBBB".to_string(),
            language_hint: "en".to_string(),
            keep_audio: false,
            asr_engine: "test-engine".to_string(),
            asr_model: "test-model".to_string(),
            generation_config: GenerationConfig::default(),
            draft_tone: "professional".to_string(),
        })
        .unwrap();

    let cancelled = manager.cancel_job(&job_b.job_id).expect("job B should exist");
    assert_eq!(cancelled.status, Status::Cancelled);

    let view = wait_for_terminal(&manager, &job_b.job_id, Duration::from_secs(5));
    assert_eq!(view.status, Status::Cancelled);
    let error = view.error.expect("cancelled job must carry an error payload");
    assert_eq!(error["code"], "JOB_CANCELLED");

    // Job A is unaffected by B's cancellation; it keeps running or finishes.
    let view_a = manager.get_job(&job_a.job_id).unwrap();
    assert_ne!(view_a.status, Status::Cancelled);

    std::env::remove_var("ST_YOUTUBE_YTDLP_PATH");
    std::env::remove_var("ST_YOUTUBE_FFMPEG_PATH");
    std::env::remove_var("ST_YOUTUBE_MAX_CONCURRENT_JOBS");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_mid_download_terminates_the_child() {
    let _guard = ENV_LOCK.lock().unwrap();
    std::env::set_var("ST_YOUTUBE_MAX_CONCURRENT_JOBS", "1");

    let data_root = tempfile::tempdir().unwrap();
    let scripts_dir = tempfile::tempdir().unwrap();
    let ytdlp_path = scripts_dir.path().join("yt-dlp-slow.sh");
    write_mock_ytdlp(&ytdlp_path, 10);
    let ffmpeg_path = scripts_dir.path().join("ffmpeg.sh");
    let fixture_wav = scripts_dir.path().join("fixture.wav");
    write_wav_fixture(&fixture_wav);
    write_mock_ffmpeg(&ffmpeg_path, &fixture_wav);

    std::env::set_var("ST_YOUTUBE_YTDLP_PATH", &ytdlp_path);
    std::env::set_var("ST_YOUTUBE_FFMPEG_PATH", &ffmpeg_path);

    let asr = Arc::new(FixedTranscriptAsr("hello world".to_string()));
    let manager = Arc::new(JobManager::new(data_root.path().to_path_buf(), asr));

    let job = manager
        .start_job(StartJobRequest {
            video_url: "https://youtu.be/CCCCCCCCCCC".to_string(),
            language_hint: "en".to_string(),
            keep_audio: false,
            asr_engine: "test-engine".to_string(),
            asr_model: "test-model".to_string(),
            generation_config: GenerationConfig::default(),
            draft_tone: "professional".to_string(),
        })
        .unwrap();

    // Let the job reach the (slow) download stage before cancelling.
    std::thread::sleep(Duration::from_millis(500));
    manager.cancel_job(&job.job_id);

    let view = wait_for_terminal(&manager, &job.job_id, Duration::from_secs(5));
    assert_eq!(view.status, Status::Cancelled);
    assert_eq!(view.error.unwrap()["code"], "JOB_CANCELLED");

    std::env::remove_var("ST_YOUTUBE_YTDLP_PATH");
    std::env::remove_var("ST_YOUTUBE_FFMPEG_PATH");
    std::env::remove_var("ST_YOUTUBE_MAX_CONCURRENT_JOBS");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn happy_path_produces_all_artifacts() {
    let _guard = ENV_LOCK.lock().unwrap();
    std::env::set_var("ST_YOUTUBE_MAX_CONCURRENT_JOBS", "1");

    let data_root = tempfile::tempdir().unwrap();
    let scripts_dir = tempfile::tempdir().unwrap();
    let ytdlp_path = scripts_dir.path().join("yt-dlp.sh");
    write_mock_ytdlp(&ytdlp_path, 0);
    let ffmpeg_path = scripts_dir.path().join("ffmpeg.sh");
    let fixture_wav = scripts_dir.path().join("fixture.wav");
    write_wav_fixture(&fixture_wav);
    write_mock_ffmpeg(&ffmpeg_path, &fixture_wav);

    std::env::set_var("ST_YOUTUBE_YTDLP_PATH", &ytdlp_path);
    std::env::set_var("ST_YOUTUBE_FFMPEG_PATH", &ffmpeg_path);

    let base_url = start_mock_generation_server(vec![hooks_response_json(), drafts_response_text()]);

    let asr = Arc::new(FixedTranscriptAsr(
        "This is a short transcript used to validate the end to end pipeline.".to_string(),
    ));
    let manager = Arc::new(JobManager::new(data_root.path().to_path_buf(), asr));

    let generation_config = GenerationConfig {
        base_url,
        model: "local-model".to_string(),
        temperature: 0.2,
        max_input_chars: 12_000,
        timeout_sec: 10,
    };

    let job = manager
        .start_job(StartJobRequest {
            video_url: "https://www.youtube.com/watch?v=AAAAAAAAAAA".to_string(),
            language_hint: "en".to_string(),
            keep_audio: false,
            asr_engine: "test-engine".to_string(),
            asr_model: "test-model".to_string(),
            generation_config,
            draft_tone: "professional".to_string(),
        })
        .unwrap();

    let view = wait_for_terminal(&manager, &job.job_id, Duration::from_secs(10));
    assert_eq!(view.status, Status::Done, "unexpected view: {view:?}");
    assert_eq!(view.stage, Stage::Done);
    assert_eq!(view.progress, 1.0);
    assert!(view.summary.as_deref().unwrap_or_default().starts_with("Test Title highlights"));

    let output_dir = Path::new(&view.artifacts.output_dir);
    let transcript = std::fs::read_to_string(output_dir.join("transcript.txt")).unwrap();
    assert!(transcript.contains("end to end pipeline"));

    let hooks: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(output_dir.join("hooks.json")).unwrap()).unwrap();
    let hooks_array = hooks["hooks"].as_array().unwrap();
    assert_eq!(hooks_array.len(), 3);
    assert_eq!(hooks_array[0]["rank"], 1);
    assert_eq!(hooks_array[2]["rank"], 3);
    assert_eq!(hooks["hasTimestamps"], false);

    assert!(output_dir.join("facts_sheet.json").exists());

    let linkedin = std::fs::read_to_string(output_dir.join("linkedin_carousel.md")).unwrap();
    assert!(linkedin.contains("Slide 1:"));
    assert!(linkedin.contains("Slide 5:"));

    let x_thread = std::fs::read_to_string(output_dir.join("x_thread.txt")).unwrap();
    let posts: Vec<&str> = x_thread.lines().filter(|l| !l.trim().is_empty()).collect();
    assert_eq!(posts.len(), 5);
    for (i, post) in posts.iter().enumerate() {
        assert!(post.starts_with(&format!("[{}/5] ", i + 1)));
        assert!(post.len() <= 280);
    }

    let newsletter = std::fs::read_to_string(output_dir.join("newsletter_summary.md")).unwrap();
    assert!(!newsletter.contains("==="));
    assert!(newsletter.lines().any(|l| l.trim_start().starts_with("## ")));
    assert!(newsletter.lines().any(|l| l.trim_start().starts_with("- ")));

    assert!(output_dir.join("metadata.json").exists());
    let work_dir = output_dir.join("work");
    assert!(!work_dir.exists(), "work dir should be cleaned up when keepAudio=false");

    std::env::remove_var("ST_YOUTUBE_YTDLP_PATH");
    std::env::remove_var("ST_YOUTUBE_FFMPEG_PATH");
    std::env::remove_var("ST_YOUTUBE_MAX_CONCURRENT_JOBS");
}
