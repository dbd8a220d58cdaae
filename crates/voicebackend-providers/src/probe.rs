//! Two-phase readiness probing (`FileProbe` + `InitProbe`) and manifest
//! verification, shared by every STT/TTS provider: cheap on-disk checks run
//! first, an expensive warm-up runs at most once and is memoized.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::Path;
use voicebackend_common::utc_now_rfc3339;

/// Extensions never allowed regardless of bundle, unless explicitly
/// unlocked via `ST_VOICE_ALLOW_UNSAFE_ARTIFACTS`.
const BLOCKED_ARTIFACT_EXTENSIONS: &[&str] = &[".pt", ".pth"];

#[derive(Debug, Clone, Default)]
pub struct FileProbeResult {
    pub installed: bool,
    pub missing: Vec<String>,
    pub last_error: String,
}

impl FileProbeResult {
    pub fn ok() -> Self {
        Self {
            installed: true,
            missing: Vec::new(),
            last_error: String::new(),
        }
    }

    pub fn unsupported(engine: &str) -> Self {
        Self {
            installed: false,
            missing: vec![format!("engine:{engine}")],
            last_error: format!("{engine}_engine_unsupported"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InitProbeResult {
    pub ready: bool,
    pub startup_ms: i64,
    pub last_error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    pub ready: bool,
    pub engine: String,
    #[serde(rename = "engineVersion")]
    pub engine_version: String,
    #[serde(rename = "modelId")]
    pub model_id: String,
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    #[serde(rename = "timestampUtc")]
    pub timestamp_utc: String,
    pub details: EngineStatusDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatusDetails {
    pub installed: bool,
    pub missing: Vec<String>,
    #[serde(rename = "lastError")]
    pub last_error: String,
    #[serde(rename = "startupMs")]
    pub startup_ms: i64,
}

fn unsafe_artifacts_allowed() -> bool {
    voicebackend_common::bool_env("ST_VOICE_ALLOW_UNSAFE_ARTIFACTS", false)
}

/// Whether `rel` is a safe relative path: no absolute prefix, no `..`
/// segment after normalizing separators.
pub fn is_path_safe_relative(rel: &str) -> bool {
    if rel.is_empty() || rel.starts_with('/') || rel.starts_with('\\') {
        return false;
    }
    let normalized = rel.replace('\\', "/");
    !normalized.split('/').any(|segment| segment == "..")
}

pub fn hash_file_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    path: Option<String>,
    file: Option<String>,
    sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    files: Vec<ManifestFile>,
}

/// Verify a provider's on-disk model bundle against its `manifest.json`.
///
/// For each declared entry: reject unsafe or disallowed paths outright,
/// then check presence and (if a digest was declared) integrity.
pub fn verify_manifest_bundle(
    bundle_dir: &Path,
    allowed_extensions: &HashSet<&str>,
    bundle_name: &str,
) -> FileProbeResult {
    let manifest_path = bundle_dir.join("manifest.json");
    if !manifest_path.exists() {
        return FileProbeResult {
            installed: false,
            missing: vec![format!("{bundle_name}/manifest.json")],
            last_error: "manifest_missing".to_string(),
        };
    }

    let raw = match fs::read_to_string(&manifest_path) {
        Ok(r) => r,
        Err(e) => {
            return FileProbeResult {
                installed: false,
                missing: vec![format!("{bundle_name}/manifest.json")],
                last_error: format!("manifest_read_error:{e}"),
            };
        }
    };
    let manifest: Manifest = match serde_json::from_str(&raw) {
        Ok(m) => m,
        Err(e) => {
            return FileProbeResult {
                installed: false,
                missing: vec![format!("{bundle_name}/manifest.json")],
                last_error: format!("manifest_parse_error:{e}"),
            };
        }
    };

    if manifest.files.is_empty() {
        return FileProbeResult {
            installed: false,
            missing: vec![format!("{bundle_name}/manifest.json:files")],
            last_error: "manifest_files_missing".to_string(),
        };
    }

    let allow_unsafe = unsafe_artifacts_allowed();
    let mut missing = Vec::new();

    for entry in &manifest.files {
        let rel = entry
            .path
            .clone()
            .or_else(|| entry.file.clone())
            .unwrap_or_default();
        let rel = rel.trim().to_string();
        if rel.is_empty() {
            continue;
        }

        if !is_path_safe_relative(&rel) {
            return FileProbeResult {
                installed: false,
                missing: Vec::new(),
                last_error: format!("manifest_path_invalid:{rel}"),
            };
        }

        let ext = Path::new(&rel)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        if BLOCKED_ARTIFACT_EXTENSIONS.contains(&ext.as_str()) && !allow_unsafe {
            return FileProbeResult {
                installed: false,
                missing: Vec::new(),
                last_error: format!("artifact_blocked:{rel}"),
            };
        }
        if !ext.is_empty() && !allowed_extensions.contains(ext.as_str()) {
            return FileProbeResult {
                installed: false,
                missing: Vec::new(),
                last_error: format!("artifact_extension_not_allowed:{rel}"),
            };
        }

        let full_path = bundle_dir.join(&rel);
        if !full_path.exists() {
            missing.push(format!("{bundle_name}/{rel}"));
            continue;
        }

        if let Some(expected) = entry.sha256.as_ref().filter(|s| !s.is_empty()) {
            let expected = expected.to_lowercase();
            match hash_file_sha256(&full_path) {
                Ok(actual) if actual == expected => {}
                Ok(_) => {
                    return FileProbeResult {
                        installed: false,
                        missing: Vec::new(),
                        last_error: format!("hash_mismatch:{rel}"),
                    };
                }
                Err(e) => {
                    return FileProbeResult {
                        installed: false,
                        missing: Vec::new(),
                        last_error: format!("hash_read_failed:{rel}:{e}"),
                    };
                }
            }
        }
    }

    FileProbeResult {
        installed: missing.is_empty(),
        missing,
        last_error: String::new(),
    }
}

/// Shared init-probe memoization state, embedded by every concrete provider.
pub struct ProbeState {
    cache: parking_lot::Mutex<Option<InitProbeResult>>,
}

impl Default for ProbeState {
    fn default() -> Self {
        Self {
            cache: parking_lot::Mutex::new(None),
        }
    }
}

impl ProbeState {
    pub fn cached(&self) -> Option<InitProbeResult> {
        self.cache.lock().clone()
    }

    /// Run `init_probe` semantics: return the cached result unless `force` is
    /// set or nothing has run yet, in which case run `file_probe` first and
    /// only attempt the warm-up (`run_init_probe`) if that passed.
    pub fn init_probe(
        &self,
        force: bool,
        requires_init_probe: bool,
        file_probe: impl FnOnce() -> FileProbeResult,
        run_init_probe: impl FnOnce() -> InitProbeResult,
    ) -> InitProbeResult {
        let mut guard = self.cache.lock();
        if let Some(cached) = guard.as_ref() {
            if !force {
                return cached.clone();
            }
        }

        let probe = file_probe();
        if !probe.installed {
            let result = InitProbeResult {
                ready: false,
                startup_ms: 0,
                last_error: if probe.last_error.is_empty() {
                    "file_probe_failed".to_string()
                } else {
                    probe.last_error
                },
            };
            *guard = Some(result.clone());
            return result;
        }

        if !requires_init_probe {
            let result = InitProbeResult {
                ready: true,
                startup_ms: 0,
                last_error: String::new(),
            };
            *guard = Some(result.clone());
            return result;
        }

        let started = std::time::Instant::now();
        let mut result = run_init_probe();
        let elapsed_ms = started.elapsed().as_millis() as i64;
        if result.startup_ms <= 0 {
            result.startup_ms = elapsed_ms;
        }
        *guard = Some(result.clone());
        result
    }
}

/// Build an `EngineStatus` health fragment from a file probe and a cached (or
/// freshly-run) init probe.
pub fn build_engine_status(
    instance_id: &str,
    engine: &str,
    engine_version: &str,
    model_id: &str,
    requires_init_probe: bool,
    file_probe: FileProbeResult,
    init_probe: Option<InitProbeResult>,
) -> EngineStatus {
    let mut ready = file_probe.installed;
    let mut last_error = file_probe.last_error.clone();
    let startup_ms = init_probe.as_ref().map(|p| p.startup_ms).unwrap_or(0);

    if requires_init_probe {
        match init_probe {
            None => {
                ready = false;
                if last_error.is_empty() {
                    last_error = "init_probe_not_run".to_string();
                }
            }
            Some(probe) => {
                ready = ready && probe.ready;
                if !probe.last_error.is_empty() {
                    last_error = probe.last_error;
                }
            }
        }
    }

    EngineStatus {
        schema_version: 1,
        ready,
        engine: engine.to_string(),
        engine_version: engine_version.to_string(),
        model_id: model_id.to_string(),
        instance_id: instance_id.to_string(),
        timestamp_utc: utc_now_rfc3339(),
        details: EngineStatusDetails {
            installed: file_probe.installed,
            missing: file_probe.missing,
            last_error,
            startup_ms,
        },
    }
}

pub use voicebackend_common::log_capture_max_chars;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn manifest_missing_is_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let allowed: HashSet<&str> = [".onnx"].into_iter().collect();
        let result = verify_manifest_bundle(dir.path(), &allowed, "bundle");
        assert!(!result.installed);
        assert_eq!(result.last_error, "manifest_missing");
    }

    #[test]
    fn manifest_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("manifest.json"),
            r#"{"files":[{"path":"../evil.onnx","sha256":""}]}"#,
        )
        .unwrap();
        let allowed: HashSet<&str> = [".onnx"].into_iter().collect();
        let result = verify_manifest_bundle(dir.path(), &allowed, "bundle");
        assert!(!result.installed);
        assert!(result.last_error.starts_with("manifest_path_invalid"));
    }

    #[test]
    fn manifest_reports_missing_files_without_hash() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("manifest.json"),
            r#"{"files":[{"path":"model.onnx"}]}"#,
        )
        .unwrap();
        let allowed: HashSet<&str> = [".onnx"].into_iter().collect();
        let result = verify_manifest_bundle(dir.path(), &allowed, "bundle");
        assert!(!result.installed);
        assert_eq!(result.missing, vec!["bundle/model.onnx".to_string()]);
    }

    #[test]
    fn manifest_verifies_hash_and_passes_when_matching() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("model.onnx"), b"hello world").unwrap();
        let digest = hash_file_sha256(&dir.path().join("model.onnx")).unwrap();
        fs::write(
            dir.path().join("manifest.json"),
            format!(r#"{{"files":[{{"path":"model.onnx","sha256":"{digest}"}}]}}"#),
        )
        .unwrap();
        let allowed: HashSet<&str> = [".onnx"].into_iter().collect();
        let result = verify_manifest_bundle(dir.path(), &allowed, "bundle");
        assert!(result.installed);
    }

    #[test]
    fn manifest_detects_hash_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("model.onnx"), b"hello world").unwrap();
        fs::write(
            dir.path().join("manifest.json"),
            r#"{"files":[{"path":"model.onnx","sha256":"0000000000000000000000000000000000000000000000000000000000000000"}]}"#,
        )
        .unwrap();
        let allowed: HashSet<&str> = [".onnx"].into_iter().collect();
        let result = verify_manifest_bundle(dir.path(), &allowed, "bundle");
        assert!(!result.installed);
        assert!(result.last_error.starts_with("hash_mismatch"));
    }

    #[test]
    fn blocked_extension_requires_opt_in() {
        std::env::remove_var("ST_VOICE_ALLOW_UNSAFE_ARTIFACTS");
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("weights.pt"), b"x").unwrap();
        fs::write(
            dir.path().join("manifest.json"),
            r#"{"files":[{"path":"weights.pt","sha256":""}]}"#,
        )
        .unwrap();
        let allowed: HashSet<&str> = [".pt"].into_iter().collect();
        let result = verify_manifest_bundle(dir.path(), &allowed, "bundle");
        assert!(!result.installed);
        assert!(result.last_error.starts_with("artifact_blocked"));
    }

    #[test]
    fn init_probe_short_circuits_on_failed_file_probe() {
        let state = ProbeState::default();
        let result = state.init_probe(
            false,
            true,
            || FileProbeResult {
                installed: false,
                missing: vec!["x".into()],
                last_error: "missing_x".into(),
            },
            || panic!("run_init_probe should not be called"),
        );
        assert!(!result.ready);
        assert_eq!(result.last_error, "missing_x");
    }

    #[test]
    fn init_probe_memoizes_result() {
        let state = ProbeState::default();
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let run = || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            InitProbeResult {
                ready: true,
                startup_ms: 5,
                last_error: String::new(),
            }
        };
        let first = state.init_probe(false, true, FileProbeResult::ok, run);
        let second = state.init_probe(false, true, FileProbeResult::ok, || {
            panic!("should use cache")
        });
        assert!(first.ready && second.ready);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
