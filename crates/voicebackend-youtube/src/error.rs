//! Typed pipeline failures. Every stage failure carries a stable wire code,
//! a human message, and a JSON bag of caller-relevant details, expressed as
//! an explicit sum type instead of ad hoc error strings.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct PipelineError {
    pub code: &'static str,
    pub message: String,
    pub subcode: Option<&'static str>,
    pub details: Value,
}

impl PipelineError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            subcode: None,
            details: Value::Null,
        }
    }

    pub fn with_subcode(mut self, subcode: &'static str) -> Self {
        self.subcode = Some(subcode);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::new("INVALID_URL", message)
    }

    pub fn dependency_missing(message: impl Into<String>) -> Self {
        Self::new("DEPENDENCY_MISSING", message)
    }

    pub fn asr_model_unavailable(message: impl Into<String>) -> Self {
        Self::new("ASR_MODEL_UNAVAILABLE", message)
    }

    pub fn asr_transcribe_failed(message: impl Into<String>) -> Self {
        Self::new("ASR_TRANSCRIBE_FAILED", message)
    }

    pub fn io_write_failed(message: impl Into<String>) -> Self {
        Self::new("IO_WRITE_FAILED", message)
    }

    pub fn job_cancelled() -> Self {
        Self::new("JOB_CANCELLED", "Job was cancelled.")
    }

    pub fn llm_request_failed(message: impl Into<String>) -> Self {
        Self::new("LLM_REQUEST_FAILED", message)
    }

    pub fn hooks_extraction_failed(message: impl Into<String>) -> Self {
        Self::new("HOOKS_EXTRACTION_FAILED", message).with_subcode("HOOKS_JSON_INVALID")
    }

    pub fn drafts_generation_failed(message: impl Into<String>) -> Self {
        Self::new("DRAFTS_GENERATION_FAILED", message).with_subcode("DRAFTS_VALIDATION_FAILED")
    }

    /// A `{code, message, details}` object matching the wire shape used in
    /// `JobView.error` and in HTTP error bodies.
    pub fn to_wire(&self) -> Value {
        let mut details = self.details.clone();
        if let Some(subcode) = self.subcode {
            if let Value::Object(ref mut map) = details {
                map.insert("subcode".to_string(), json!(subcode));
            } else {
                details = json!({ "subcode": subcode });
            }
        }
        json!({
            "code": self.code,
            "message": self.message,
            "details": details,
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == "JOB_CANCELLED"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessFailureDetails {
    #[serde(rename = "exitCode")]
    pub exit_code: Option<i32>,
    pub command: Vec<String>,
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "outputTruncated")]
    pub output_truncated: bool,
    #[serde(rename = "timeoutSec", skip_serializing_if = "Option::is_none")]
    pub timeout_sec: Option<u64>,
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_includes_subcode_in_details() {
        let err = PipelineError::hooks_extraction_failed("bad json");
        let wire = err.to_wire();
        assert_eq!(wire["code"], "HOOKS_EXTRACTION_FAILED");
        assert_eq!(wire["details"]["subcode"], "HOOKS_JSON_INVALID");
    }

    #[test]
    fn cancelled_is_recognized() {
        assert!(PipelineError::job_cancelled().is_cancelled());
        assert!(!PipelineError::invalid_url("x").is_cancelled());
    }
}
