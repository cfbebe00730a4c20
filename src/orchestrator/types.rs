//! Wire types for the remote collaborators
//!
//! Structs that mirror the execution bridge and the chat-completions JSON
//! formats, plus the normalized values handed to the job controller.

use serde::{Deserialize, Serialize};

/// Response of the bridge health probe
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HealthResponse {
    /// Whether the bridge considers itself ready
    #[serde(default)]
    pub ok: bool,
    /// Solver installation directory reported by the bridge
    #[serde(default, alias = "wm_project_dir")]
    pub project_dir: Option<String>,
}

/// Body of a job submission
#[derive(Debug, Clone, Serialize)]
pub struct SubmitJobRequest {
    /// English requirement text written for the solver agent
    pub requirement: String,
    /// Optional name for the case directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_name: Option<String>,
}

/// Raw submission response; the job id has several historical spellings
#[derive(Debug, Deserialize, Default)]
pub struct RawSubmitResponse {
    /// Job identifier (current spelling)
    #[serde(default)]
    pub job_id: Option<String>,
    /// Job identifier (camel case spelling)
    #[serde(default, rename = "jobId")]
    pub job_id_camel: Option<String>,
    /// Job identifier (bare spelling)
    #[serde(default)]
    pub id: Option<String>,
    /// Human readable note
    #[serde(default)]
    pub message: Option<String>,
    /// Direct result download reference
    #[serde(default)]
    pub zip_url: Option<String>,
}

impl RawSubmitResponse {
    /// First non-empty job id among the accepted spellings
    pub fn job_id(&self) -> Option<&str> {
        [&self.job_id, &self.job_id_camel, &self.id]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }
}

/// A job accepted by the bridge
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedJob {
    /// Job identifier
    pub job_id: String,
    /// Optional note from the bridge
    pub message: Option<String>,
    /// Where the result archive can be downloaded
    pub download_url: String,
}

/// Lifecycle state of a remote job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for a worker
    Queued,
    /// Being computed
    Running,
    /// Finished with a result archive
    Succeeded,
    /// Finished without a result
    Failed,
}

impl JobState {
    /// Parse a normalized status name
    pub fn from_status(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queued" => Some(JobState::Queued),
            "running" => Some(JobState::Running),
            "succeeded" => Some(JobState::Succeeded),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }

    /// Map the bridge's internal `state` vocabulary
    pub fn from_bridge_state(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "finished" => Some(JobState::Succeeded),
            other => Self::from_status(other),
        }
    }

    /// Lowercase name as used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    /// Whether the job can still change state
    pub fn is_pending(&self) -> bool {
        matches!(self, JobState::Queued | JobState::Running)
    }
}

/// Raw status response as returned by the bridge
#[derive(Debug, Deserialize, Default)]
pub struct RawStatusResponse {
    /// Normalized status, when the bridge provides one
    #[serde(default)]
    pub status: Option<String>,
    /// Internal state (`running`, `finished`, `failed`)
    #[serde(default)]
    pub state: Option<String>,
    /// Human readable note
    #[serde(default)]
    pub message: Option<String>,
    /// Error recorded by the bridge for failed jobs
    #[serde(default)]
    pub error: Option<String>,
    /// Completion fraction or percentage
    #[serde(default)]
    pub progress: Option<f64>,
    /// Direct result download reference
    #[serde(default, alias = "zip_url")]
    pub download_url: Option<String>,
}

/// Normalized job status
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    /// Current state
    pub status: JobState,
    /// Optional note or failure reason
    pub message: Option<String>,
    /// Optional progress value
    pub progress: Option<f64>,
    /// Result download reference, if the bridge supplied one
    pub download_url: Option<String>,
}

impl From<RawStatusResponse> for JobStatus {
    fn from(raw: RawStatusResponse) -> Self {
        let status = raw
            .status
            .as_deref()
            .and_then(JobState::from_status)
            .or_else(|| raw.state.as_deref().and_then(JobState::from_bridge_state))
            .unwrap_or(JobState::Running);
        let message = raw
            .message
            .or(raw.error)
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        Self {
            status,
            message,
            progress: raw.progress,
            download_url: raw.download_url.filter(|u| !u.trim().is_empty()),
        }
    }
}

/// A downloaded result archive
#[derive(Debug, Clone)]
pub struct DownloadedArchive {
    /// Suggested file name
    pub filename: String,
    /// Archive bytes
    pub bytes: Vec<u8>,
}

/// One field-level problem in a validation error body
#[derive(Debug, Deserialize)]
pub struct FieldProblem {
    /// Location of the offending field, e.g. `["body", "requirement"]`
    #[serde(default)]
    pub loc: Vec<serde_json::Value>,
    /// Problem description
    #[serde(default)]
    pub msg: Option<String>,
    /// Machine readable problem type
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Request body for an OpenAI-compatible chat completion
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    /// Upstream model name
    pub model: String,
    /// Conversation sent to the model
    pub messages: Vec<ChatMessage>,
    /// Always false: the whole answer is awaited
    pub stream: bool,
    /// Sampling temperature
    pub temperature: f32,
}

/// One chat message
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user` or `assistant`
    pub role: String,
    /// Message text
    #[serde(default)]
    pub content: Option<String>,
    /// Reasoning trace of reasoning models
    #[serde(default, skip_serializing)]
    pub reasoning_content: Option<String>,
}

/// Chat completion response
#[derive(Debug, Deserialize, Default)]
pub struct ChatCompletionResponse {
    /// Candidate answers
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    /// Plain output used by some compatible servers
    #[serde(default)]
    pub output: Option<String>,
}

/// A single candidate answer
#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    /// The answer message
    pub message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_spellings() {
        let raw: RawSubmitResponse = serde_json::from_str(r#"{"jobId": "abc"}"#).unwrap();
        assert_eq!(raw.job_id(), Some("abc"));
        let raw: RawSubmitResponse =
            serde_json::from_str(r#"{"job_id": "  ", "id": "xyz"}"#).unwrap();
        assert_eq!(raw.job_id(), Some("xyz"));
        let raw: RawSubmitResponse = serde_json::from_str(r#"{"message": "queued"}"#).unwrap();
        assert_eq!(raw.job_id(), None);
    }

    #[test]
    fn test_status_normalization() {
        let s: JobStatus = serde_json::from_str::<RawStatusResponse>(
            r#"{"state": "finished", "returncode": 0, "zip": "/srv/out.zip"}"#,
        )
        .unwrap()
        .into();
        assert_eq!(s.status, JobState::Succeeded);

        let s: JobStatus = serde_json::from_str::<RawStatusResponse>(
            r#"{"status": "failed", "state": "running", "error": "solver diverged"}"#,
        )
        .unwrap()
        .into();
        assert_eq!(s.status, JobState::Failed);
        assert_eq!(s.message.as_deref(), Some("solver diverged"));

        let s: JobStatus = serde_json::from_str::<RawStatusResponse>(r#"{"state": "weird"}"#)
            .unwrap()
            .into();
        assert_eq!(s.status, JobState::Running);
    }

    #[test]
    fn test_health_accepts_bridge_field_name() {
        let h: HealthResponse =
            serde_json::from_str(r#"{"ok": true, "wm_project_dir": "/opt/openfoam10"}"#).unwrap();
        assert!(h.ok);
        assert_eq!(h.project_dir.as_deref(), Some("/opt/openfoam10"));
    }

    #[test]
    fn test_submit_request_omits_missing_case_name() {
        let body = serde_json::to_value(SubmitJobRequest {
            requirement: "flow over a cylinder".to_string(),
            case_name: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"requirement": "flow over a cylinder"}));
    }
}
