//! Execution bridge client
//!
//! HTTP client for the bridge service that runs the solver agent: health
//! probe, job submission, status queries and result download. Every error
//! body the bridge produces is flattened into one readable string before it
//! leaves this module.

use crate::config::BridgeConfig;
use crate::error::AppError;
use crate::orchestrator::types::{
    DownloadedArchive, FieldProblem, HealthResponse, JobStatus, RawStatusResponse,
    RawSubmitResponse, SubmitJobRequest, SubmittedJob,
};
use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::{header, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

/// Operations the job controller needs from the execution bridge
#[async_trait]
pub trait ExecutionBridge: Send + Sync {
    /// Probe bridge availability
    async fn health(&self) -> Result<HealthResponse, AppError>;

    /// Submit a requirement; the response must carry a job identifier
    async fn submit_job(
        &self,
        requirement: &str,
        case_name: Option<&str>,
    ) -> Result<SubmittedJob, AppError>;

    /// Query the current status of a job
    async fn job_status(&self, job_id: &str) -> Result<JobStatus, AppError>;

    /// Download the result archive of a finished job
    async fn download_result(&self, job_id: &str) -> Result<DownloadedArchive, AppError>;

    /// Direct download reference for a job's result archive
    fn download_url(&self, job_id: &str) -> String;
}

/// [`ExecutionBridge`] over HTTP
pub struct HttpBridgeClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpBridgeClient {
    /// Create a client from configuration
    ///
    /// # Errors
    /// * `AppError::Validation` if the base URL cannot carry paths
    /// * `AppError::Internal` if the HTTP client cannot be built
    pub fn new(config: &BridgeConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(anyhow!("Failed to build HTTP client: {}", e)))?;
        Self::with_client(client, &config.base_url)
    }

    /// Create a client reusing an existing [`reqwest::Client`]
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, AppError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::Validation(format!("invalid bridge URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Validation(format!(
                "bridge URL cannot carry paths: {}",
                base_url
            )));
        }
        Ok(Self { client, base_url })
    }

    /// Build an endpoint URL; segments are percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

#[async_trait]
impl ExecutionBridge for HttpBridgeClient {
    async fn health(&self) -> Result<HealthResponse, AppError> {
        let response = self.client.get(self.endpoint(&["health"])).send().await?;
        read_json(response).await
    }

    async fn submit_job(
        &self,
        requirement: &str,
        case_name: Option<&str>,
    ) -> Result<SubmittedJob, AppError> {
        if requirement.trim().is_empty() {
            return Err(AppError::Validation(
                "cannot submit an empty requirement".to_string(),
            ));
        }
        let body = SubmitJobRequest {
            requirement: requirement.to_string(),
            case_name: case_name
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        };

        tracing::debug!(
            requirement_len = requirement.len(),
            case_name = ?body.case_name,
            "Submitting job to bridge"
        );

        let response = self
            .client
            .post(self.endpoint(&["run"]))
            .json(&body)
            .send()
            .await?;
        let raw: RawSubmitResponse = read_json(response).await?;

        let Some(job_id) = raw.job_id().map(str::to_string) else {
            return Err(AppError::MissingJobId(
                raw.message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "the bridge did not return a job id".to_string()),
            ));
        };
        let download_url = raw
            .zip_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| self.download_url(&job_id));

        tracing::info!(job_id = %job_id, "Job accepted by bridge");
        Ok(SubmittedJob {
            job_id,
            message: raw.message,
            download_url,
        })
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus, AppError> {
        if job_id.is_empty() {
            return Err(AppError::Validation("job id is empty".to_string()));
        }
        let response = self
            .client
            .get(self.endpoint(&["status", job_id]))
            .send()
            .await?;
        let raw: RawStatusResponse = read_json(response).await?;
        Ok(raw.into())
    }

    async fn download_result(&self, job_id: &str) -> Result<DownloadedArchive, AppError> {
        if job_id.is_empty() {
            return Err(AppError::Validation("job id is empty".to_string()));
        }
        let response = self
            .client
            .get(self.endpoint(&["download", job_id]))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let body = serde_json::from_str::<Value>(&raw).ok();
            return Err(remote_error(status, body.as_ref()));
        }

        let filename = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .unwrap_or_else(|| format!("foam-agent-{}.zip", job_id));
        let bytes = response.bytes().await?.to_vec();

        tracing::info!(job_id = %job_id, filename = %filename, size = bytes.len(), "Result downloaded");
        Ok(DownloadedArchive { filename, bytes })
    }

    fn download_url(&self, job_id: &str) -> String {
        self.endpoint(&["download", job_id]).to_string()
    }
}

/// Read a response body as JSON, converting error statuses
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AppError> {
    let status = response.status();
    let raw = response.text().await?;
    let data: Option<Value> = if raw.trim().is_empty() {
        None
    } else {
        serde_json::from_str(&raw).ok()
    };

    if !status.is_success() {
        let err = remote_error(status, data.as_ref());
        tracing::error!(status_code = status.as_u16(), error = %err, "Bridge returned error status");
        return Err(err);
    }

    let data = data.ok_or_else(|| AppError::Decode(format!("expected JSON body, got: {}", raw)))?;
    serde_json::from_value(data).map_err(|e| AppError::Decode(e.to_string()))
}

/// Convert an error response into an [`AppError`] with one readable message
///
/// A list-shaped `detail` (field-level validation problems) becomes
/// `RemoteValidation` with items rendered as `loc.path: msg` and joined by
/// `"; "`. A string `detail` or `message` is used as is; otherwise the
/// status line is reported.
pub fn remote_error(status: StatusCode, body: Option<&Value>) -> AppError {
    let detail = body.and_then(|b| b.get("detail"));
    if let Some(Value::Array(items)) = detail {
        let message = items
            .iter()
            .map(|item| {
                serde_json::from_value::<FieldProblem>(item.clone())
                    .map(|p| describe_problem(&p))
                    .unwrap_or_else(|_| "validation error".to_string())
            })
            .collect::<Vec<_>>()
            .join("; ");
        return AppError::RemoteValidation(message);
    }

    let message = detail
        .and_then(Value::as_str)
        .or_else(|| body.and_then(|b| b.get("message")).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| {
            format!(
                "{} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Request failed")
            )
        });
    AppError::Remote {
        status: status.as_u16(),
        message,
    }
}

fn describe_problem(problem: &FieldProblem) -> String {
    let loc = problem
        .loc
        .iter()
        .map(|part| match part {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(".");
    let msg = problem
        .msg
        .as_deref()
        .or(problem.kind.as_deref())
        .unwrap_or("validation error");
    if loc.is_empty() {
        msg.to_string()
    } else {
        format!("{}: {}", loc, msg)
    }
}

/// Extract the file name from a `Content-Disposition` header value
fn filename_from_disposition(value: &str) -> Option<String> {
    value.split(';').map(str::trim).find_map(|part| {
        let (key, val) = part.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let name = val.trim().trim_matches('"');
        (!name.is_empty()).then(|| name.to_string())
    })
}
