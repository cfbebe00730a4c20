//! Scripted collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use foam_agent_client::error::AppError;
use foam_agent_client::orchestrator::types::{
    DownloadedArchive, HealthResponse, JobState, JobStatus, SubmittedJob,
};
use foam_agent_client::orchestrator::{
    ExecutionBridge, Orchestrator, OrchestratorConfig, Translator,
};
use foam_agent_client::state::{AttachmentRegistry, ResourceRevoker, Store};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Revoker that records every handle it was asked to revoke
#[derive(Default)]
pub struct RecordingRevoker {
    pub revoked: Mutex<Vec<String>>,
}

impl ResourceRevoker for RecordingRevoker {
    fn revoke(&self, handle: &str) {
        self.revoked.lock().unwrap().push(handle.to_string());
    }
}

impl RecordingRevoker {
    pub fn count(&self, handle: &str) -> usize {
        self.revoked
            .lock()
            .unwrap()
            .iter()
            .filter(|h| h.as_str() == handle)
            .count()
    }
}

/// Translator returning a fixed answer, optionally blocking forever
pub struct ScriptedTranslator {
    pub answer: Mutex<Option<Result<String, AppError>>>,
    pub calls: Mutex<Vec<(String, String)>>,
    pub hang: bool,
}

impl ScriptedTranslator {
    pub fn answering(text: &str) -> Self {
        Self {
            answer: Mutex::new(Some(Ok(text.to_string()))),
            calls: Mutex::new(Vec::new()),
            hang: false,
        }
    }

    pub fn failing(error: AppError) -> Self {
        Self {
            answer: Mutex::new(Some(Err(error))),
            calls: Mutex::new(Vec::new()),
            hang: false,
        }
    }

    pub fn hanging() -> Self {
        Self {
            answer: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            hang: true,
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Translator for ScriptedTranslator {
    async fn translate(&self, text: &str, model_id: &str) -> Result<String, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_string(), model_id.to_string()));
        if self.hang {
            std::future::pending::<()>().await;
        }
        let answer = self.answer.lock().unwrap().take();
        answer.unwrap_or_else(|| Ok(text.to_string()))
    }
}

/// Bridge answering from scripts
///
/// The first submission gets the scripted answer, later ones an automatic
/// job id. Status answers are served in order; once the script is exhausted every
/// query reports `running`. A status call whose 1-based index is listed in
/// `hang_on` never completes.
pub struct ScriptedBridge {
    pub submit_answer: Mutex<Option<Result<SubmittedJob, AppError>>>,
    pub statuses: Mutex<VecDeque<Result<JobStatus, AppError>>>,
    pub hang_on: Vec<usize>,
    pub submitted: Mutex<Vec<String>>,
    pub status_calls: AtomicUsize,
}

impl ScriptedBridge {
    pub fn new(job_id: &str, statuses: Vec<Result<JobStatus, AppError>>) -> Self {
        Self {
            submit_answer: Mutex::new(Some(Ok(SubmittedJob {
                job_id: job_id.to_string(),
                message: None,
                download_url: format!("/download/{}", job_id),
            }))),
            statuses: Mutex::new(statuses.into()),
            hang_on: Vec::new(),
            submitted: Mutex::new(Vec::new()),
            status_calls: AtomicUsize::new(0),
        }
    }

    pub fn rejecting_submit(error: AppError) -> Self {
        let bridge = Self::new("unused", Vec::new());
        *bridge.submit_answer.lock().unwrap() = Some(Err(error));
        bridge
    }

    pub fn hanging_on(mut self, calls: &[usize]) -> Self {
        self.hang_on = calls.to_vec();
        self
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

pub fn status(state: JobState) -> Result<JobStatus, AppError> {
    Ok(JobStatus {
        status: state,
        message: None,
        progress: None,
        download_url: None,
    })
}

#[async_trait]
impl ExecutionBridge for ScriptedBridge {
    async fn health(&self) -> Result<HealthResponse, AppError> {
        Ok(HealthResponse {
            ok: true,
            project_dir: None,
        })
    }

    async fn submit_job(
        &self,
        requirement: &str,
        _case_name: Option<&str>,
    ) -> Result<SubmittedJob, AppError> {
        let n = {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(requirement.to_string());
            submitted.len()
        };
        let answer = self.submit_answer.lock().unwrap().take();
        answer.unwrap_or_else(|| {
            let job_id = format!("job-auto-{}", n);
            Ok(SubmittedJob {
                download_url: self.download_url(&job_id),
                job_id,
                message: None,
            })
        })
    }

    async fn job_status(&self, _job_id: &str) -> Result<JobStatus, AppError> {
        let call = self.status_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hang_on.contains(&call) {
            std::future::pending::<()>().await;
        }
        let next = self.statuses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| status(JobState::Running))
    }

    async fn download_result(&self, job_id: &str) -> Result<DownloadedArchive, AppError> {
        Ok(DownloadedArchive {
            filename: format!("foam-agent-{}.zip", job_id),
            bytes: Vec::new(),
        })
    }

    fn download_url(&self, job_id: &str) -> String {
        format!("/download/{}", job_id)
    }
}

/// Store with a recording revoker plus an orchestrator over the given fakes
pub fn harness(
    translator: Arc<ScriptedTranslator>,
    bridge: Arc<ScriptedBridge>,
) -> (Store, Orchestrator, Arc<RecordingRevoker>) {
    let revoker = Arc::new(RecordingRevoker::default());
    let registry = Arc::new(AttachmentRegistry::new(revoker.clone()));
    let store = Store::new("deepseek-v1", registry);
    let config = OrchestratorConfig {
        poll_interval: POLL_INTERVAL,
        case_name: None,
        model_id: "deepseek-v1".to_string(),
    };
    let orchestrator = Orchestrator::new(store.clone(), translator, bridge, None, config).unwrap();
    (store, orchestrator, revoker)
}

/// Let spawned tasks run until they block
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
