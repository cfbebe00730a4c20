//! Job controller
//!
//! Drives one submission through translation, bridge submission and status
//! polling, writing every outcome back through the [`Store`]. At most one run
//! is in flight: the active-run slot is claimed exactly once per run, either
//! by the run itself when it reaches a terminal state, by [`Orchestrator::cancel`]
//! or by a superseding [`Orchestrator::submit`]. Whoever claims the slot is
//! the only party allowed to append the run's terminal message.

use crate::config::Config;
use crate::error::AppError;
use crate::orchestrator::bridge_client::ExecutionBridge;
use crate::orchestrator::messages;
use crate::orchestrator::translator::Translator;
use crate::orchestrator::types::{JobState, JobStatus, SubmittedJob};
use crate::state::models::meta_keys;
use crate::state::{AttachmentDraft, MessageMeta, NewMessage, PendingAttachments, Store};
use crate::util::lock;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Phase of the current (or most recent) run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    /// No run has started yet
    #[default]
    Idle,
    /// Waiting for the translation collaborator
    Translating,
    /// Waiting for the bridge to accept the job
    Submitting,
    /// Job accepted, status is being polled
    Polling,
    /// Job finished with a result archive
    Succeeded,
    /// Translation, submission or the job itself failed
    Failed,
    /// Stopped locally by the user or by a newer submission
    Cancelled,
}

impl RunPhase {
    /// Whether no further transition can happen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::Succeeded | RunPhase::Failed | RunPhase::Cancelled
        )
    }

    /// Whether a run is between `submit` and a terminal phase
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunPhase::Translating | RunPhase::Submitting | RunPhase::Polling
        )
    }

    /// Lowercase name for logs and indicators
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Translating => "translating",
            RunPhase::Submitting => "submitting",
            RunPhase::Polling => "polling",
            RunPhase::Succeeded => "succeeded",
            RunPhase::Failed => "failed",
            RunPhase::Cancelled => "cancelled",
        }
    }
}

/// Value published on the progress channel
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunProgress {
    /// Run the value belongs to (0 before the first run)
    pub run_id: u64,
    /// Phase of that run
    pub phase: RunPhase,
    /// Short human readable detail
    pub detail: Option<String>,
    /// Progress reported by the bridge, if any
    pub progress: Option<f64>,
}

/// Orchestrator knobs
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Interval between two status queries
    pub poll_interval: Duration,
    /// Case name sent with every submission
    pub case_name: Option<String>,
    /// Translation preset used when a conversation carries none
    pub model_id: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl OrchestratorConfig {
    /// Derive orchestrator settings from the application configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.polling.interval(),
            case_name: config.bridge.case_name.clone(),
            model_id: config.translation.model_id.clone(),
        }
    }

    /// Reject settings the controller cannot run with
    ///
    /// # Errors
    /// * `AppError::Validation` for a zero poll interval or an empty model id
    pub fn validate(&self) -> Result<(), AppError> {
        if self.poll_interval.is_zero() {
            return Err(AppError::Validation(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.model_id.trim().is_empty() {
            return Err(AppError::Validation("model id must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Handle to a spawned run
pub struct RunHandle {
    id: u64,
    task: JoinHandle<RunPhase>,
}

impl RunHandle {
    /// Identifier of the run
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the run's task to end and return the phase it ended in
    ///
    /// A run that was cancelled or superseded ends as `Cancelled`.
    pub async fn finished(self) -> RunPhase {
        match self.task.await {
            Ok(phase) => phase,
            Err(e) => {
                tracing::error!(run_id = self.id, error = %e, "Run task did not complete");
                RunPhase::Failed
            }
        }
    }
}

/// Occupant of the active-run slot
struct ActiveRun {
    id: u64,
    token: CancellationToken,
    conversation_id: String,
    job_id: Option<String>,
}

/// Everything a spawned run needs to know about itself
struct RunContext {
    id: u64,
    token: CancellationToken,
    conversation_id: String,
    text: String,
    model_id: String,
}

struct Inner {
    store: Store,
    pending: Option<Arc<PendingAttachments>>,
    translator: Arc<dyn Translator>,
    bridge: Arc<dyn ExecutionBridge>,
    config: OrchestratorConfig,
    active: Mutex<Option<ActiveRun>>,
    next_run_id: AtomicU64,
    progress: watch::Sender<RunProgress>,
}

/// Single-flight job controller
///
/// Cheap to clone; clones share the same active-run slot.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Create a controller
    ///
    /// # Arguments
    /// * `store` - Store every outcome is written to
    /// * `translator` - Translation collaborator
    /// * `bridge` - Execution bridge collaborator
    /// * `pending` - Staging area cleared on every submission, if the caller stages files
    /// * `config` - Polling and submission settings
    ///
    /// # Errors
    /// * `AppError::Validation` if `config` is rejected by [`OrchestratorConfig::validate`]
    pub fn new(
        store: Store,
        translator: Arc<dyn Translator>,
        bridge: Arc<dyn ExecutionBridge>,
        pending: Option<Arc<PendingAttachments>>,
        config: OrchestratorConfig,
    ) -> Result<Self, AppError> {
        config.validate()?;
        let (progress, _) = watch::channel(RunProgress::default());
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                pending,
                translator,
                bridge,
                config,
                active: Mutex::new(None),
                next_run_id: AtomicU64::new(1),
                progress,
            }),
        })
    }

    /// Start a run for the active conversation
    ///
    /// Whitespace-only text without attachments, or an ended active
    /// conversation, is rejected without touching the store. A run that is
    /// still in flight is superseded silently. Must be called from within a
    /// Tokio runtime.
    ///
    /// # Returns
    /// * `Some(RunHandle)` - The run was started
    /// * `None` - The submission was rejected
    pub fn submit(&self, raw_text: &str, attachments: Vec<AttachmentDraft>) -> Option<RunHandle> {
        let inner = &self.inner;
        let text = raw_text.trim();
        if text.is_empty() && attachments.is_empty() {
            tracing::debug!("Ignoring empty submission");
            return None;
        }
        if inner.store.active_conversation().is_some_and(|c| c.ended) {
            tracing::debug!("Ignoring submission to an ended conversation");
            return None;
        }

        let previous = lock(&inner.active).take();
        if let Some(previous) = &previous {
            previous.token.cancel();
            tracing::info!(
                run_id = previous.id,
                conversation_id = %previous.conversation_id,
                "Superseding in-flight run"
            );
        }

        let conversation = match inner.store.active_conversation() {
            Some(conv) => conv,
            None => inner.store.create_conversation(),
        };
        let Some(message) = inner
            .store
            .append_message_to(&conversation.id, NewMessage::user(text, attachments))
        else {
            if previous.is_some() {
                inner.store.set_streaming(false);
            }
            return None;
        };
        if let Some(pending) = &inner.pending {
            pending.settle(&message.attachments);
        }

        let id = inner.next_run_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        *lock(&inner.active) = Some(ActiveRun {
            id,
            token: token.clone(),
            conversation_id: conversation.id.clone(),
            job_id: None,
        });
        inner.store.set_streaming(true);
        inner.publish(id, RunPhase::Translating, None, None);

        let model_id = if conversation.model.trim().is_empty() {
            inner.config.model_id.clone()
        } else {
            conversation.model.clone()
        };
        tracing::info!(
            run_id = id,
            conversation_id = %conversation.id,
            model = %model_id,
            attachments = message.attachments.len(),
            "Run started"
        );

        let run = RunContext {
            id,
            token,
            conversation_id: conversation.id,
            text: text.to_string(),
            model_id,
        };
        let task = tokio::spawn(drive(self.inner.clone(), run));
        Some(RunHandle { id, task })
    }

    /// Stop tracking the run in flight
    ///
    /// Aborts the pending network call, stops polling, clears the streaming
    /// flag and appends a single notice that only local tracking stopped.
    /// The bridge is not asked to stop computing.
    ///
    /// # Returns
    /// `false` if no run was in flight (calling it again is a no-op)
    pub fn cancel(&self) -> bool {
        let inner = &self.inner;
        let Some(run) = lock(&inner.active).take() else {
            return false;
        };
        run.token.cancel();
        inner.store.set_streaming(false);

        let meta = run.job_id.as_ref().map(|job_id| {
            let mut meta = MessageMeta::new();
            meta.insert(meta_keys::JOB_ID.to_string(), Value::from(job_id.as_str()));
            meta
        });
        inner.store.append_message_to(
            &run.conversation_id,
            NewMessage::assistant(messages::tracking_stopped(), meta),
        );
        inner.publish(run.id, RunPhase::Cancelled, None, None);

        tracing::info!(
            run_id = run.id,
            job_id = ?run.job_id,
            "Run cancelled, local tracking stopped"
        );
        true
    }

    /// Phase of the current or most recent run
    pub fn phase(&self) -> RunPhase {
        self.inner.progress.borrow().phase
    }

    /// Subscribe to progress updates
    pub fn progress(&self) -> watch::Receiver<RunProgress> {
        self.inner.progress.subscribe()
    }

    /// Job id of the run in flight, once the bridge accepted it
    pub fn current_job_id(&self) -> Option<String> {
        lock(&self.inner.active)
            .as_ref()
            .and_then(|run| run.job_id.clone())
    }

    /// Whether a run is in flight
    pub fn is_running(&self) -> bool {
        lock(&self.inner.active).is_some()
    }

    /// Bridge the controller submits to
    pub fn bridge(&self) -> &Arc<dyn ExecutionBridge> {
        &self.inner.bridge
    }
}

impl Inner {
    /// Publish progress unless a newer run already owns the indicator
    fn publish(&self, run_id: u64, phase: RunPhase, detail: Option<String>, progress: Option<f64>) {
        self.progress.send_if_modified(|current| {
            if current.run_id > run_id {
                return false;
            }
            *current = RunProgress {
                run_id,
                phase,
                detail,
                progress,
            };
            true
        });
        tracing::debug!(run_id, phase = phase.as_str(), "Run phase");
    }

    /// Take the slot if `run_id` still owns it
    fn claim(&self, run_id: u64) -> Option<ActiveRun> {
        let mut active = lock(&self.active);
        if active.as_ref().is_some_and(|run| run.id == run_id) {
            active.take()
        } else {
            None
        }
    }

    /// Remember the accepted job; `false` if the run lost its slot
    fn record_job(&self, run_id: u64, job_id: &str) -> bool {
        match lock(&self.active).as_mut() {
            Some(run) if run.id == run_id => {
                run.job_id = Some(job_id.to_string());
                true
            }
            _ => false,
        }
    }

    /// End a run with its terminal message
    ///
    /// Appends nothing if the run already lost its slot to a cancel or a
    /// newer submission.
    fn finish(&self, run_id: u64, phase: RunPhase, message: NewMessage) -> RunPhase {
        let Some(run) = self.claim(run_id) else {
            tracing::debug!(run_id, "Run no longer active, dropping terminal message");
            return RunPhase::Cancelled;
        };
        run.token.cancel();
        if self
            .store
            .append_message_to(&run.conversation_id, message)
            .is_none()
        {
            tracing::debug!(
                run_id,
                conversation_id = %run.conversation_id,
                "Conversation gone, terminal message dropped"
            );
        }
        self.store.set_streaming(false);
        self.publish(run_id, phase, None, None);
        tracing::info!(run_id, job_id = ?run.job_id, phase = phase.as_str(), "Run finished");
        phase
    }

    /// Terminal path for a translation or submission error
    fn finish_with_error(&self, run_id: u64, error: AppError) -> RunPhase {
        if error.is_cancellation() {
            return self.finish(
                run_id,
                RunPhase::Cancelled,
                NewMessage::assistant(messages::aborted(), None),
            );
        }
        tracing::warn!(run_id, error = %error, "Submission failed");
        let mut meta = MessageMeta::new();
        meta.insert(meta_keys::IS_ERROR.to_string(), Value::Bool(true));
        self.finish(
            run_id,
            RunPhase::Failed,
            NewMessage::assistant(messages::submit_failed(&error.to_string()), Some(meta)),
        )
    }
}

/// Await `fut` unless `token` fires first
async fn guarded<T>(token: &CancellationToken, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        out = fut => Some(out),
    }
}

fn bridge_status_value(status: &JobStatus) -> Value {
    json!({
        "status": status.status.as_str(),
        "message": status.message,
        "progress": status.progress,
    })
}

async fn drive(inner: Arc<Inner>, run: RunContext) -> RunPhase {
    let translated = match guarded(
        &run.token,
        inner.translator.translate(&run.text, &run.model_id),
    )
    .await
    {
        None => return RunPhase::Cancelled,
        Some(Err(e)) => return inner.finish_with_error(run.id, e),
        Some(Ok(text)) => text,
    };

    inner.publish(run.id, RunPhase::Submitting, None, None);
    let job = match guarded(
        &run.token,
        inner
            .bridge
            .submit_job(&translated, inner.config.case_name.as_deref()),
    )
    .await
    {
        None => return RunPhase::Cancelled,
        Some(Err(e)) => return inner.finish_with_error(run.id, e),
        Some(Ok(job)) => job,
    };

    if !inner.record_job(run.id, &job.job_id) {
        return RunPhase::Cancelled;
    }
    let mut meta = MessageMeta::new();
    meta.insert(meta_keys::JOB_ID.to_string(), Value::from(job.job_id.as_str()));
    meta.insert(
        meta_keys::DOWNLOAD_URL.to_string(),
        Value::from(job.download_url.as_str()),
    );
    meta.insert(
        meta_keys::TRANSLATED_TEXT.to_string(),
        Value::from(translated.as_str()),
    );
    let submission_id = inner
        .store
        .append_message_to(
            &run.conversation_id,
            NewMessage::assistant(messages::submitted(&job.job_id, &translated), Some(meta)),
        )
        .map(|m| m.id);
    inner.publish(run.id, RunPhase::Polling, job.message.clone(), None);
    tracing::info!(run_id = run.id, job_id = %job.job_id, "Polling job status");

    poll(&inner, &run, &job, submission_id.as_deref()).await
}

async fn poll(
    inner: &Inner,
    run: &RunContext,
    job: &SubmittedJob,
    submission_id: Option<&str>,
) -> RunPhase {
    let period = inner.config.poll_interval;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = run.token.cancelled() => return RunPhase::Cancelled,
            _ = ticker.tick() => {}
        }

        let status = match guarded(&run.token, inner.bridge.job_status(&job.job_id)).await {
            None => return RunPhase::Cancelled,
            Some(Err(e)) if e.is_cancellation() => continue,
            Some(Err(e)) => {
                tracing::warn!(
                    run_id = run.id,
                    job_id = %job.job_id,
                    transient = e.is_transient(),
                    error = %e,
                    "Status query failed, retrying on next tick"
                );
                continue;
            }
            Some(Ok(status)) => status,
        };

        match status.status {
            JobState::Queued | JobState::Running => {
                inner.publish(
                    run.id,
                    RunPhase::Polling,
                    Some(messages::progress_detail(status.message.as_deref())),
                    status.progress,
                );
                if let Some(message_id) = submission_id {
                    let mut patch = MessageMeta::new();
                    patch.insert(
                        meta_keys::BRIDGE_STATUS.to_string(),
                        bridge_status_value(&status),
                    );
                    inner.store.patch_message_meta(message_id, patch);
                }
            }
            JobState::Succeeded => {
                let download_url = status
                    .download_url
                    .clone()
                    .unwrap_or_else(|| job.download_url.clone());
                let mut meta = MessageMeta::new();
                meta.insert(meta_keys::JOB_ID.to_string(), Value::from(job.job_id.as_str()));
                meta.insert(
                    meta_keys::DOWNLOAD_URL.to_string(),
                    Value::from(download_url.as_str()),
                );
                meta.insert(
                    meta_keys::BRIDGE_STATUS.to_string(),
                    bridge_status_value(&status),
                );
                return inner.finish(
                    run.id,
                    RunPhase::Succeeded,
                    NewMessage::assistant(
                        messages::succeeded(&job.job_id, &download_url),
                        Some(meta),
                    ),
                );
            }
            JobState::Failed => {
                let reason = AppError::JobFailure(
                    status
                        .message
                        .clone()
                        .unwrap_or_else(|| "no reason given".to_string()),
                );
                tracing::warn!(run_id = run.id, job_id = %job.job_id, error = %reason, "Job failed");
                let mut meta = MessageMeta::new();
                meta.insert(meta_keys::JOB_ID.to_string(), Value::from(job.job_id.as_str()));
                meta.insert(meta_keys::IS_ERROR.to_string(), Value::Bool(true));
                meta.insert(
                    meta_keys::BRIDGE_STATUS.to_string(),
                    bridge_status_value(&status),
                );
                return inner.finish(
                    run.id,
                    RunPhase::Failed,
                    NewMessage::assistant(
                        messages::failed(&job.job_id, status.message.as_deref()),
                        Some(meta),
                    ),
                );
            }
        }
    }
}
