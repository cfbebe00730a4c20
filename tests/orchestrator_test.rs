//! Integration tests for the job controller
//!
//! These tests drive complete runs against scripted collaborators with a
//! paused clock, so every polling tick happens exactly when the test
//! advances time:
//! 1. Submission, translation and job acceptance
//! 2. Polling until a terminal status
//! 3. Cancellation, supersession and error propagation

mod common;

use common::{harness, settle, status, ScriptedBridge, ScriptedTranslator, POLL_INTERVAL};
use foam_agent_client::error::AppError;
use foam_agent_client::orchestrator::types::{JobState, JobStatus};
use foam_agent_client::orchestrator::{Orchestrator, OrchestratorConfig, RunPhase};
use foam_agent_client::state::models::meta_keys;
use foam_agent_client::state::{
    AttachmentDraft, AttachmentRegistry, MessageRole, PendingAttachments, Store,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time;

fn tracking_notices(store: &Store) -> usize {
    store
        .get_state()
        .conversations
        .iter()
        .flat_map(|c| c.messages.iter())
        .filter(|m| m.content.contains("Stopped tracking"))
        .count()
}

/// Scenarios 1-3: submit, accept, poll `running`, `running`, `succeeded`
#[tokio::test(start_paused = true)]
async fn test_run_polls_until_succeeded() {
    let translator = Arc::new(ScriptedTranslator::answering("design a small heatsink"));
    let bridge = Arc::new(ScriptedBridge::new(
        "job-42",
        vec![
            status(JobState::Running),
            status(JobState::Running),
            Ok(JobStatus {
                status: JobState::Succeeded,
                message: None,
                progress: None,
                download_url: Some("/download/job-42".to_string()),
            }),
        ],
    ));
    let (store, orchestrator, _) = harness(translator.clone(), bridge.clone());

    let handle = orchestrator
        .submit("design a small heat sink", Vec::new())
        .unwrap();

    // user message is appended synchronously
    let conv = store.active_conversation().unwrap();
    assert_eq!(conv.messages.len(), 1);
    assert_eq!(conv.messages[0].role, MessageRole::User);
    assert_eq!(conv.messages[0].content, "design a small heat sink");
    assert!(store.is_streaming());
    assert_eq!(orchestrator.phase(), RunPhase::Translating);

    settle().await;
    assert_eq!(
        translator.calls(),
        vec![(
            "design a small heat sink".to_string(),
            "deepseek-v1".to_string()
        )]
    );
    assert_eq!(
        *bridge.submitted.lock().unwrap(),
        vec!["design a small heatsink".to_string()]
    );

    let conv = store.active_conversation().unwrap();
    assert_eq!(conv.messages.len(), 2);
    let submission = &conv.messages[1];
    assert_eq!(submission.role, MessageRole::Assistant);
    assert!(submission.content.contains("design a small heatsink"));
    assert!(submission.content.contains("job-42"));
    assert_eq!(submission.meta_str(meta_keys::JOB_ID), Some("job-42"));
    assert_eq!(orchestrator.phase(), RunPhase::Polling);
    assert_eq!(orchestrator.current_job_id().as_deref(), Some("job-42"));
    assert_eq!(bridge.status_calls(), 0);

    for tick in 1..=2 {
        time::advance(POLL_INTERVAL).await;
        settle().await;
        assert_eq!(bridge.status_calls(), tick);
        assert!(store.is_streaming(), "run ended early on tick {}", tick);
        assert_eq!(store.active_conversation().unwrap().messages.len(), 2);
    }

    time::advance(POLL_INTERVAL).await;
    settle().await;
    assert_eq!(bridge.status_calls(), 3);

    let conv = store.active_conversation().unwrap();
    assert_eq!(conv.messages.len(), 3);
    let terminal = &conv.messages[2];
    assert!(terminal.content.contains("/download/job-42"));
    assert_eq!(terminal.meta_str(meta_keys::DOWNLOAD_URL), Some("/download/job-42"));
    assert!(!terminal.is_error());
    assert!(!store.is_streaming());
    assert_eq!(orchestrator.current_job_id(), None);
    assert_eq!(handle.finished().await, RunPhase::Succeeded);

    // timer is stopped
    time::advance(POLL_INTERVAL * 5).await;
    settle().await;
    assert_eq!(bridge.status_calls(), 3);
    assert_eq!(store.active_conversation().unwrap().messages.len(), 3);
}

/// Scenario 4: cancel while the second tick is waiting for its response
#[tokio::test(start_paused = true)]
async fn test_cancel_during_second_tick() {
    let translator = Arc::new(ScriptedTranslator::answering("run a cavity case"));
    let bridge = Arc::new(
        ScriptedBridge::new("job-7", vec![status(JobState::Running)]).hanging_on(&[2]),
    );
    let (store, orchestrator, _) = harness(translator, bridge.clone());

    let handle = orchestrator.submit("run a cavity case", Vec::new()).unwrap();
    settle().await;
    time::advance(POLL_INTERVAL).await;
    settle().await;
    time::advance(POLL_INTERVAL).await;
    settle().await;
    assert_eq!(bridge.status_calls(), 2);

    assert!(orchestrator.cancel());
    assert!(!store.is_streaming());
    assert!(!orchestrator.is_running());
    assert_eq!(orchestrator.current_job_id(), None);
    assert_eq!(orchestrator.phase(), RunPhase::Cancelled);

    let conv = store.active_conversation().unwrap();
    assert_eq!(conv.messages.len(), 3);
    let notice = &conv.messages[2];
    assert!(notice.content.contains("Stopped tracking"));
    assert_eq!(notice.meta_str(meta_keys::JOB_ID), Some("job-7"));

    assert_eq!(handle.finished().await, RunPhase::Cancelled);

    // cancel is idempotent
    assert!(!orchestrator.cancel());
    time::advance(POLL_INTERVAL * 10).await;
    settle().await;
    assert_eq!(bridge.status_calls(), 2);
    assert_eq!(tracking_notices(&store), 1);
    assert_eq!(store.active_conversation().unwrap().messages.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_translation() {
    let translator = Arc::new(ScriptedTranslator::hanging());
    let bridge = Arc::new(ScriptedBridge::new("job-1", Vec::new()));
    let (store, orchestrator, _) = harness(translator, bridge.clone());

    let handle = orchestrator.submit("slow translation", Vec::new()).unwrap();
    settle().await;
    assert_eq!(orchestrator.phase(), RunPhase::Translating);

    assert!(orchestrator.cancel());
    assert_eq!(handle.finished().await, RunPhase::Cancelled);
    assert!(!store.is_streaming());
    assert!(bridge.submitted.lock().unwrap().is_empty());

    let conv = store.active_conversation().unwrap();
    assert_eq!(conv.messages.len(), 2);
    assert_eq!(conv.messages[1].meta_str(meta_keys::JOB_ID), None);
}

#[tokio::test]
async fn test_cancel_without_run_is_noop() {
    let translator = Arc::new(ScriptedTranslator::answering("x"));
    let bridge = Arc::new(ScriptedBridge::new("job-1", Vec::new()));
    let (store, orchestrator, _) = harness(translator, bridge);
    store.init();
    let before = store.get_state();

    assert!(!orchestrator.cancel());
    assert_eq!(store.get_state(), before);
    assert_eq!(orchestrator.phase(), RunPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_new_submission_supersedes_running_one() {
    let translator = Arc::new(ScriptedTranslator::answering("first requirement"));
    let bridge = Arc::new(ScriptedBridge::new("job-42", Vec::new()));
    let (store, orchestrator, _) = harness(translator, bridge.clone());

    let first = orchestrator.submit("first", Vec::new()).unwrap();
    settle().await;
    assert_eq!(orchestrator.current_job_id().as_deref(), Some("job-42"));

    let second = orchestrator.submit("second", Vec::new()).unwrap();
    assert!(store.is_streaming());
    assert_eq!(first.finished().await, RunPhase::Cancelled);

    settle().await;
    assert!(store.is_streaming());
    assert_eq!(orchestrator.current_job_id().as_deref(), Some("job-auto-2"));
    assert_eq!(orchestrator.progress().borrow().run_id, second.id());
    assert_eq!(tracking_notices(&store), 0);

    let contents: Vec<String> = store
        .active_conversation()
        .unwrap()
        .messages
        .iter()
        .map(|m| m.content.clone())
        .collect();
    assert_eq!(contents.len(), 4);
    assert_eq!(contents[0], "first");
    assert!(contents[1].contains("job-42"));
    assert_eq!(contents[2], "second");
    assert!(contents[3].contains("job-auto-2"));

    // only the second run keeps polling
    time::advance(POLL_INTERVAL).await;
    settle().await;
    assert_eq!(bridge.status_calls(), 1);

    assert!(orchestrator.cancel());
    assert_eq!(second.finished().await, RunPhase::Cancelled);
    assert_eq!(tracking_notices(&store), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_and_cancellation_errors_are_swallowed() {
    let translator = Arc::new(ScriptedTranslator::answering("heat sink"));
    let bridge = Arc::new(ScriptedBridge::new(
        "job-9",
        vec![
            Err(AppError::Remote {
                status: 503,
                message: "busy".to_string(),
            }),
            Err(AppError::Cancelled),
            Err(AppError::Decode("truncated".to_string())),
            status(JobState::Succeeded),
        ],
    ));
    let (store, orchestrator, _) = harness(translator, bridge.clone());

    let handle = orchestrator.submit("heat sink", Vec::new()).unwrap();
    assert_eq!(handle.finished().await, RunPhase::Succeeded);

    assert_eq!(bridge.status_calls(), 4);
    let conv = store.active_conversation().unwrap();
    assert_eq!(conv.messages.len(), 3);
    assert!(conv.messages.iter().all(|m| !m.is_error()));
    // falls back to the download reference returned at submission
    assert_eq!(
        conv.messages[2].meta_str(meta_keys::DOWNLOAD_URL),
        Some("/download/job-9")
    );
}

#[tokio::test(start_paused = true)]
async fn test_job_failure_reports_reason() {
    let translator = Arc::new(ScriptedTranslator::answering("bad mesh"));
    let bridge = Arc::new(ScriptedBridge::new(
        "job-3",
        vec![Ok(JobStatus {
            status: JobState::Failed,
            message: Some("solver diverged".to_string()),
            progress: None,
            download_url: None,
        })],
    ));
    let (store, orchestrator, _) = harness(translator, bridge);

    let handle = orchestrator.submit("bad mesh", Vec::new()).unwrap();
    assert_eq!(handle.finished().await, RunPhase::Failed);

    let conv = store.active_conversation().unwrap();
    let terminal = conv.messages.last().unwrap();
    assert!(terminal.is_error());
    assert!(terminal.content.contains("Reason: solver diverged"));
    assert!(!store.is_streaming());
}

#[tokio::test]
async fn test_missing_job_id_is_failure() {
    let translator = Arc::new(ScriptedTranslator::answering("anything"));
    let bridge = Arc::new(ScriptedBridge::rejecting_submit(AppError::MissingJobId(
        "the bridge did not return a job id".to_string(),
    )));
    let (store, orchestrator, _) = harness(translator, bridge.clone());

    let handle = orchestrator.submit("anything", Vec::new()).unwrap();
    assert_eq!(handle.finished().await, RunPhase::Failed);

    let conv = store.active_conversation().unwrap();
    assert_eq!(conv.messages.len(), 2);
    assert!(conv.messages[1].is_error());
    assert!(conv.messages[1].content.contains("did not return a job id"));
    assert!(!store.is_streaming());
    assert_eq!(bridge.status_calls(), 0);
}

#[tokio::test]
async fn test_credential_error_ends_run_before_submission() {
    let translator = Arc::new(ScriptedTranslator::failing(AppError::Credential(
        "DEEPSEEK_API_KEY is not set".to_string(),
    )));
    let bridge = Arc::new(ScriptedBridge::new("job-1", Vec::new()));
    let (store, orchestrator, _) = harness(translator, bridge.clone());

    let handle = orchestrator.submit("翻译我", Vec::new()).unwrap();
    assert_eq!(handle.finished().await, RunPhase::Failed);

    assert!(bridge.submitted.lock().unwrap().is_empty());
    let conv = store.active_conversation().unwrap();
    let terminal = conv.messages.last().unwrap();
    assert!(terminal.is_error());
    assert!(terminal.content.contains("DEEPSEEK_API_KEY"));
    assert!(!store.is_streaming());
}

#[tokio::test]
async fn test_remote_validation_error_is_surfaced() {
    let translator = Arc::new(ScriptedTranslator::answering("x"));
    let bridge = Arc::new(ScriptedBridge::rejecting_submit(AppError::RemoteValidation(
        "body.requirement: field required".to_string(),
    )));
    let (store, orchestrator, _) = harness(translator, bridge);

    let handle = orchestrator.submit("x", Vec::new()).unwrap();
    assert_eq!(handle.finished().await, RunPhase::Failed);

    let terminal = store
        .active_conversation()
        .unwrap()
        .messages
        .last()
        .cloned()
        .unwrap();
    assert!(terminal
        .content
        .ends_with("body.requirement: field required"));
}

#[tokio::test]
async fn test_translator_abort_ends_cancelled_with_message() {
    let translator = Arc::new(ScriptedTranslator::failing(AppError::Cancelled));
    let bridge = Arc::new(ScriptedBridge::new("job-1", Vec::new()));
    let (store, orchestrator, _) = harness(translator, bridge);

    let handle = orchestrator.submit("x", Vec::new()).unwrap();
    assert_eq!(handle.finished().await, RunPhase::Cancelled);

    let terminal = store
        .active_conversation()
        .unwrap()
        .messages
        .last()
        .cloned()
        .unwrap();
    assert!(!terminal.is_error());
    assert!(terminal.content.contains("cancelled"));
    assert!(!store.is_streaming());
}

#[tokio::test]
async fn test_empty_submission_changes_nothing() {
    let translator = Arc::new(ScriptedTranslator::answering("x"));
    let bridge = Arc::new(ScriptedBridge::new("job-1", Vec::new()));
    let (store, orchestrator, _) = harness(translator.clone(), bridge);
    store.init();

    let notifications = Arc::new(AtomicUsize::new(0));
    let counter = notifications.clone();
    let _sub = store.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let before = store.get_state();

    assert!(orchestrator.submit("   \n\t ", Vec::new()).is_none());

    assert_eq!(notifications.load(Ordering::SeqCst), 1);
    assert_eq!(store.get_state(), before);
    assert!(translator.calls().is_empty());
    assert_eq!(orchestrator.phase(), RunPhase::Idle);
}

/// Scenario 6: submissions to an ended conversation are ignored
#[tokio::test]
async fn test_submit_to_ended_conversation_is_noop() {
    let translator = Arc::new(ScriptedTranslator::answering("x"));
    let bridge = Arc::new(ScriptedBridge::new("job-1", Vec::new()));
    let (store, orchestrator, _) = harness(translator.clone(), bridge);
    store.init();
    let conv_id = store.active_conversation().unwrap().id;
    assert!(store.end_conversation(&conv_id));
    let before = store.get_state();

    assert!(orchestrator.submit("design a small heat sink", Vec::new()).is_none());

    assert_eq!(store.get_state(), before);
    assert!(!store.is_streaming());
    assert!(translator.calls().is_empty());
}

#[tokio::test]
async fn test_submit_without_conversation_creates_one() {
    let translator = Arc::new(ScriptedTranslator::answering("x"));
    let bridge = Arc::new(ScriptedBridge::new("job-1", Vec::new()));
    let (store, orchestrator, _) = harness(translator, bridge);
    assert!(store.get_state().conversations.is_empty());

    let _handle = orchestrator
        .submit("design a small heat sink for a cpu", Vec::new())
        .unwrap();

    let state = store.get_state();
    assert_eq!(state.conversations.len(), 1);
    assert_eq!(state.conversations[0].title, "design a small heat si…");
    assert_eq!(
        state.active_conversation_id.as_deref(),
        Some(state.conversations[0].id.as_str())
    );
    orchestrator.cancel();
}

#[tokio::test]
async fn test_terminal_message_goes_to_run_conversation() {
    let translator = Arc::new(ScriptedTranslator::answering("x"));
    let bridge = Arc::new(ScriptedBridge::rejecting_submit(AppError::RemoteValidation(
        "nope".to_string(),
    )));
    let (store, orchestrator, _) = harness(translator, bridge);
    store.init();
    let origin = store.active_conversation().unwrap().id;

    let handle = orchestrator.submit("x", Vec::new()).unwrap();
    let other = store.create_conversation();
    assert_eq!(handle.finished().await, RunPhase::Failed);

    let state = store.get_state();
    assert_eq!(state.conversation(&origin).unwrap().messages.len(), 2);
    assert!(state.conversation(&other.id).unwrap().messages.is_empty());
}

#[tokio::test]
async fn test_submission_settles_staged_attachments() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("part.stp");
    let extra = dir.path().join("extra.msh");
    std::fs::write(&source, b"ISO-10303-21;").unwrap();
    std::fs::write(&extra, b"$MeshFormat").unwrap();

    let revoker = Arc::new(common::RecordingRevoker::default());
    let registry = Arc::new(AttachmentRegistry::new(revoker.clone()));
    let store = Store::new("deepseek-v1", registry.clone());
    let pending = Arc::new(PendingAttachments::new(
        registry.clone(),
        dir.path().join("staging"),
    ));
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(ScriptedTranslator::answering("")),
        Arc::new(ScriptedBridge::new("job-1", Vec::new())),
        Some(pending.clone()),
        OrchestratorConfig::default(),
    )
    .unwrap();

    let sent = pending.stage(&source).unwrap();
    let left_behind = pending.stage(&extra).unwrap();
    let draft: AttachmentDraft = sent.clone().into();

    let _handle = orchestrator.submit("", vec![draft]).unwrap();

    assert!(pending.is_empty());
    assert!(registry.is_registered(&sent.url));
    assert!(!registry.is_registered(&left_behind.url));
    assert_eq!(revoker.count(&left_behind.url), 1);
    assert_eq!(revoker.count(&sent.url), 0);

    let conv = store.active_conversation().unwrap();
    assert_eq!(conv.title, "part.stp");
    assert_eq!(conv.messages[0].content, "");
    assert_eq!(conv.messages[0].attachments.len(), 1);

    // deleting the conversation releases the sent handle exactly once
    orchestrator.cancel();
    assert!(store.delete_conversation(&conv.id));
    assert!(!store.delete_conversation(&conv.id));
    assert_eq!(revoker.count(&sent.url), 1);
}
