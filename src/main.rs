//! Foam Agent Client
//!
//! Line-oriented terminal front end: plain lines are submitted as simulation
//! requirements, lines starting with `/` are commands. Logs go to stderr,
//! the conversation transcript to stdout.

use foam_agent_client::config::Config;
use foam_agent_client::orchestrator::{
    DeepSeekTranslator, ExecutionBridge, HttpBridgeClient, Orchestrator, OrchestratorConfig,
};
use foam_agent_client::state::{
    AttachmentRegistry, DimensionMode, FileRevoker, MessageRole, PendingAttachments, Snapshot,
    Store,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const HELP: &str = "\
Commands:
  <text>              submit a requirement
  /attach <path>      stage a .stp or .msh file for the next submission
  /cancel             stop tracking the running job
  /new                start a new conversation
  /list               list conversations
  /switch <n>         switch to conversation n
  /delete             delete the active conversation
  /end                end the active conversation
  /theme              toggle the theme
  /dim <3D|2D_extruded>  set the dimension mode
  /health             probe the execution bridge
  /download <job_id>  download a result archive
  /quit               exit";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();
    info!("Configuration loaded: {:?}", config);

    let registry = Arc::new(AttachmentRegistry::new(Arc::new(FileRevoker)));
    let store = Store::new(config.translation.model_id.clone(), registry.clone());
    store.init();

    let staging_dir = std::env::temp_dir()
        .join("foam-agent-client")
        .join(std::process::id().to_string());
    let pending = Arc::new(PendingAttachments::new(registry, staging_dir));

    let bridge: Arc<dyn ExecutionBridge> = Arc::new(HttpBridgeClient::new(&config.bridge)?);
    let translator = Arc::new(DeepSeekTranslator::new(
        &config.translation,
        Duration::from_secs(config.bridge.timeout_secs),
    )?);
    let orchestrator = Orchestrator::new(
        store.clone(),
        translator,
        bridge.clone(),
        Some(pending.clone()),
        OrchestratorConfig::from_config(&config),
    )?;

    match bridge.health().await {
        Ok(health) => info!(ok = health.ok, project_dir = ?health.project_dir, "Bridge reachable"),
        Err(e) => warn!(error = %e, "Bridge health probe failed"),
    }

    let seen = Mutex::new(HashSet::new());
    let _transcript = store.subscribe(move |snapshot| print_new_messages(&snapshot, &seen));

    let mut progress = orchestrator.progress();
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let current = progress.borrow_and_update().clone();
            if let Some(detail) = current.detail {
                println!("  [{}] {}", current.phase.as_str(), detail);
            }
        }
    });

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, arg) = match line.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (line, ""),
        };

        match command {
            "/quit" | "/exit" => break,
            "/help" => println!("{}", HELP),
            "/attach" => match pending.stage(Path::new(arg)) {
                Ok(a) => println!("  staged {} ({} bytes)", a.name, a.size),
                Err(e) => println!("  {}", e),
            },
            "/cancel" => {
                if !orchestrator.cancel() {
                    println!("  nothing to cancel");
                }
            }
            "/new" => {
                store.create_conversation();
            }
            "/list" => print_conversations(&store.get_state()),
            "/switch" => {
                let target = arg
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| store.get_state().conversations.get(i).map(|c| c.id.clone()));
                match target {
                    Some(id) => {
                        store.set_active_conversation(&id);
                        print_conversations(&store.get_state());
                    }
                    None => println!("  no such conversation"),
                }
            }
            "/delete" => {
                if let Some(conv) = store.active_conversation() {
                    store.delete_conversation(&conv.id);
                    print_conversations(&store.get_state());
                }
            }
            "/end" => {
                if let Some(conv) = store.active_conversation() {
                    store.end_conversation(&conv.id);
                    println!("  conversation ended");
                }
            }
            "/theme" => {
                store.toggle_theme();
                println!("  theme: {:?}", store.get_state().theme);
            }
            "/dim" => {
                store.set_dimension_mode(DimensionMode::parse(arg));
                println!("  dimension mode: {:?}", store.get_state().dimension_mode);
            }
            "/health" => match bridge.health().await {
                Ok(h) => println!(
                    "  bridge ok={} project_dir={}",
                    h.ok,
                    h.project_dir.as_deref().unwrap_or("-")
                ),
                Err(e) => println!("  bridge unreachable: {}", e),
            },
            "/download" => {
                let job_id = if arg.is_empty() {
                    orchestrator.current_job_id().unwrap_or_default()
                } else {
                    arg.to_string()
                };
                match bridge.download_result(&job_id).await {
                    Ok(archive) => {
                        tokio::fs::write(&archive.filename, &archive.bytes).await?;
                        println!("  saved {} ({} bytes)", archive.filename, archive.bytes.len());
                    }
                    Err(e) => println!("  download failed: {}", e),
                }
            }
            other if other.starts_with('/') => println!("  unknown command {}", other),
            _ => {
                if orchestrator.submit(line, pending.drafts()).is_none() {
                    println!("  not submitted (empty input or conversation ended)");
                }
            }
        }
    }

    orchestrator.cancel();
    pending.clear();
    Ok(())
}

/// Print messages of the active conversation that were not printed before
fn print_new_messages(snapshot: &Snapshot, seen: &Mutex<HashSet<String>>) {
    let mut seen = seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let Some(conv) = snapshot.active_conversation() else {
        return;
    };
    for message in &conv.messages {
        if !seen.insert(message.id.clone()) {
            continue;
        }
        let who = match message.role {
            MessageRole::User => "you",
            MessageRole::Assistant => "agent",
        };
        println!("[{}] {}", who, message.content);
        for a in &message.attachments {
            println!("      📎 {} ({} bytes)", a.name, a.size);
        }
    }
}

fn print_conversations(snapshot: &Snapshot) {
    for (i, conv) in snapshot.conversations.iter().enumerate() {
        let marker = if snapshot.active_conversation_id.as_deref() == Some(conv.id.as_str()) {
            "*"
        } else {
            " "
        };
        let ended = if conv.ended { " (ended)" } else { "" };
        println!(
            "  {} {}. {} [{} messages]{}",
            marker,
            i + 1,
            conv.title,
            conv.messages.len(),
            ended
        );
    }
}
