//! Assistant message texts produced by a run

/// Confirmation appended once the bridge accepted a job
pub fn submitted(job_id: &str, translated: &str) -> String {
    let body = if translated.trim().is_empty() {
        "*(no translated text returned)*".to_string()
    } else {
        translated.trim().to_string()
    };
    format!(
        "✅ Job submitted to the execution bridge (Job: {})\n\n**Translated requirement:**\n\n{}",
        job_id, body
    )
}

/// Terminal message of a successful job
pub fn succeeded(job_id: &str, download_url: &str) -> String {
    format!(
        "✅ Simulation finished (Job: {}).\n\n📦 [Download result archive]({})\n\n\
         > The archive contains the key files under `output/`; open the case in ParaView to inspect the fields.",
        job_id, download_url
    )
}

/// Terminal message of a job reported as failed
pub fn failed(job_id: &str, reason: Option<&str>) -> String {
    match reason.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reason) => format!("❌ Simulation failed (Job: {}).\n\nReason: {}", job_id, reason),
        None => format!("❌ Simulation failed (Job: {}).", job_id),
    }
}

/// Terminal message when translation or submission failed
pub fn submit_failed(error: &str) -> String {
    format!("❌ Submission or translation failed: {}", error)
}

/// Terminal message when the run was aborted before a job existed
pub fn aborted() -> String {
    "⏸️ This submission was cancelled.".to_string()
}

/// Notice appended when the user stops tracking a run
pub fn tracking_stopped() -> String {
    "⏹️ Stopped tracking this job locally. The bridge may still be computing; \
     the download link can be used later to fetch results."
        .to_string()
}

/// Progress line for a pending job
pub fn progress_detail(message: Option<&str>) -> String {
    match message.map(str::trim).filter(|m| !m.is_empty()) {
        Some(message) => format!("Running: {}", message),
        None => "Running…".to_string(),
    }
}
