//! Shared id, time and text helpers

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Maximum number of characters of a derived conversation title
pub const TITLE_PREVIEW_CHARS: usize = 22;

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique, prefixed identifier
///
/// Combines a process-wide counter with a random UUID fragment so ids stay
/// unique across stores and sort roughly by creation within one process.
pub fn generate_id(prefix: &str) -> String {
    let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{:x}-{}", prefix, seq, &random[..8])
}

/// Current wall-clock timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Derive a conversation title from the first message text
///
/// Keeps the first [`TITLE_PREVIEW_CHARS`] characters and appends an
/// ellipsis when the source was longer.
pub fn title_preview(source: &str) -> String {
    let mut chars = source.chars();
    let preview: String = chars.by_ref().take(TITLE_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}…", preview)
    } else {
        preview
    }
}

/// Collapse every run of CR/LF characters into a single space
pub fn single_line(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_break = false;
    for c in text.chars() {
        if c == '\r' || c == '\n' {
            if !in_break {
                out.push(' ');
                in_break = true;
            }
        } else {
            out.push(c);
            in_break = false;
        }
    }
    out
}

/// Lock a mutex, recovering the data if a previous holder panicked
///
/// Every critical section in this crate leaves its data consistent before
/// calling out, so a poisoned lock carries no torn state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
