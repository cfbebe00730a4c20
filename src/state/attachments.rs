//! Attachment lifecycle management
//!
//! Uploaded files are copied into a staging directory; the staged path is the
//! attachment's resource handle. [`AttachmentRegistry`] is the only component
//! that revokes handles, so a handle is released at most once no matter how
//! many deletion paths reach it.

use crate::error::AppError;
use crate::state::models::{Attachment, AttachmentDraft, Conversation};
use crate::util::{self, lock};
use anyhow::anyhow;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// File extensions accepted for staging (geometry and mesh files)
pub const ACCEPTED_EXTENSIONS: &[&str] = &["stp", "msh"];

/// Releases the resource behind a handle
pub trait ResourceRevoker: Send + Sync {
    /// Release `handle`. Called at most once per registered handle.
    fn revoke(&self, handle: &str);
}

/// Revoker for handles that are staged file paths: deletes the file
#[derive(Debug, Default, Clone, Copy)]
pub struct FileRevoker;

impl ResourceRevoker for FileRevoker {
    fn revoke(&self, handle: &str) {
        match std::fs::remove_file(handle) {
            Ok(()) => debug!(handle = %handle, "Staged attachment removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(handle = %handle, error = %e, "Failed to remove staged attachment"),
        }
    }
}

/// Revoker for handles that own no local resource
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRevoker;

impl ResourceRevoker for NoopRevoker {
    fn revoke(&self, _handle: &str) {}
}

/// Process-wide registry of live attachment handles
pub struct AttachmentRegistry {
    handles: Mutex<HashSet<String>>,
    revoker: Arc<dyn ResourceRevoker>,
}

impl AttachmentRegistry {
    /// Create a registry that releases handles through `revoker`
    pub fn new(revoker: Arc<dyn ResourceRevoker>) -> Self {
        Self {
            handles: Mutex::new(HashSet::new()),
            revoker,
        }
    }

    /// Track a handle. Idempotent; empty handles are ignored.
    ///
    /// Returns true if the handle was not tracked before.
    pub fn register(&self, url: &str) -> bool {
        if url.is_empty() {
            return false;
        }
        lock(&self.handles).insert(url.to_string())
    }

    /// Revoke a handle if it is tracked. A second release is a no-op.
    ///
    /// Returns true if this call revoked the handle.
    pub fn release(&self, url: &str) -> bool {
        let removed = lock(&self.handles).remove(url);
        if removed {
            self.revoker.revoke(url);
        }
        removed
    }

    /// Release every registered handle owned by a conversation's messages
    ///
    /// Returns the number of handles revoked by this call.
    pub fn release_all(&self, conversation: &Conversation) -> usize {
        let released = conversation
            .messages
            .iter()
            .flat_map(|m| m.attachments.iter())
            .filter(|a| self.release(&a.url))
            .count();
        if released > 0 {
            debug!(
                conversation_id = %conversation.id,
                released = released,
                "Released conversation attachments"
            );
        }
        released
    }

    /// Whether a handle is currently tracked
    pub fn is_registered(&self, url: &str) -> bool {
        lock(&self.handles).contains(url)
    }

    /// Number of tracked handles
    pub fn len(&self) -> usize {
        lock(&self.handles).len()
    }

    /// Whether no handle is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AttachmentRegistry {
    fn default() -> Self {
        Self::new(Arc::new(FileRevoker))
    }
}

/// Files staged for the next submission but not yet sent
pub struct PendingAttachments {
    registry: Arc<AttachmentRegistry>,
    staging_dir: PathBuf,
    staged: Mutex<Vec<Attachment>>,
}

impl PendingAttachments {
    /// Create an empty staging area copying files into `staging_dir`
    pub fn new(registry: Arc<AttachmentRegistry>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            staging_dir: staging_dir.into(),
            staged: Mutex::new(Vec::new()),
        }
    }

    /// Stage a local file for upload
    ///
    /// Copies the file into the staging directory and registers the copy's
    /// path as the attachment handle.
    ///
    /// # Errors
    /// * `AppError::Validation` if the extension is not accepted or the path
    ///   has no file name
    /// * `AppError::Internal` if the file cannot be read or copied
    pub fn stage(&self, source: &Path) -> Result<Attachment, AppError> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::Validation(format!("not a file: {}", source.display())))?;
        let ext = source
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if !ACCEPTED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(AppError::Validation(format!(
                "only .stp and .msh files can be attached, got {}",
                name
            )));
        }

        std::fs::create_dir_all(&self.staging_dir).map_err(|e| {
            AppError::Internal(anyhow!(
                "Failed to create staging directory {}: {}",
                self.staging_dir.display(),
                e
            ))
        })?;
        let id = util::generate_id("file");
        let target = self.staging_dir.join(format!("{}-{}", id, name));
        let size = std::fs::copy(source, &target).map_err(|e| {
            AppError::Internal(anyhow!("Failed to stage {}: {}", source.display(), e))
        })?;

        let attachment = Attachment::normalize(AttachmentDraft {
            id: Some(id),
            name: Some(name),
            size: i64::try_from(size).ok(),
            mime_type: Some(mime_for_extension(&ext).to_string()),
            url: Some(target.to_string_lossy().into_owned()),
        });
        self.registry.register(&attachment.url);
        lock(&self.staged).push(attachment.clone());
        debug!(attachment_id = %attachment.id, size = size, "Attachment staged");
        Ok(attachment)
    }

    /// Remove one staged attachment and release its handle
    pub fn unstage(&self, attachment_id: &str) -> bool {
        let removed = {
            let mut staged = lock(&self.staged);
            staged
                .iter()
                .position(|a| a.id == attachment_id)
                .map(|idx| staged.remove(idx))
        };
        match removed {
            Some(a) => {
                self.registry.release(&a.url);
                true
            }
            None => false,
        }
    }

    /// Currently staged attachments, in staging order
    pub fn staged(&self) -> Vec<Attachment> {
        lock(&self.staged).clone()
    }

    /// Staged attachments as submission drafts
    pub fn drafts(&self) -> Vec<AttachmentDraft> {
        self.staged().into_iter().map(AttachmentDraft::from).collect()
    }

    /// Empty the staging area after a submission
    ///
    /// Handles that went out with the submitted message now belong to it and
    /// stay registered; anything else that was staged is released.
    pub fn settle(&self, sent: &[Attachment]) -> usize {
        let leftover: Vec<Attachment> = std::mem::take(&mut *lock(&self.staged));
        leftover
            .iter()
            .filter(|a| !sent.iter().any(|s| s.url == a.url))
            .filter(|a| self.registry.release(&a.url))
            .count()
    }

    /// Drop everything staged and release every handle
    pub fn clear(&self) -> usize {
        self.settle(&[])
    }

    /// Whether nothing is staged
    pub fn is_empty(&self) -> bool {
        lock(&self.staged).is_empty()
    }
}

fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "stp" => "model/step",
        "msh" => "model/x-gmsh",
        _ => "application/octet-stream",
    }
}
