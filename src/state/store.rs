//! Reactive application store
//!
//! Holds the canonical [`Snapshot`] of the client: conversations, the active
//! selection, the streaming flag and UI settings. State only changes through
//! the mutation methods on [`Store`]; each one applies its change under the
//! state lock, re-sorts conversations by recent activity, releases the lock
//! and then hands every observer a fresh snapshot in subscription order.

use crate::state::attachments::AttachmentRegistry;
use crate::state::models::{
    Attachment, Conversation, DimensionMode, Message, MessageMeta, MessageRole, NewMessage,
    Snapshot, Theme,
};
use crate::util::{self, lock};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// Callback invoked with every new snapshot
pub type Observer = Arc<dyn Fn(Arc<Snapshot>) + Send + Sync>;

struct Shared {
    state: Mutex<Snapshot>,
    observers: Mutex<Vec<(u64, Observer)>>,
    next_observer_id: AtomicU64,
    attachments: Arc<AttachmentRegistry>,
    default_model: String,
}

/// Handle to the application store
///
/// Cloning is cheap; all clones share the same state and observers.
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
}

/// Token returned by [`Store::subscribe`]
///
/// Dropping the token keeps the observer registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Stop delivering snapshots to the observer
    pub fn unsubscribe(self) {
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.observers).retain(|(id, _)| *id != self.id);
        }
    }
}

impl Store {
    /// Create an empty store
    ///
    /// # Arguments
    /// * `default_model` - Model id given to new conversations
    /// * `attachments` - Registry that owns attachment handle revocation
    pub fn new(default_model: impl Into<String>, attachments: Arc<AttachmentRegistry>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(Snapshot::default()),
                observers: Mutex::new(Vec::new()),
                next_observer_id: AtomicU64::new(0),
                attachments,
                default_model: default_model.into(),
            }),
        }
    }

    /// Seed one empty conversation if there is none, then notify
    pub fn init(&self) {
        let model = self.shared.default_model.clone();
        self.apply(|state| {
            if state.conversations.is_empty() {
                let conv = Conversation::new(model);
                state.active_conversation_id = Some(conv.id.clone());
                state.conversations.push(conv);
            }
            (true, ())
        });
    }

    /// Register an observer
    ///
    /// The observer is called immediately with the current snapshot, then
    /// after every mutation until the returned token is used to unsubscribe.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(Arc<Snapshot>) + Send + Sync + 'static,
    {
        let id = self.shared.next_observer_id.fetch_add(1, Ordering::Relaxed);
        let observer: Observer = Arc::new(observer);
        lock(&self.shared.observers).push((id, observer.clone()));
        observer(Arc::new(self.get_state()));
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Independent copy of the current state
    pub fn get_state(&self) -> Snapshot {
        lock(&self.shared.state).clone()
    }

    /// Copy of the active conversation, if any
    pub fn active_conversation(&self) -> Option<Conversation> {
        lock(&self.shared.state).active_conversation().cloned()
    }

    /// Whether a run is currently in flight
    pub fn is_streaming(&self) -> bool {
        lock(&self.shared.state).is_streaming
    }

    /// Registry that tracks this store's attachment handles
    pub fn attachments(&self) -> &Arc<AttachmentRegistry> {
        &self.shared.attachments
    }

    /// Set the streaming flag; no notification when unchanged
    pub fn set_streaming(&self, is_streaming: bool) {
        self.apply(|state| {
            let changed = state.is_streaming != is_streaming;
            state.is_streaming = is_streaming;
            (changed, ())
        });
    }

    /// Set the dimension mode; no notification when unchanged
    pub fn set_dimension_mode(&self, mode: DimensionMode) {
        self.apply(|state| {
            let changed = state.dimension_mode != mode;
            state.dimension_mode = mode;
            (changed, ())
        });
    }

    /// Switch between dark and light theme
    pub fn toggle_theme(&self) {
        self.apply(|state| {
            state.theme = state.theme.toggled();
            (true, ())
        });
    }

    /// Set the theme; no notification when unchanged
    pub fn set_theme(&self, theme: Theme) {
        self.apply(|state| {
            let changed = state.theme != theme;
            state.theme = theme;
            (changed, ())
        });
    }

    /// Create a new empty conversation and make it active
    pub fn create_conversation(&self) -> Conversation {
        let model = self.shared.default_model.clone();
        self.apply(|state| (true, insert_new_conversation(state, model)))
    }

    /// Make an existing conversation active
    ///
    /// Returns false (and does nothing) if it is already active or unknown.
    pub fn set_active_conversation(&self, conversation_id: &str) -> bool {
        self.apply(|state| {
            if state.active_conversation_id.as_deref() == Some(conversation_id)
                || state.conversation(conversation_id).is_none()
            {
                return (false, false);
            }
            state.active_conversation_id = Some(conversation_id.to_string());
            (true, true)
        })
    }

    /// Delete a conversation and release its attachment handles
    ///
    /// If it was active, the conversation now at its former list position
    /// becomes active (else the previous one, else the first, else none) and
    /// the streaming flag is cleared.
    pub fn delete_conversation(&self, conversation_id: &str) -> bool {
        let registry = self.shared.attachments.clone();
        self.apply(|state| {
            let Some(idx) = state
                .conversations
                .iter()
                .position(|c| c.id == conversation_id)
            else {
                return (false, false);
            };
            let removed = state.conversations.remove(idx);
            registry.release_all(&removed);

            if state.active_conversation_id.as_deref() == Some(removed.id.as_str()) {
                state.is_streaming = false;
                let remaining = &state.conversations;
                let fallback = remaining
                    .get(idx)
                    .or_else(|| idx.checked_sub(1).and_then(|i| remaining.get(i)))
                    .or_else(|| remaining.first())
                    .map(|c| c.id.clone());
                state.active_conversation_id = fallback;
            }
            debug!(conversation_id = %conversation_id, "Conversation deleted");
            (true, true)
        })
    }

    /// Change the active conversation's model
    ///
    /// No-op without an active conversation or when the model is unchanged.
    pub fn set_conversation_model(&self, model: &str) -> bool {
        self.apply(|state| {
            let Some(conv) = active_mut(state) else {
                return (false, false);
            };
            if conv.model == model {
                return (false, false);
            }
            conv.model = model.to_string();
            conv.updated_at = Some(util::now());
            (true, true)
        })
    }

    /// Rename a conversation; blank titles are ignored
    pub fn rename_conversation(&self, conversation_id: &str, title: &str) -> bool {
        let title = util::single_line(title.trim());
        self.apply(|state| {
            match state
                .conversations
                .iter_mut()
                .find(|c| c.id == conversation_id)
            {
                Some(conv) if !title.is_empty() && conv.title != title => {
                    conv.title = title;
                    (true, true)
                }
                _ => (false, false),
            }
        })
    }

    /// Append a message to the active conversation
    ///
    /// Creates a conversation first if none is active. See
    /// [`Store::append_message_to`] for the acceptance rules.
    pub fn append_message(&self, message: NewMessage) -> Option<Message> {
        self.append_inner(None, message)
    }

    /// Append a message to a specific conversation
    ///
    /// User messages are trimmed and rejected (returning `None` without any
    /// mutation) when both text and attachments are empty or when the
    /// conversation has ended. Assistant messages are accepted as long as the
    /// conversation exists.
    pub fn append_message_to(&self, conversation_id: &str, message: NewMessage) -> Option<Message> {
        self.append_inner(Some(conversation_id), message)
    }

    fn append_inner(&self, target: Option<&str>, message: NewMessage) -> Option<Message> {
        let is_user = message.role == MessageRole::User;
        let content = if is_user {
            message.content.trim().to_string()
        } else {
            message.content.trim_end().to_string()
        };
        let attachments: Vec<Attachment> = message
            .attachments
            .into_iter()
            .map(Attachment::normalize)
            .collect();
        if is_user && content.is_empty() && attachments.is_empty() {
            return None;
        }

        let model = self.shared.default_model.clone();
        let registry = self.shared.attachments.clone();
        let role = message.role;
        let meta = message.meta.filter(|m| !m.is_empty());

        self.apply(move |state| {
            let conv_id = match target {
                Some(id) => match state.conversation(id) {
                    Some(conv) => conv.id.clone(),
                    None => return (false, None),
                },
                None => match state.active_conversation() {
                    Some(conv) => conv.id.clone(),
                    None => {
                        if is_user {
                            insert_new_conversation(state, model).id
                        } else {
                            return (false, None);
                        }
                    }
                },
            };
            let Some(conv) = state.conversations.iter_mut().find(|c| c.id == conv_id) else {
                return (false, None);
            };
            if is_user && conv.ended {
                return (false, None);
            }

            let ts = util::now();
            for a in &attachments {
                registry.register(&a.url);
            }
            if is_user && conv.has_default_title() {
                let source = if content.is_empty() {
                    attachments.first().map(|a| a.name.as_str()).unwrap_or_default()
                } else {
                    content.as_str()
                };
                if !source.is_empty() {
                    conv.title = util::title_preview(source);
                }
            }
            let msg = Message {
                id: util::generate_id("msg"),
                role,
                content,
                attachments,
                meta,
                created_at: ts,
                updated_at: Some(ts),
                streaming: false,
            };
            conv.messages.push(msg.clone());
            conv.updated_at = Some(ts);
            (true, Some(msg))
        })
    }

    /// Merge annotations into a message's meta bag
    ///
    /// Keys in `patch` overwrite existing keys, except that an object value
    /// merged onto an existing object value is merged one level deep. An
    /// empty result clears the bag.
    pub fn patch_message_meta(&self, message_id: &str, patch: MessageMeta) -> bool {
        self.apply(|state| {
            let Some((ci, mi)) = locate_message(state, message_id) else {
                return (false, false);
            };
            let conv = &mut state.conversations[ci];
            let msg = &mut conv.messages[mi];
            let mut base = msg.meta.take().unwrap_or_default();
            for (key, value) in patch {
                match value {
                    Value::Object(incoming) if base.get(&key).is_some_and(Value::is_object) => {
                        if let Some(Value::Object(existing)) = base.get_mut(&key) {
                            existing.extend(incoming);
                        }
                    }
                    value => {
                        base.insert(key, value);
                    }
                }
            }
            msg.meta = if base.is_empty() { None } else { Some(base) };
            let ts = util::now();
            msg.updated_at = Some(ts);
            conv.updated_at = Some(ts);
            (true, true)
        })
    }

    /// Mark a conversation as ended
    ///
    /// Ending is one-way; ending the active conversation clears the
    /// streaming flag.
    pub fn end_conversation(&self, conversation_id: &str) -> bool {
        self.apply(|state| {
            let active = state.active_conversation_id.as_deref() == Some(conversation_id);
            match state
                .conversations
                .iter_mut()
                .find(|c| c.id == conversation_id)
            {
                Some(conv) if !conv.ended => {
                    conv.ended = true;
                    conv.updated_at = Some(util::now());
                    if active {
                        state.is_streaming = false;
                    }
                    (true, true)
                }
                _ => (false, false),
            }
        })
    }

    /// Mark the conversation containing a message as ended
    pub fn end_conversation_by_message_id(&self, message_id: &str) -> bool {
        let conv_id = {
            let state = lock(&self.shared.state);
            state
                .conversations
                .iter()
                .find(|c| c.messages.iter().any(|m| m.id == message_id))
                .map(|c| c.id.clone())
        };
        match conv_id {
            Some(id) => self.end_conversation(&id),
            None => false,
        }
    }

    /// Run one mutation and notify observers if it changed anything
    fn apply<R>(&self, f: impl FnOnce(&mut Snapshot) -> (bool, R)) -> R {
        let (snapshot, result) = {
            let mut state = lock(&self.shared.state);
            let (changed, result) = f(&mut *state);
            if !changed {
                return result;
            }
            sort_conversations(&mut state.conversations);
            (Arc::new(state.clone()), result)
        };
        self.notify(snapshot);
        result
    }

    fn notify(&self, snapshot: Arc<Snapshot>) {
        let observers: Vec<Observer> = lock(&self.shared.observers)
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        for observer in observers {
            observer(snapshot.clone());
        }
    }
}

/// Most recently active first; ties keep their current order
fn sort_conversations(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
}

fn insert_new_conversation(state: &mut Snapshot, model: String) -> Conversation {
    let conv = Conversation::new(model);
    state.conversations.insert(0, conv.clone());
    state.active_conversation_id = Some(conv.id.clone());
    conv
}

fn active_mut(state: &mut Snapshot) -> Option<&mut Conversation> {
    let id = state.active_conversation_id.clone()?;
    state.conversations.iter_mut().find(|c| c.id == id)
}

fn locate_message(state: &Snapshot, message_id: &str) -> Option<(usize, usize)> {
    state.conversations.iter().enumerate().find_map(|(ci, c)| {
        c.messages
            .iter()
            .position(|m| m.id == message_id)
            .map(|mi| (ci, mi))
    })
}
