//! Messages of one open chat.
//!
//! The list is kept sorted by `sent_date` ascending. Local typing is held in
//! a single composing slot that is mirrored to the peer with `t` commands and
//! only enters the list once sent. Remote typing arrives as editing messages
//! that are updated in place and purged when the peer cancels or a newer
//! message arrives.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use bytes::Bytes;
use tracing::{debug, info, warn};

use m2_backend::{Backend, BackendExt, Endpoint};
use m2_stream::{Dispatcher, StreamSubscriber, Subscription};
use m2_types::api::{GetActiveChatResponse, GetMemoResponse};
use m2_types::commands::{ActiveStatusChanged, Command};
use m2_types::models::{Chat, Message, MessageKind};

use crate::context::{AppContext, Clock, Feedback, spawn_follow_up};
use crate::error::ProviderError;
use crate::observable::{Observable, Observation};

/// Hooks around every list mutation, for UI animation hand-off. Indices
/// refer to the ascending list.
pub trait MessagesDelegate: Send + Sync {
    fn will_append(&self, _message: &Message) {}
    fn did_append(&self, _message: &Message) {}
    fn will_update(&self, _message: &Message, _index: usize) {}
    fn did_update(&self, _message: &Message, _index: usize) {}
    fn will_remove(&self, _message: &Message, _index: usize) {}
    fn did_remove(&self, _message: &Message, _index: usize) {}
    fn did_change_active_status(&self, _username: &str) {}
}

#[derive(Clone)]
pub struct MessagesProvider {
    inner: Arc<MessagesInner>,
}

struct MessagesInner {
    chat: Mutex<Chat>,
    dispatcher: Dispatcher,
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
    feedback: Arc<dyn Feedback>,
    voice_memo_dir: PathBuf,
    state: Mutex<MessagesState>,
    reconcile: Mutex<()>,
    delegate: RwLock<Option<Weak<dyn MessagesDelegate>>>,
    changes: Observable<()>,
    presence: Observable<Chat>,
    _subscription: Subscription,
}

#[derive(Default)]
struct MessagesState {
    messages: Vec<Message>,
    composing: Option<Message>,
}

struct StreamHook(Weak<MessagesInner>);

impl StreamSubscriber for StreamHook {
    fn on_message(&self, message: &Message) {
        if let Some(inner) = self.0.upgrade() {
            inner.on_stream_message(message.clone());
        }
    }

    fn on_active_status_changed(&self, change: &ActiveStatusChanged) {
        let Some(inner) = self.0.upgrade() else { return };
        let chat = inner.chat();
        if change.requester != chat.other_user {
            return;
        }
        let whereabouts = if change.is_online { "in the chat" } else { "away" };
        debug!("{} is {} now", change.requester, whereabouts);

        // Only the weak handle crosses the lookup.
        let backend = inner.backend.clone();
        drop(inner);
        let weak = self.0.clone();
        spawn_follow_up("chat completeness check", async move {
            let (this_active, other_active) = lookup_active(backend.as_ref(), &chat).await;
            let Some(inner) = weak.upgrade() else {
                debug!("Chat with {} closed during completeness check", chat.other_user);
                return;
            };
            inner.set_active_flags(this_active, other_active);
            if let Some(delegate) = inner.delegate() {
                delegate.did_change_active_status(&chat.other_user);
            }
            inner.presence.notify(&inner.chat());
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn sort_ascending(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.sent_date.total_cmp(&b.sent_date));
}

/// Asks the backend which chat each participant has open. A failed lookup
/// counts as not active.
async fn lookup_active(backend: &dyn Backend, chat: &Chat) -> (bool, bool) {
    let (this_side, other_side) = tokio::join!(
        backend.fetch::<GetActiveChatResponse>(Endpoint::GetActiveChat {
            username: chat.this_user.clone(),
        }),
        backend.fetch::<GetActiveChatResponse>(Endpoint::GetActiveChat {
            username: chat.other_user.clone(),
        }),
    );

    let this_active = match this_side {
        Ok(resp) => resp.is_active_with(&chat.other_user),
        Err(e) => {
            warn!("Active chat lookup for {} failed: {}", chat.this_user, e);
            false
        }
    };
    let other_active = match other_side {
        Ok(resp) => resp.is_active_with(&chat.this_user),
        Err(e) => {
            warn!("Active chat lookup for {} failed: {}", chat.other_user, e);
            false
        }
    };
    (this_active, other_active)
}

impl MessagesProvider {
    pub fn new(context: &AppContext, chat: Chat) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<MessagesInner>| {
            let subscription = context.dispatcher.bind(Arc::new(StreamHook(weak.clone())));
            MessagesInner {
                chat: Mutex::new(chat),
                dispatcher: context.dispatcher.clone(),
                backend: context.backend.clone(),
                clock: context.clock.clone(),
                feedback: context.feedback.clone(),
                voice_memo_dir: context.voice_memo_dir.clone(),
                state: Mutex::new(MessagesState::default()),
                reconcile: Mutex::new(()),
                delegate: RwLock::new(None),
                changes: Observable::new(),
                presence: Observable::new(),
                _subscription: subscription,
            }
        });
        Self { inner }
    }

    pub fn chat(&self) -> Chat {
        self.inner.chat()
    }

    /// Most recent first.
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = self.messages_ascending();
        messages.reverse();
        messages
    }

    pub fn messages_ascending(&self) -> Vec<Message> {
        lock(&self.inner.state).messages.clone()
    }

    /// The message the local user is composing, if any.
    pub fn composing(&self) -> Option<Message> {
        lock(&self.inner.state).composing.clone()
    }

    /// The delegate is held weakly; keep the `Arc` alive on the caller side.
    pub fn set_delegate(&self, delegate: &Arc<dyn MessagesDelegate>) {
        *self
            .inner
            .delegate
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::downgrade(delegate));
    }

    /// Fires after every append, update and removal.
    pub fn bind<F>(&self, handler: F) -> Observation
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.inner.changes.bind(handler)
    }

    /// Fires with the refreshed chat whenever the other participant enters
    /// or leaves.
    pub fn bind_presence<F>(&self, handler: F) -> Observation
    where
        F: Fn(&Chat) + Send + Sync + 'static,
    {
        self.inner.presence.bind(handler)
    }

    /// Mirrors the local input field. Each call emits at most one typing
    /// command; clearing the text cancels the composing message.
    pub fn type_text(&self, text: &str) {
        let chat = self.chat();
        let now = self.inner.clock.now();

        let command = {
            let mut state = lock(&self.inner.state);
            match state.composing.take() {
                None if text.is_empty() => return,
                None => {
                    let mut message = Message::text(
                        state.messages.len() as i64,
                        &chat.this_user,
                        &chat.other_user,
                        text,
                        now,
                    );
                    message.is_editing = true;
                    let command = Command::typing(&message);
                    state.composing = Some(message);
                    command
                }
                Some(mut message) => {
                    message.kind = MessageKind::Text { text: text.to_string() };
                    message.sent_date = now;
                    if text.is_empty() {
                        message.did_cancel = true;
                        Command::typing(&message)
                    } else {
                        let command = Command::typing(&message);
                        state.composing = Some(message);
                        command
                    }
                }
            }
        };

        if let Some(command) = command {
            self.inner.dispatcher.send(&command);
        }
    }

    /// Finalizes `text` as a sent message, reusing the composing message's id.
    pub fn send(&self, text: &str) -> Message {
        let chat = self.chat();
        let id = {
            let mut state = lock(&self.inner.state);
            let next_id = state.messages.len() as i64;
            state.composing.take().map_or(next_id, |message| message.id)
        };
        let now = self.inner.clock.now();
        let message = Message::text(id, &chat.this_user, &chat.other_user, text, now);

        self.inner.append(message.clone());
        self.inner.feedback.impact();
        if let Some(command) = Command::message(&message) {
            self.inner.dispatcher.send(&command);
        }
        info!("Sent message {} to {}", message.id, chat.other_user);
        message
    }

    /// Appends a voice memo right away, uploads the recording, and only
    /// announces it to the peer once the upload succeeded.
    pub async fn send_voice_memo(
        &self,
        id: i64,
        recording: &Path,
    ) -> Result<Message, ProviderError> {
        let data = tokio::fs::read(recording).await?;
        let chat = self.chat();
        let now = self.inner.clock.now();
        let message = Message::voice_memo(id, &chat.this_user, &chat.other_user, now);
        let file_name = recording
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| message.voice_memo_file_name());

        self.inner.append(message.clone());
        self.inner.feedback.impact();

        self.inner
            .backend
            .upload(
                Endpoint::UploadVoiceMemo {
                    message_id: id,
                    owner: chat.this_user.clone(),
                },
                file_name,
                Bytes::from(data),
            )
            .await?;

        self.inner.dispatcher.send(&Command::voice_memo(&message));
        info!("Sent voice memo {} to {}", id, chat.other_user);
        Ok(message)
    }

    /// Fetches the audio of a received voice memo into the memo directory.
    ///
    /// Returns `None` for memos the local user recorded. Existing files are
    /// not downloaded again. The backend's record must name the sender as
    /// owner.
    pub async fn download_voice_memo(
        &self,
        message: &Message,
    ) -> Result<Option<PathBuf>, ProviderError> {
        if !message.is_voice_memo() || message.sender == self.chat().this_user {
            return Ok(None);
        }

        let path = self.inner.voice_memo_dir.join(message.voice_memo_file_name());
        if tokio::fs::try_exists(&path).await? {
            debug!("Voice memo {} already on disk", message.id);
            return Ok(Some(path));
        }

        let stored: GetMemoResponse = self
            .inner
            .backend
            .fetch(Endpoint::GetVoiceMemo {
                message_id: message.id,
            })
            .await?;
        if stored.owner != message.sender {
            warn!(
                "Voice memo {} belongs to {}, not {}",
                message.id, stored.owner, message.sender
            );
            return Err(ProviderError::Rejected("voice memo owner"));
        }

        let data = self
            .inner
            .backend
            .download(Endpoint::DownloadVoiceMemo {
                message_id: message.id,
            })
            .await?;
        tokio::fs::create_dir_all(&self.inner.voice_memo_dir).await?;
        tokio::fs::write(&path, &data).await?;
        debug!("Stored voice memo {} ({} bytes)", message.id, data.len());
        Ok(Some(path))
    }

    /// Withdraws one of the local user's voice memos from the backend and,
    /// once the backend agreed, from the list.
    pub async fn delete_voice_memo(&self, message: &Message) -> Result<bool, ProviderError> {
        let chat = self.chat();
        if !message.is_voice_memo() || message.sender != chat.this_user {
            return Err(ProviderError::Rejected("voice memo deletion"));
        }

        let deleted = self
            .inner
            .backend
            .fetch_flag(Endpoint::DeleteVoiceMemo {
                message_id: message.id,
                owner: chat.this_user.clone(),
            })
            .await?;
        if deleted {
            let index = lock(&self.inner.state)
                .messages
                .iter()
                .position(|m| m.id == message.id && m.is_voice_memo());
            if let Some(index) = index {
                self.inner.remove(index, message);
            }
            info!("Deleted voice memo {}", message.id);
        }
        Ok(deleted)
    }

    /// Marks this chat as the signed-in user's active chat and tells the peer.
    pub async fn enter_chat(&self) -> Result<bool, ProviderError> {
        self.inner.set_active(true).await
    }

    pub async fn leave_chat(&self) -> Result<bool, ProviderError> {
        self.inner.set_active(false).await
    }

    /// Asks the backend which chat each participant has open and updates the
    /// active flags. Returns whether both are in this chat.
    pub async fn check_complete(&self) -> bool {
        self.inner.check_complete().await
    }

    /// Applies an incoming message as if it had arrived on the stream.
    pub fn on_stream_message(&self, message: Message) {
        self.inner.on_stream_message(message);
    }
}

impl MessagesInner {
    fn chat(&self) -> Chat {
        lock(&self.chat).clone()
    }

    fn delegate(&self) -> Option<Arc<dyn MessagesDelegate>> {
        self.delegate
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn on_stream_message(&self, message: Message) {
        let chat = self.chat();
        if !message.is_between(&chat.this_user, &chat.other_user) {
            return;
        }

        // One delivery at a time from lookup to the last mutation. Hooks run
        // with `state` unlocked.
        let _reconciling = lock(&self.reconcile);
        let existing = lock(&self.state)
            .messages
            .iter()
            .position(|m| m.id == message.id);

        match existing {
            Some(index) if message.did_cancel => {
                self.remove(index, &message);
                self.purge_stale();
            }
            Some(index) => {
                self.feedback.impact();
                self.update(index, message);
            }
            None => {
                self.purge_stale();
                self.feedback.impact();
                self.append(message);
            }
        }
    }

    fn append(&self, message: Message) {
        let delegate = self.delegate();
        if let Some(delegate) = &delegate {
            delegate.will_append(&message);
        }
        {
            let mut state = lock(&self.state);
            state.messages.push(message.clone());
            sort_ascending(&mut state.messages);
        }
        if let Some(delegate) = &delegate {
            delegate.did_append(&message);
        }
        self.changes.signal();
    }

    fn update(&self, index: usize, message: Message) {
        let delegate = self.delegate();
        if let Some(delegate) = &delegate {
            delegate.will_update(&message, index);
        }
        {
            let mut state = lock(&self.state);
            let slot = match state.messages.get(index) {
                Some(existing) if existing.id == message.id => Some(index),
                _ => state.messages.iter().position(|m| m.id == message.id),
            };
            match slot {
                Some(slot) => {
                    state.messages[slot] = message.clone();
                    sort_ascending(&mut state.messages);
                }
                None => return,
            }
        }
        if let Some(delegate) = &delegate {
            delegate.did_update(&message, index);
        }
        self.changes.signal();
    }

    fn remove(&self, index: usize, message: &Message) {
        let delegate = self.delegate();
        if let Some(delegate) = &delegate {
            delegate.will_remove(message, index);
        }
        {
            let mut state = lock(&self.state);
            let slot = match state.messages.get(index) {
                Some(existing) if existing.id == message.id => Some(index),
                _ => state.messages.iter().position(|m| m.id == message.id),
            };
            match slot {
                Some(slot) => {
                    state.messages.remove(slot);
                }
                None => return,
            }
        }
        if let Some(delegate) = &delegate {
            delegate.did_remove(message, index);
        }
        self.changes.signal();
    }

    /// Drops remote messages left editing or cancelled.
    fn purge_stale(&self) {
        loop {
            let stale = lock(&self.state)
                .messages
                .iter()
                .enumerate()
                .find(|(_, m)| m.is_editing || m.did_cancel)
                .map(|(index, m)| (index, m.clone()));
            match stale {
                Some((index, message)) => self.remove(index, &message),
                None => break,
            }
        }
    }

    async fn set_active(&self, active: bool) -> Result<bool, ProviderError> {
        let chat = self.chat();
        let receiver = if active { chat.other_user.clone() } else { String::new() };
        let accepted = self
            .backend
            .fetch_flag(Endpoint::SetActiveChat {
                requester: chat.this_user.clone(),
                receiver,
            })
            .await?;
        if accepted {
            self.dispatcher
                .send(&Command::active_status(&chat.this_user, &chat.other_user, active));
            info!("{} chat with {}", if active { "Entered" } else { "Left" }, chat.other_user);
        }
        Ok(accepted)
    }

    async fn check_complete(&self) -> bool {
        let chat = self.chat();
        let (this_active, other_active) = lookup_active(self.backend.as_ref(), &chat).await;
        self.set_active_flags(this_active, other_active)
    }

    /// Returns whether both participants are now in the chat.
    fn set_active_flags(&self, this_active: bool, other_active: bool) -> bool {
        let mut chat = lock(&self.chat);
        chat.this_user_active = this_active;
        chat.other_user_active = other_active;
        chat.is_complete()
    }
}
