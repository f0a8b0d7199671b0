/// Conversation controller.
///
/// Owns the chat history list, the active conversation, the message list and
/// the draft. The send pipeline is optimistic: the user message lands in
/// `messages` before any network round trip, so the UI never appears to eat
/// input under a slow network. Selection responses are applied in
/// last-request-wins order — a stale fetch never overwrites a later one.
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::api::{Api, ApiError, ConversationSummary, Message, SendReply, Sender};
use crate::app::AppEvent;

// ── Clipboard collaborator ────────────────────────────────────────────────────

/// System clipboard, supplied by the embedding platform.
pub trait Clipboard: Send + Sync {
    fn set_text(&self, text: &str) -> anyhow::Result<()>;
}

// ── Send request handed to the network task ───────────────────────────────────

#[derive(Debug, Clone)]
pub struct SendRequest {
    pub text: String,
    pub conversation_id: Option<String>,
}

// ── Chat state ────────────────────────────────────────────────────────────────

pub struct Chat {
    /// Past conversations, backend recency order preserved (never re-sorted).
    pub history: Vec<ConversationSummary>,
    pub is_loading_history: bool,
    pub history_error: Option<String>,
    pub search_query: String,

    /// None = the transient "unsaved new conversation" state.
    pub selected_id: Option<String>,
    pub messages: Vec<Message>,
    pub is_loading_messages: bool,
    pub messages_error: Option<String>,

    pub is_sending: bool,
    /// Not-yet-sent input text, mutable by typing or voice transcript.
    pub draft: String,
    /// Last copied message, for the transient "copied" indicator.
    pub copied_message_id: Option<String>,

    /// Bumped on every selection change; a messages response carrying an older
    /// value is stale and gets dropped.
    select_seq: u64,
    /// `select_seq` at the moment the in-flight send started.
    send_select_seq: u64,
    /// Optimistic user message to mark failed if the send is rejected.
    pending_user_id: Option<String>,
    /// Fallback history title for a brand-new conversation.
    pending_title: Option<String>,
    local_id_counter: u64,
}

impl Chat {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            is_loading_history: false,
            history_error: None,
            search_query: String::new(),
            selected_id: None,
            messages: Vec::new(),
            is_loading_messages: false,
            messages_error: None,
            is_sending: false,
            draft: String::new(),
            copied_message_id: None,
            select_seq: 0,
            send_select_seq: 0,
            pending_user_id: None,
            pending_title: None,
            local_id_counter: 0,
        }
    }

    // ── History ───────────────────────────────────────────────────────────────

    pub fn begin_load_history(&mut self) {
        self.is_loading_history = true;
        self.history_error = None;
    }

    pub fn apply_history(&mut self, result: Result<Vec<ConversationSummary>, String>) {
        self.is_loading_history = false;
        match result {
            Ok(history) => {
                self.history = history;
                self.history_error = None;
            }
            Err(e) => self.history_error = Some(e),
        }
    }

    /// Lazy view of `history` filtered by case-insensitive substring match of
    /// the search query against titles. Empty query yields the full list;
    /// relative order is always preserved.
    pub fn filtered_history(&self) -> impl Iterator<Item = &ConversationSummary> {
        let query = self.search_query.to_lowercase();
        self.history
            .iter()
            .filter(move |c| query.is_empty() || c.title.to_lowercase().contains(&query))
    }

    // ── Selection ─────────────────────────────────────────────────────────────

    /// Switch to a conversation and invalidate any in-flight fetch. Returns
    /// the sequence number the fetch task must echo back.
    pub fn begin_select(&mut self, id: &str) -> u64 {
        self.selected_id = Some(id.to_string());
        self.messages.clear();
        self.messages_error = None;
        self.is_loading_messages = true;
        self.copied_message_id = None;
        self.select_seq += 1;
        self.select_seq
    }

    pub fn apply_messages(&mut self, seq: u64, result: Result<Vec<Message>, String>) {
        if seq != self.select_seq {
            debug!("dropping stale messages response (seq {seq} != {})", self.select_seq);
            return;
        }
        self.is_loading_messages = false;
        match result {
            Ok(messages) => {
                self.messages = messages;
                self.messages_error = None;
            }
            Err(e) => {
                self.messages = Vec::new();
                self.messages_error = Some(e);
            }
        }
    }

    /// Enter the unsaved composing state. No network call; also invalidates
    /// any in-flight selection fetch.
    pub fn start_new_chat(&mut self) {
        self.selected_id = None;
        self.messages.clear();
        self.messages_error = None;
        self.is_loading_messages = false;
        self.copied_message_id = None;
        self.select_seq += 1;
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    pub fn can_send(&self, capture_active: bool) -> bool {
        !self.draft.trim().is_empty() && !self.is_sending && !capture_active
    }

    /// Optimistically append the user message and clear the draft. Returns the
    /// request for the network task, or None when sending is not allowed
    /// (blank draft, send in flight, or voice capture active).
    pub fn begin_send(&mut self, capture_active: bool) -> Option<SendRequest> {
        if !self.can_send(capture_active) {
            return None;
        }
        let text = self.draft.trim().to_string();

        self.local_id_counter += 1;
        let id = format!("local-{}", self.local_id_counter);
        self.messages.push(Message {
            id: id.clone(),
            text: text.clone(),
            sender: Sender::User,
            failed: false,
        });
        self.pending_user_id = Some(id);
        self.pending_title = Some(default_title(&text));
        self.send_select_seq = self.select_seq;
        self.is_sending = true;
        self.draft.clear();

        Some(SendRequest {
            text,
            conversation_id: self.selected_id.clone(),
        })
    }

    pub fn apply_send(&mut self, result: Result<SendReply, ApiError>) {
        self.is_sending = false;
        let pending_user_id = self.pending_user_id.take();
        let pending_title = self.pending_title.take();

        // The user switched conversations while the send was in flight; the
        // optimistic message is already gone with the old message list.
        if self.send_select_seq != self.select_seq {
            debug!("dropping send result for a superseded conversation");
            return;
        }

        match result {
            Ok(reply) => {
                self.local_id_counter += 1;
                let id = reply
                    .message_id
                    .unwrap_or_else(|| format!("local-{}", self.local_id_counter));
                self.messages.push(Message {
                    id,
                    text: reply.assistant_text,
                    sender: Sender::Assistant,
                    failed: false,
                });
                if self.selected_id.is_none() {
                    // First exchange of a new conversation: adopt the backend
                    // id and surface it at the top of history.
                    let title = reply
                        .title
                        .or(pending_title)
                        .unwrap_or_else(|| "New chat".to_string());
                    self.selected_id = Some(reply.conversation_id.clone());
                    self.history.insert(
                        0,
                        ConversationSummary {
                            id: reply.conversation_id,
                            title,
                        },
                    );
                }
            }
            Err(e) => {
                // The optimistic message is kept, not rolled back; the failure
                // is surfaced per-message.
                debug!("send failed: {e}");
                if let Some(id) = pending_user_id
                    && let Some(msg) = self.messages.iter_mut().find(|m| m.id == id)
                {
                    msg.failed = true;
                }
            }
        }
    }

    // ── Copy indicator ────────────────────────────────────────────────────────

    pub fn mark_copied(&mut self, id: &str) {
        self.copied_message_id = Some(id.to_string());
    }

    // ── Sign-out ──────────────────────────────────────────────────────────────

    pub fn reset(&mut self) {
        *self = Chat::new();
    }
}

impl Default for Chat {
    fn default() -> Self {
        Self::new()
    }
}

/// History title for a conversation the backend didn't name: the first words
/// of the opening message, capped.
fn default_title(text: &str) -> String {
    const MAX: usize = 40;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX).collect();
        format!("{}…", cut.trim_end())
    }
}

// ── Async tasks ───────────────────────────────────────────────────────────────

pub(crate) async fn load_history_task(
    api: Arc<dyn Api>,
    token: String,
    tx: UnboundedSender<AppEvent>,
) {
    let result = api
        .list_conversations(&token)
        .await
        .map_err(|e| e.to_string());
    let _ = tx.send(AppEvent::HistoryLoaded(result));
}

pub(crate) async fn fetch_messages_task(
    api: Arc<dyn Api>,
    token: String,
    conversation_id: String,
    seq: u64,
    tx: UnboundedSender<AppEvent>,
) {
    let result = api
        .fetch_messages(&token, &conversation_id)
        .await
        .map_err(|e| e.to_string());
    let _ = tx.send(AppEvent::MessagesLoaded { seq, result });
}

pub(crate) async fn send_task(
    api: Arc<dyn Api>,
    token: String,
    request: SendRequest,
    tx: UnboundedSender<AppEvent>,
) {
    let result = api
        .send_message(&token, request.conversation_id.as_deref(), &request.text)
        .await;
    let _ = tx.send(AppEvent::SendFinished(result));
}
