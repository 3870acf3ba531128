use std::sync::Arc;
use std::time::Duration;

use parley_llm::{BackendError, BackendResult, ConversationBackend, Turn};
use parley_storage::{ChatId, MessageRecord, NewMessage, Sender, Storage};
use snafu::ResultExt;

use crate::activation::ChatActivationTracker;
use crate::coalesce::coalesce;
use crate::error::{MessagingResult, StorageSnafu};
use crate::notification::{NotificationGateway, PushReason};

pub const DEFAULT_FALLBACK_REPLY: &str = "GenAI failed :(";
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CONCURRENT_REPLIES: usize = 4;

/// Knobs for simulated replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyPolicy {
    pub timeout: Duration,
    pub fallback_text: String,
    /// Keep only the last N turns before the prompt. `None` sends everything.
    pub history_window: Option<usize>,
    pub max_concurrent_replies: usize,
}

impl Default for ReplyPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REPLY_TIMEOUT,
            fallback_text: DEFAULT_FALLBACK_REPLY.to_string(),
            history_window: None,
            max_concurrent_replies: DEFAULT_MAX_CONCURRENT_REPLIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Replied {
        message: MessageRecord,
        used_fallback: bool,
    },
    ChatNotFound,
    /// The store failed mid-way; the failure has been logged.
    StoreFailed,
}

/// What gets submitted to the backend for one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyPrompt {
    pub history: Vec<Turn>,
    pub prompt: Option<String>,
}

/// Whole milliseconds in `duration`, pinned at `u64::MAX`.
pub(crate) fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub fn persona_instruction(reply_model: &str) -> String {
    format!("Please respond to this chat conversation like a friendly {reply_model}.")
}

/// Splits coalesced turns into seeded history and the live prompt.
///
/// The newest turn becomes the prompt. The history opens with the persona
/// instruction as a user turn, followed by the remaining turns with roles seen
/// from the backend, which speaks for the contact.
pub fn build_reply_prompt(
    reply_model: &str,
    mut turns: Vec<MessageRecord>,
    history_window: Option<usize>,
) -> ReplyPrompt {
    let prompt = turns.pop().map(|message| message.text);

    if let Some(window) = history_window
        && turns.len() > window
    {
        turns.drain(..turns.len() - window);
    }

    let mut history = Vec::with_capacity(turns.len() + 1);
    history.push(Turn::user(persona_instruction(reply_model)));
    history.extend(turns.into_iter().map(|message| match message.sender {
        Sender::LocalUser => Turn::user(message.text),
        Sender::Contact(_) => Turn::model(message.text),
    }));

    ReplyPrompt { history, prompt }
}

pub struct ReplyOrchestrator {
    storage: Arc<dyn Storage>,
    backend: Arc<dyn ConversationBackend>,
    gateway: Arc<dyn NotificationGateway>,
    activation: Arc<ChatActivationTracker>,
    policy: ReplyPolicy,
}

impl ReplyOrchestrator {
    pub fn new(
        storage: Arc<dyn Storage>,
        backend: Arc<dyn ConversationBackend>,
        gateway: Arc<dyn NotificationGateway>,
        activation: Arc<ChatActivationTracker>,
        policy: ReplyPolicy,
    ) -> Self {
        Self {
            storage,
            backend,
            gateway,
            activation,
            policy,
        }
    }

    pub fn policy(&self) -> &ReplyPolicy {
        &self.policy
    }

    /// Produces and persists the contact's reply for `chat_id`.
    ///
    /// Backend failures turn into the fallback reply and store failures into
    /// [`ReplyOutcome::StoreFailed`]; nothing is returned as an error.
    pub async fn generate_reply(&self, chat_id: ChatId) -> ReplyOutcome {
        match self.try_generate_reply(chat_id).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(chat_id = %chat_id, error = %error, "reply generation aborted");
                ReplyOutcome::StoreFailed
            }
        }
    }

    async fn try_generate_reply(&self, chat_id: ChatId) -> MessagingResult<ReplyOutcome> {
        let Some(detail) = self
            .storage
            .chat_detail_by_id(chat_id)
            .await
            .context(StorageSnafu {
                stage: "reply-load-chat",
            })?
        else {
            tracing::debug!(chat_id = %chat_id, "chat vanished before reply; skipping");
            return Ok(ReplyOutcome::ChatNotFound);
        };
        let contact = detail.first_contact;

        let mut messages = self
            .storage
            .messages_for_chat(chat_id)
            .await
            .context(StorageSnafu {
                stage: "reply-load-history",
            })?;
        messages.retain(|message| !message.text.is_empty());
        messages.sort_by_key(|message| message.timestamp_ms);

        let prompt = build_reply_prompt(
            &contact.reply_model,
            coalesce(messages),
            self.policy.history_window,
        );

        let (text, used_fallback) = match self.ask_backend(prompt).await {
            Ok(text) => (text, false),
            Err(error) => {
                tracing::warn!(
                    chat_id = %chat_id,
                    backend = self.backend.id(),
                    error = %error,
                    "backend reply failed; using fallback text"
                );
                (self.policy.fallback_text.clone(), true)
            }
        };

        let message = self
            .storage
            .insert_message(chat_id, NewMessage::text(Sender::Contact(contact.id), text))
            .await
            .context(StorageSnafu {
                stage: "reply-insert-message",
            })?;

        self.gateway
            .push_shortcut(&contact, PushReason::IncomingMessage);

        if self.activation.is_active(chat_id) {
            tracing::debug!(chat_id = %chat_id, "chat is in the foreground; notification suppressed");
        } else {
            let messages = self
                .storage
                .messages_for_chat(chat_id)
                .await
                .context(StorageSnafu {
                    stage: "reply-load-notification-messages",
                })?;
            self.gateway
                .show_notification(&contact, &messages, false, false);
        }

        tracing::info!(
            chat_id = %chat_id,
            message_id = %message.id,
            used_fallback,
            "reply persisted"
        );
        Ok(ReplyOutcome::Replied {
            message,
            used_fallback,
        })
    }

    async fn ask_backend(&self, prompt: ReplyPrompt) -> BackendResult<String> {
        let Some(prompt_text) = prompt.prompt else {
            return Err(BackendError::EmptyPrompt {
                stage: "reply-no-text-history",
            });
        };

        let mut session = self.backend.start_session(prompt.history);
        let reply = match tokio::time::timeout(self.policy.timeout, session.send(prompt_text)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(BackendError::TimedOut {
                    stage: "reply-await-backend",
                    timeout_ms: saturating_millis(self.policy.timeout),
                });
            }
        };

        if reply.trim().is_empty() {
            return Err(BackendError::EmptyResponse {
                stage: "reply-validate-text",
            });
        }
        Ok(reply)
    }
}
