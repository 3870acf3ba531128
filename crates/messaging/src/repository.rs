use std::sync::Arc;

use parley_llm::ConversationBackend;
use parley_storage::{
    ChatDetail, ChatId, MediaAttachment, MessageId, MessageRecord, NewMessage, Sender, Storage,
};
use snafu::ResultExt;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::activation::ChatActivationTracker;
use crate::error::{MessagingResult, StorageSnafu};
use crate::notification::{NotificationGateway, PushReason};
use crate::orchestrator::{ReplyOrchestrator, ReplyOutcome, ReplyPolicy};
use crate::scheduler::ReplyScheduler;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { message_id: MessageId },
    ChatNotFound,
}

/// Changes observers may want to re-query for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    MessageSent {
        chat_id: ChatId,
        message_id: MessageId,
    },
    ReplyReceived {
        chat_id: ChatId,
        message_id: MessageId,
        used_fallback: bool,
    },
    MessagesCleared,
}

/// Entry point for the chat screens: sending, simulated replies, and the
/// notification side effects around them.
pub struct ChatRepository {
    storage: Arc<dyn Storage>,
    gateway: Arc<dyn NotificationGateway>,
    activation: Arc<ChatActivationTracker>,
    orchestrator: Arc<ReplyOrchestrator>,
    scheduler: ReplyScheduler,
    events: broadcast::Sender<ChatEvent>,
}

impl ChatRepository {
    pub fn new(
        runtime: Handle,
        storage: Arc<dyn Storage>,
        backend: Arc<dyn ConversationBackend>,
        gateway: Arc<dyn NotificationGateway>,
        policy: ReplyPolicy,
    ) -> Self {
        gateway.set_up_channels();

        let activation = Arc::new(ChatActivationTracker::new(Arc::clone(&gateway)));
        let orchestrator = Arc::new(ReplyOrchestrator::new(
            Arc::clone(&storage),
            backend,
            Arc::clone(&gateway),
            Arc::clone(&activation),
            policy,
        ));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let scheduler = ReplyScheduler::new(runtime, Arc::clone(&orchestrator), events.clone());

        Self {
            storage,
            gateway,
            activation,
            orchestrator,
            scheduler,
            events,
        }
    }

    pub fn activation(&self) -> &Arc<ChatActivationTracker> {
        &self.activation
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub async fn chats(&self) -> MessagingResult<Vec<ChatDetail>> {
        self.storage
            .list_chat_details()
            .await
            .context(StorageSnafu { stage: "list-chats" })
    }

    pub async fn find_chat(&self, chat_id: ChatId) -> MessagingResult<Option<ChatDetail>> {
        self.storage
            .chat_detail_by_id(chat_id)
            .await
            .context(StorageSnafu { stage: "find-chat" })
    }

    pub async fn find_messages(&self, chat_id: ChatId) -> MessagingResult<Vec<MessageRecord>> {
        self.storage
            .messages_for_chat(chat_id)
            .await
            .context(StorageSnafu {
                stage: "find-messages",
            })
    }

    /// Persists the user's message, then schedules the contact's reply.
    ///
    /// Returns once the message is stored; the reply arrives later through the
    /// store, the notification gateway and [`ChatEvent::ReplyReceived`].
    pub async fn send_message(
        &self,
        chat_id: ChatId,
        text: impl Into<String>,
        media: Option<MediaAttachment>,
    ) -> MessagingResult<SendOutcome> {
        let Some(detail) = self.find_chat(chat_id).await? else {
            tracing::debug!(chat_id = %chat_id, "send to unknown chat ignored");
            return Ok(SendOutcome::ChatNotFound);
        };

        let message = self
            .storage
            .insert_message(
                chat_id,
                NewMessage::text(Sender::LocalUser, text).with_media(media),
            )
            .await
            .context(StorageSnafu {
                stage: "send-insert-message",
            })?;
        self.gateway
            .push_shortcut(&detail.first_contact, PushReason::OutgoingMessage);
        let _ = self.events.send(ChatEvent::MessageSent {
            chat_id,
            message_id: message.id,
        });

        self.scheduler.schedule(chat_id).await;
        Ok(SendOutcome::Sent {
            message_id: message.id,
        })
    }

    /// Runs one reply generation inline, bypassing the scheduler.
    pub async fn generate_reply(&self, chat_id: ChatId) -> ReplyOutcome {
        self.orchestrator.generate_reply(chat_id).await
    }

    /// Waits until every scheduled reply has been persisted.
    pub async fn wait_for_replies(&self) {
        self.scheduler.wait_idle().await;
    }

    pub async fn clear_messages(&self) -> MessagingResult<()> {
        self.storage
            .clear_all_messages()
            .await
            .context(StorageSnafu {
                stage: "clear-messages",
            })?;
        let _ = self.events.send(ChatEvent::MessagesCleared);
        Ok(())
    }

    /// Re-renders the chat's notification in place.
    pub async fn update_notification(&self, chat_id: ChatId) -> MessagingResult<()> {
        self.render_notification(chat_id, false, true).await
    }

    pub async fn show_as_bubble(&self, chat_id: ChatId) -> MessagingResult<()> {
        self.render_notification(chat_id, true, false).await
    }

    pub async fn can_bubble(&self, chat_id: ChatId) -> MessagingResult<bool> {
        let Some(detail) = self.find_chat(chat_id).await? else {
            return Ok(false);
        };
        Ok(self.gateway.can_bubble(&detail.first_contact))
    }

    pub fn activate_chat(&self, chat_id: ChatId) {
        self.activation.activate(chat_id);
    }

    pub fn deactivate_chat(&self, chat_id: ChatId) {
        self.activation.deactivate(chat_id);
    }

    async fn render_notification(
        &self,
        chat_id: ChatId,
        is_bubble: bool,
        update: bool,
    ) -> MessagingResult<()> {
        let Some(detail) = self.find_chat(chat_id).await? else {
            return Ok(());
        };
        let messages = self.find_messages(chat_id).await?;
        self.gateway
            .show_notification(&detail.first_contact, &messages, is_bubble, update);
        Ok(())
    }
}
