use parley_storage::{ChatId, ContactRecord, MessageRecord};

/// Why a conversation shortcut is being pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushReason {
    OutgoingMessage,
    IncomingMessage,
}

impl PushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushReason::OutgoingMessage => "outgoing-message",
            PushReason::IncomingMessage => "incoming-message",
        }
    }
}

/// Platform surface for notifications and conversation shortcuts.
pub trait NotificationGateway: Send + Sync {
    fn set_up_channels(&self);
    fn push_shortcut(&self, contact: &ContactRecord, reason: PushReason);
    fn show_notification(
        &self,
        contact: &ContactRecord,
        messages: &[MessageRecord],
        is_bubble: bool,
        update: bool,
    );
    fn dismiss_notification(&self, chat_id: ChatId);
    fn can_bubble(&self, contact: &ContactRecord) -> bool;
}

/// Gateway that renders nothing and records every request in the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotificationGateway {
    bubbles_allowed: bool,
}

impl LogNotificationGateway {
    pub fn new(bubbles_allowed: bool) -> Self {
        Self { bubbles_allowed }
    }
}

impl NotificationGateway for LogNotificationGateway {
    fn set_up_channels(&self) {
        tracing::debug!("notification channels ready");
    }

    fn push_shortcut(&self, contact: &ContactRecord, reason: PushReason) {
        tracing::info!(
            contact_id = %contact.id,
            contact = %contact.name,
            reason = reason.as_str(),
            "push conversation shortcut"
        );
    }

    fn show_notification(
        &self,
        contact: &ContactRecord,
        messages: &[MessageRecord],
        is_bubble: bool,
        update: bool,
    ) {
        let preview = messages
            .last()
            .map(|message| message.text.as_str())
            .unwrap_or_default();
        tracing::info!(
            contact_id = %contact.id,
            contact = %contact.name,
            message_count = messages.len(),
            is_bubble,
            update,
            preview,
            "show chat notification"
        );
    }

    fn dismiss_notification(&self, chat_id: ChatId) {
        tracing::info!(chat_id = %chat_id, "dismiss chat notification");
    }

    fn can_bubble(&self, _contact: &ContactRecord) -> bool {
        self.bubbles_allowed
    }
}
