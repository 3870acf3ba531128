use std::sync::Arc;

use arc_swap::ArcSwap;
use parley_storage::ChatId;

use crate::notification::NotificationGateway;

/// Which chat, if any, the user is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    Inactive,
    ActiveOn(ChatId),
}

/// Tracks the foreground chat so replies to it skip the notification shade.
///
/// Writers swap the whole state atomically; readers never block.
pub struct ChatActivationTracker {
    state: ArcSwap<ActivationState>,
    gateway: Arc<dyn NotificationGateway>,
}

impl ChatActivationTracker {
    pub fn new(gateway: Arc<dyn NotificationGateway>) -> Self {
        Self {
            state: ArcSwap::from_pointee(ActivationState::Inactive),
            gateway,
        }
    }

    pub fn state(&self) -> ActivationState {
        **self.state.load()
    }

    pub fn activate(&self, chat_id: ChatId) {
        self.state
            .store(Arc::new(ActivationState::ActiveOn(chat_id)));
        self.gateway.dismiss_notification(chat_id);
        tracing::debug!(chat_id = %chat_id, "chat activated");
    }

    /// Clears the active chat only when `chat_id` is the one currently active.
    pub fn deactivate(&self, chat_id: ChatId) {
        let previous = self.state.rcu(|current| match **current {
            ActivationState::ActiveOn(active) if active == chat_id => {
                Arc::new(ActivationState::Inactive)
            }
            _ => Arc::clone(current),
        });

        match *previous {
            ActivationState::ActiveOn(active) if active == chat_id => {
                tracing::debug!(chat_id = %chat_id, "chat deactivated");
            }
            state => {
                tracing::debug!(
                    chat_id = %chat_id,
                    state = ?state,
                    "ignoring stale deactivation"
                );
            }
        }
    }

    pub fn is_active(&self, chat_id: ChatId) -> bool {
        matches!(**self.state.load(), ActivationState::ActiveOn(active) if active == chat_id)
    }
}
