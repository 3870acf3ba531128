use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parley_storage::ChatId;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, Semaphore, broadcast, watch};

use crate::orchestrator::{ReplyOrchestrator, ReplyOutcome};
use crate::repository::ChatEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDisposition {
    /// A new reply worker was spawned for the chat.
    Started,
    /// A worker is already running for the chat; it will run once more after
    /// the current generation so the new message is answered.
    Coalesced,
}

#[derive(Debug, Default)]
struct ChatSlot {
    pending: bool,
}

/// Runs reply generations in the background, one at a time per chat.
///
/// Generations across chats share a bounded number of permits. Callers never
/// see results; `wait_idle` exists for shutdown and tests.
pub struct ReplyScheduler {
    runtime: Handle,
    orchestrator: Arc<ReplyOrchestrator>,
    slots: Arc<Mutex<HashMap<ChatId, ChatSlot>>>,
    permits: Arc<Semaphore>,
    in_flight: Arc<watch::Sender<usize>>,
    events: broadcast::Sender<ChatEvent>,
}

impl ReplyScheduler {
    pub fn new(
        runtime: Handle,
        orchestrator: Arc<ReplyOrchestrator>,
        events: broadcast::Sender<ChatEvent>,
    ) -> Self {
        let max_concurrent = orchestrator.policy().max_concurrent_replies.max(1);
        Self {
            runtime,
            orchestrator,
            slots: Arc::new(Mutex::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(max_concurrent)),
            in_flight: Arc::new(watch::Sender::new(0)),
            events,
        }
    }

    pub async fn schedule(&self, chat_id: ChatId) -> ScheduleDisposition {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(&chat_id) {
            slot.pending = true;
            tracing::debug!(chat_id = %chat_id, "reply already in flight; queued one follow-up");
            return ScheduleDisposition::Coalesced;
        }

        slots.insert(chat_id, ChatSlot::default());
        // Counted before the lock is released so `wait_idle` cannot observe a gap.
        self.in_flight.send_modify(|count| *count += 1);
        drop(slots);

        let worker = ChatWorker {
            chat_id,
            orchestrator: Arc::clone(&self.orchestrator),
            slots: Arc::clone(&self.slots),
            permits: Arc::clone(&self.permits),
            events: self.events.clone(),
            _in_flight: InFlightGuard(Arc::clone(&self.in_flight)),
        };
        self.runtime.spawn(worker.run());
        ScheduleDisposition::Started
    }

    /// Resolves once no reply worker is running.
    pub async fn wait_idle(&self) {
        let mut in_flight = self.in_flight.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = in_flight.wait_for(|count| *count == 0).await;
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }
}

struct InFlightGuard(Arc<watch::Sender<usize>>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.send_modify(|count| *count = count.saturating_sub(1));
    }
}

struct ChatWorker {
    chat_id: ChatId,
    orchestrator: Arc<ReplyOrchestrator>,
    slots: Arc<Mutex<HashMap<ChatId, ChatSlot>>>,
    permits: Arc<Semaphore>,
    events: broadcast::Sender<ChatEvent>,
    _in_flight: InFlightGuard,
}

impl ChatWorker {
    async fn run(self) {
        let chat_id = self.chat_id;
        loop {
            let outcome = {
                let Ok(_permit) = self.permits.acquire().await else {
                    tracing::error!(chat_id = %chat_id, "reply permits closed; dropping reply");
                    self.release_slot().await;
                    break;
                };
                // A panic in a collaborator must not leave the slot claimed,
                // or every later send would coalesce into a dead worker.
                AssertUnwindSafe(self.orchestrator.generate_reply(chat_id))
                    .catch_unwind()
                    .await
            };

            let replied = match outcome {
                Ok(ReplyOutcome::Replied {
                    message,
                    used_fallback,
                }) => Some((message.id, used_fallback)),
                Ok(_) => None,
                Err(panic) => {
                    tracing::error!(
                        chat_id = %chat_id,
                        panic = panic_message(panic.as_ref()),
                        "reply generation panicked"
                    );
                    None
                }
            };

            if let Some((message_id, used_fallback)) = replied {
                // No subscribers is fine.
                let _ = self.events.send(ChatEvent::ReplyReceived {
                    chat_id,
                    message_id,
                    used_fallback,
                });
            }

            let mut slots = self.slots.lock().await;
            match slots.get_mut(&chat_id) {
                Some(slot) if slot.pending => {
                    slot.pending = false;
                }
                _ => {
                    slots.remove(&chat_id);
                    break;
                }
            }
        }
    }

    async fn release_slot(&self) {
        self.slots.lock().await.remove(&self.chat_id);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
