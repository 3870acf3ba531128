//! Chat messaging core: history coalescing, simulated contact replies, and the
//! notification side effects that follow them.

pub mod activation;
pub mod coalesce;
pub mod error;
pub mod notification;
pub mod orchestrator;
pub mod repository;
pub mod scheduler;
pub mod settings;

#[cfg(test)]
mod test_support;

pub use activation::{ActivationState, ChatActivationTracker};
pub use coalesce::{coalesce, coalesce_at};
pub use error::{MessagingError, MessagingResult};
pub use notification::{LogNotificationGateway, NotificationGateway, PushReason};
pub use orchestrator::{
    DEFAULT_FALLBACK_REPLY, ReplyOrchestrator, ReplyOutcome, ReplyPolicy, ReplyPrompt,
    build_reply_prompt, persona_instruction,
};
pub use repository::{ChatEvent, ChatRepository, SendOutcome};
pub use scheduler::{ReplyScheduler, ScheduleDisposition};
pub use settings::{
    ParleySettings, ProviderSettings, ReplySettings, SettingsError, SettingsStore,
};
