use std::sync::Arc;

mod backend;
mod echo;
mod rig_adapter;

pub use backend::{
    BackendConfig, BackendError, BackendResult, BoxFuture, ConversationBackend,
    ConversationSession, Turn, TurnRole,
};
pub use echo::{ECHO_PROVIDER_ID, EchoBackend};
pub use rig_adapter::{DEFAULT_OPENAI_MODEL, RIG_OPENAI_PROVIDER_ID, RigConversationBackend};

pub fn create_backend(mut config: BackendConfig) -> BackendResult<Arc<dyn ConversationBackend>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "openai" | "rig-openai" => {
            config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigConversationBackend::new(config)?))
        }
        ECHO_PROVIDER_ID => Ok(Arc::new(EchoBackend)),
        _ => Err(BackendError::UnsupportedProvider {
            stage: "create-backend",
            provider_id: config.provider_id,
        }),
    }
}
