use super::backend::{
    BackendResult, BoxFuture, ConversationBackend, ConversationSession, EmptyPromptSnafu, Turn,
};

pub const ECHO_PROVIDER_ID: &str = "echo";

/// Offline backend that answers every prompt with the prompt itself.
#[derive(Debug, Clone, Default)]
pub struct EchoBackend;

impl ConversationBackend for EchoBackend {
    fn id(&self) -> &str {
        ECHO_PROVIDER_ID
    }

    fn start_session(&self, history: Vec<Turn>) -> Box<dyn ConversationSession> {
        Box::new(EchoSession { history })
    }
}

struct EchoSession {
    history: Vec<Turn>,
}

impl ConversationSession for EchoSession {
    fn history(&self) -> &[Turn] {
        &self.history
    }

    fn send<'a>(&'a mut self, text: String) -> BoxFuture<'a, BackendResult<String>> {
        Box::pin(async move {
            snafu::ensure!(
                !text.trim().is_empty(),
                EmptyPromptSnafu {
                    stage: "echo-session-send"
                }
            );

            let reply = text.trim().to_string();
            self.history.push(Turn::user(text));
            self.history.push(Turn::model(reply.clone()));
            Ok(reply)
        })
    }
}
