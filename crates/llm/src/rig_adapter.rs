use futures::StreamExt;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};

use super::backend::{
    BackendConfig, BackendError, BackendResult, BoxFuture, CompletionsFailedSnafu,
    ConversationBackend, ConversationSession, EmptyPromptSnafu, EmptyResponseSnafu,
    HttpClientSnafu, MissingApiKeySnafu, Turn, TurnRole,
};

pub const RIG_OPENAI_PROVIDER_ID: &str = "openai";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

pub struct RigConversationBackend {
    config: BackendConfig,
}

impl RigConversationBackend {
    pub fn new(config: BackendConfig) -> BackendResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-backend-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self { config })
    }

    fn build_client(config: &BackendConfig) -> BackendResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    fn to_rig_message(turn: &Turn) -> RigMessage {
        match turn.role {
            TurnRole::User => RigMessage::user(turn.text.clone()),
            TurnRole::Model => RigMessage::assistant(turn.text.clone()),
        }
    }

    fn text_fragment<R>(item: StreamedAssistantContent<R>) -> Option<String>
    where
        R: Clone + Unpin,
    {
        match item {
            StreamedAssistantContent::Text(text) => Some(text.text),
            // Reasoning is not part of the reply the contact "says".
            StreamedAssistantContent::Reasoning(_)
            | StreamedAssistantContent::ReasoningDelta { .. }
            | StreamedAssistantContent::ToolCall { .. }
            | StreamedAssistantContent::ToolCallDelta { .. }
            | StreamedAssistantContent::Final(_) => None,
        }
    }

    async fn complete(config: &BackendConfig, history: &[Turn], prompt: &str) -> BackendResult<String> {
        let client = Self::build_client(config)?;
        let model = client.completion_model(config.model.clone());

        let messages = history.iter().map(Self::to_rig_message).collect::<Vec<_>>();
        let mut builder = model
            .completion_request(RigMessage::user(prompt.to_string()))
            .messages(messages);

        if let Some(max_tokens) = config.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }

        let mut stream = builder.stream().await.context(CompletionsFailedSnafu {
            stage: "open-stream",
        })?;

        let mut reply = String::new();
        while let Some(next_item) = stream.next().await {
            match next_item {
                Ok(item) => {
                    if let Some(fragment) = Self::text_fragment(item) {
                        reply.push_str(&fragment);
                    }
                }
                Err(source) => {
                    tracing::warn!(
                        provider_id = %config.provider_id,
                        model = %config.model,
                        error = %source,
                        "provider stream emitted an error chunk"
                    );
                    return Err(BackendError::CompletionsFailed {
                        stage: "stream-chunk",
                        source,
                    });
                }
            }
        }

        let reply = reply.trim().to_string();
        ensure!(
            !reply.is_empty(),
            EmptyResponseSnafu {
                stage: "collect-stream"
            }
        );
        Ok(reply)
    }
}

impl ConversationBackend for RigConversationBackend {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn start_session(&self, history: Vec<Turn>) -> Box<dyn ConversationSession> {
        Box::new(RigConversationSession {
            config: self.config.clone(),
            history,
        })
    }
}

struct RigConversationSession {
    config: BackendConfig,
    history: Vec<Turn>,
}

impl ConversationSession for RigConversationSession {
    fn history(&self) -> &[Turn] {
        &self.history
    }

    fn send<'a>(&'a mut self, text: String) -> BoxFuture<'a, BackendResult<String>> {
        Box::pin(async move {
            ensure!(
                !text.trim().is_empty(),
                EmptyPromptSnafu {
                    stage: "rig-session-send"
                }
            );

            tracing::debug!(
                provider_id = %self.config.provider_id,
                model = %self.config.model,
                history_turns = self.history.len(),
                "submitting prompt to provider"
            );
            let reply = RigConversationBackend::complete(&self.config, &self.history, &text).await?;

            self.history.push(Turn::user(text));
            self.history.push(Turn::model(reply.clone()));
            Ok(reply)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_rejected_up_front() {
        let config = BackendConfig::new("openai", "   ", "", DEFAULT_OPENAI_MODEL);
        let error = match RigConversationBackend::new(config) {
            Ok(_) => panic!("blank api key must be rejected"),
            Err(error) => error,
        };
        assert!(matches!(error, BackendError::MissingApiKey { .. }));
    }

    #[test]
    fn session_keeps_seeded_history() {
        let config = BackendConfig::new("openai", "sk-test", "", DEFAULT_OPENAI_MODEL);
        let backend = RigConversationBackend::new(config).expect("api key present");
        let session = backend.start_session(vec![Turn::user("hi"), Turn::model("hey")]);
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[1].role, TurnRole::Model);
    }
}
