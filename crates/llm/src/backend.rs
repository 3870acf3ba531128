use std::future::Future;
use std::pin::Pin;

use snafu::Snafu;

/// Attribution of a turn from the backend's point of view.
///
/// The backend plays the contact, so the contact's turns are `Model` and the
/// local user's turns are `User`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnRole {
    User,
    Model,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

impl Turn {
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(TurnRole::User, text)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Model, text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub max_tokens: Option<u64>,
}

impl BackendConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
            model: model.into().trim().to_string(),
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("missing API key for provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("prompt submitted on `{stage}` is empty"))]
    EmptyPrompt { stage: &'static str },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
    #[snafu(display("backend returned no text on `{stage}`"))]
    EmptyResponse { stage: &'static str },
    #[snafu(display("backend did not answer within {timeout_ms} ms"))]
    TimedOut {
        stage: &'static str,
        timeout_ms: u64,
    },
}

/// A live conversation seeded with history. Each successful `send` appends the
/// prompt and the reply to the session's own history.
pub trait ConversationSession: Send {
    fn history(&self) -> &[Turn];
    fn send<'a>(&'a mut self, text: String) -> BoxFuture<'a, BackendResult<String>>;
}

pub trait ConversationBackend: Send + Sync {
    fn id(&self) -> &str;
    fn start_session(&self, history: Vec<Turn>) -> Box<dyn ConversationSession>;
}
