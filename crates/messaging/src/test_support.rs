use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use parley_llm::{
    BackendError, BackendResult, BoxFuture, ConversationBackend, ConversationSession, Turn,
};
use parley_storage::{
    ChatDetail, ChatId, ContactId, ContactRecord, MessageRecord, NewContact, SqliteStorage,
};
use parley_storage::{ChatStore, ContactStore};

use crate::notification::{NotificationGateway, PushReason};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    SetUpChannels,
    PushShortcut {
        contact_id: ContactId,
        reason: PushReason,
    },
    Show {
        contact_id: ContactId,
        message_count: usize,
        is_bubble: bool,
        update: bool,
    },
    Dismiss(ChatId),
}

#[derive(Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<GatewayCall>>,
    bubbles_allowed: bool,
    panicking_shows: AtomicUsize,
}

impl RecordingGateway {
    pub fn allowing_bubbles() -> Self {
        Self {
            bubbles_allowed: true,
            ..Self::default()
        }
    }

    /// The first `show_notification` panics instead of recording.
    pub fn panicking_on_first_show() -> Self {
        Self {
            panicking_shows: AtomicUsize::new(1),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn shows(&self) -> Vec<GatewayCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, GatewayCall::Show { .. }))
            .collect()
    }

    fn record(&self, call: GatewayCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

impl NotificationGateway for RecordingGateway {
    fn set_up_channels(&self) {
        self.record(GatewayCall::SetUpChannels);
    }

    fn push_shortcut(&self, contact: &ContactRecord, reason: PushReason) {
        self.record(GatewayCall::PushShortcut {
            contact_id: contact.id,
            reason,
        });
    }

    fn show_notification(
        &self,
        contact: &ContactRecord,
        messages: &[MessageRecord],
        is_bubble: bool,
        update: bool,
    ) {
        if self
            .panicking_shows
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            panic!("notification surface crashed");
        }
        self.record(GatewayCall::Show {
            contact_id: contact.id,
            message_count: messages.len(),
            is_bubble,
            update,
        });
    }

    fn dismiss_notification(&self, chat_id: ChatId) {
        self.record(GatewayCall::Dismiss(chat_id));
    }

    fn can_bubble(&self, _contact: &ContactRecord) -> bool {
        self.bubbles_allowed
    }
}

#[derive(Debug, Clone)]
pub enum Script {
    Reply(String),
    Fail,
    Hang,
    Delayed(Duration, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub history: Vec<Turn>,
    pub prompt: String,
}

pub struct ScriptedBackend {
    script: Script,
    submissions: Arc<Mutex<Vec<Submission>>>,
}

impl ScriptedBackend {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            submissions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new(Script::Reply(text.to_string()))
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ConversationBackend for ScriptedBackend {
    fn id(&self) -> &str {
        "scripted"
    }

    fn start_session(&self, history: Vec<Turn>) -> Box<dyn ConversationSession> {
        Box::new(ScriptedSession {
            script: self.script.clone(),
            history,
            submissions: Arc::clone(&self.submissions),
        })
    }
}

struct ScriptedSession {
    script: Script,
    history: Vec<Turn>,
    submissions: Arc<Mutex<Vec<Submission>>>,
}

impl ConversationSession for ScriptedSession {
    fn history(&self) -> &[Turn] {
        &self.history
    }

    fn send<'a>(&'a mut self, text: String) -> BoxFuture<'a, BackendResult<String>> {
        Box::pin(async move {
            self.submissions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Submission {
                    history: self.history.clone(),
                    prompt: text,
                });

            match self.script.clone() {
                Script::Reply(reply) => Ok(reply),
                Script::Fail => Err(BackendError::EmptyResponse {
                    stage: "scripted-failure",
                }),
                Script::Hang => {
                    std::future::pending::<()>().await;
                    Err(BackendError::EmptyResponse {
                        stage: "scripted-hang",
                    })
                }
                Script::Delayed(delay, reply) => {
                    tokio::time::sleep(delay).await;
                    Ok(reply)
                }
            }
        })
    }
}

pub async fn memory_storage() -> Arc<SqliteStorage> {
    Arc::new(
        SqliteStorage::open(":memory:")
            .await
            .expect("in-memory sqlite store opens"),
    )
}

pub async fn seed_chat(storage: &SqliteStorage, reply_model: &str) -> ChatDetail {
    let contact = storage
        .create_contact(NewContact {
            name: "Robin".to_string(),
            icon_uri: "contact_robin.jpg".to_string(),
            reply_model: reply_model.to_string(),
        })
        .await
        .expect("contact created");
    storage.create_chat(contact.id).await.expect("chat created")
}
