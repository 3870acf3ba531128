use std::time::{SystemTime, UNIX_EPOCH};

use super::ids::{ChatId, ContactId, MessageId};

/// Who wrote a message.
///
/// The local user has no contact row; on the wire and in sqlite it is the
/// absence of a contact id (the raw sender id `0` in the client's terms).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sender {
    LocalUser,
    Contact(ContactId),
}

impl Sender {
    pub fn is_local_user(&self) -> bool {
        matches!(self, Sender::LocalUser)
    }

    pub fn contact_id(&self) -> Option<ContactId> {
        match self {
            Sender::LocalUser => None,
            Sender::Contact(contact_id) => Some(*contact_id),
        }
    }

    /// Two senders are on the same side of a conversation when both are the
    /// local user or both are contacts.
    pub fn same_side_as(&self, other: &Sender) -> bool {
        self.is_local_user() == other.is_local_user()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub uri: String,
    pub mime_type: Option<String>,
}

impl MediaAttachment {
    pub fn new(uri: impl Into<String>, mime_type: Option<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRecord {
    pub id: ContactId,
    pub name: String,
    pub icon_uri: String,
    /// Persona label used to phrase the simulated reply instruction.
    pub reply_model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub name: String,
    pub icon_uri: String,
    pub reply_model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender: Sender,
    pub text: String,
    pub media: Option<MediaAttachment>,
    pub timestamp_ms: i64,
}

impl MessageRecord {
    pub fn is_incoming(&self) -> bool {
        !self.sender.is_local_user()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender: Sender,
    pub text: String,
    pub media: Option<MediaAttachment>,
    pub timestamp_ms: i64,
}

impl NewMessage {
    pub fn text(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
            media: None,
            timestamp_ms: now_millis(),
        }
    }

    pub fn with_media(mut self, media: Option<MediaAttachment>) -> Self {
        self.media = media;
        self
    }

    pub fn at(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatDetail {
    pub chat_id: ChatId,
    pub first_contact: ContactRecord,
    pub last_message: Option<MessageRecord>,
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_millis() as i64)
}
