use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;

use snafu::ResultExt;
use uuid::Uuid;

use super::error::{MalformedIdSnafu, StorageError, StorageResult};

/// Names the table an [`Id`] points into.
pub trait RecordKind {
    const NAME: &'static str;
}

#[derive(Debug)]
pub enum ChatKind {}
#[derive(Debug)]
pub enum ContactKind {}
#[derive(Debug)]
pub enum MessageKind {}

impl RecordKind for ChatKind {
    const NAME: &'static str = "chat";
}

impl RecordKind for ContactKind {
    const NAME: &'static str = "contact";
}

impl RecordKind for MessageKind {
    const NAME: &'static str = "message";
}

/// Time-ordered uuid tagged with the record it identifies, so a chat id
/// cannot be passed where a contact id is expected.
pub struct Id<K> {
    uuid: Uuid,
    kind: PhantomData<fn() -> K>,
}

pub type ChatId = Id<ChatKind>;
pub type ContactId = Id<ContactKind>;
pub type MessageId = Id<MessageKind>;

impl<K: RecordKind> Id<K> {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            kind: PhantomData,
        }
    }

    pub fn new_v7() -> Self {
        Self::new(Uuid::now_v7())
    }

    pub fn parse(raw: &str) -> StorageResult<Self> {
        let uuid = Uuid::parse_str(raw).context(MalformedIdSnafu {
            stage: "parse-record-id",
            kind: K::NAME,
            raw: raw.to_string(),
        })?;
        Ok(Self::new(uuid))
    }
}

impl<K> Id<K> {
    pub fn as_uuid(&self) -> Uuid {
        self.uuid
    }
}

// Manual impls: derives would demand the same traits from the marker type.
impl<K> Clone for Id<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Id<K> {}

impl<K> PartialEq for Id<K> {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl<K> Eq for Id<K> {}

impl<K> PartialOrd for Id<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Id<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.uuid.cmp(&other.uuid)
    }
}

impl<K> Hash for Id<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl<K: RecordKind> fmt::Debug for Id<K> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", K::NAME, self.uuid)
    }
}

impl<K> fmt::Display for Id<K> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.uuid, formatter)
    }
}

impl<K: RecordKind> From<Uuid> for Id<K> {
    fn from(uuid: Uuid) -> Self {
        Self::new(uuid)
    }
}

impl<K> From<Id<K>> for Uuid {
    fn from(id: Id<K>) -> Self {
        id.uuid
    }
}

impl<K: RecordKind> FromStr for Id<K> {
    type Err = StorageError;

    fn from_str(raw: &str) -> StorageResult<Self> {
        Self::parse(raw)
    }
}
