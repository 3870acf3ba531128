use std::future::Future;
use std::pin::Pin;

pub mod error;
pub mod ids;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{ChatId, ContactId, Id, MessageId, RecordKind};
pub use sqlite::SqliteStorage;
pub use types::{
    ChatDetail, ContactRecord, MediaAttachment, MessageRecord, NewContact, NewMessage, Sender,
    now_millis,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait ContactStore: Send + Sync {
    fn create_contact<'a>(&'a self, input: NewContact)
    -> BoxFuture<'a, StorageResult<ContactRecord>>;
    fn get_contact<'a>(
        &'a self,
        contact_id: ContactId,
    ) -> BoxFuture<'a, StorageResult<Option<ContactRecord>>>;
}

pub trait ChatStore: Send + Sync {
    fn create_chat<'a>(&'a self, first_contact: ContactId)
    -> BoxFuture<'a, StorageResult<ChatDetail>>;
    fn chat_detail_by_id<'a>(
        &'a self,
        chat_id: ChatId,
    ) -> BoxFuture<'a, StorageResult<Option<ChatDetail>>>;
    /// All chats, most recently active first.
    fn list_chat_details<'a>(&'a self) -> BoxFuture<'a, StorageResult<Vec<ChatDetail>>>;
}

pub trait MessageStore: Send + Sync {
    fn insert_message<'a>(
        &'a self,
        chat_id: ChatId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageRecord>>;
    /// Messages of one chat in display order (timestamp ascending).
    fn messages_for_chat<'a>(
        &'a self,
        chat_id: ChatId,
    ) -> BoxFuture<'a, StorageResult<Vec<MessageRecord>>>;
    fn clear_all_messages<'a>(&'a self) -> BoxFuture<'a, StorageResult<()>>;
}

pub trait Storage: ContactStore + ChatStore + MessageStore {}

impl<T> Storage for T where T: ContactStore + ChatStore + MessageStore {}
