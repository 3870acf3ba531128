use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use snafu::{OptionExt, ResultExt, ensure};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use super::error::{
    DatabaseDirectorySnafu, MigrateSnafu, MissingRecordSnafu, OpenDatabaseSnafu, QuerySnafu,
    RejectedInputSnafu, StorageResult,
};
use super::ids::{ChatId, ContactId, MessageId};
use super::types::{
    ChatDetail, ContactRecord, MediaAttachment, MessageRecord, NewContact, NewMessage, Sender,
    now_millis,
};
use super::{BoxFuture, ChatStore, ContactStore, MessageStore};

const MESSAGE_COLUMNS: &str =
    "id, chat_id, sender_contact_id, text, media_uri, media_mime_type, timestamp_ms";

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    database_url: String,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(OpenDatabaseSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        // A single long-lived connection keeps `:memory:` databases alive for the
        // lifetime of the store and serializes writers for file databases.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await
            .context(OpenDatabaseSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode = WAL;")
            .fetch_one(&pool)
            .await
            .context(OpenDatabaseSnafu {
                stage: "sqlite-open-pragma-journal-mode",
                database_url: database_url.clone(),
            })?;
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .context(OpenDatabaseSnafu {
                stage: "sqlite-open-pragma-foreign-keys",
                database_url: database_url.clone(),
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(MigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        tracing::debug!(database_url = %database_url, journal_mode = %journal_mode, "sqlite store opened");

        Ok(Self { pool, database_url })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    async fn load_contact(&self, contact_id: ContactId) -> StorageResult<Option<ContactRecord>> {
        let row = sqlx::query_as::<_, ContactRow>(
            "SELECT id, name, icon_uri, reply_model FROM contacts WHERE id = ?",
        )
        .bind(contact_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context(QuerySnafu {
            stage: "contact-get-query",
        })?;

        row.map(contact_row_to_record).transpose()
    }

    async fn load_last_message(&self, chat_id: ChatId) -> StorageResult<Option<MessageRecord>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ? ORDER BY timestamp_ms DESC, seq DESC LIMIT 1"
        ))
        .bind(chat_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context(QuerySnafu {
            stage: "chat-detail-last-message",
        })?;

        row.map(message_row_to_record).transpose()
    }

    async fn chat_row_to_detail(&self, row: ChatRow) -> StorageResult<ChatDetail> {
        let chat_id = ChatId::parse(&row.chat_id)?;
        let first_contact = contact_row_to_record(ContactRow {
            id: row.contact_id,
            name: row.name,
            icon_uri: row.icon_uri,
            reply_model: row.reply_model,
        })?;
        let last_message = self.load_last_message(chat_id).await?;

        Ok(ChatDetail {
            chat_id,
            first_contact,
            last_message,
        })
    }
}

impl ContactStore for SqliteStorage {
    fn create_contact<'a>(
        &'a self,
        input: NewContact,
    ) -> BoxFuture<'a, StorageResult<ContactRecord>> {
        Box::pin(async move {
            ensure!(
                !input.name.trim().is_empty(),
                RejectedInputSnafu {
                    stage: "contact-create-validate-name",
                    field: "contact name",
                    reason: "must not be blank".to_string(),
                }
            );

            let contact_id = ContactId::new_v7();
            sqlx::query(
                "INSERT INTO contacts (id, name, icon_uri, reply_model, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(contact_id.to_string())
            .bind(&input.name)
            .bind(&input.icon_uri)
            .bind(&input.reply_model)
            .bind(now_millis())
            .execute(&self.pool)
            .await
            .context(QuerySnafu {
                stage: "contact-create-insert",
            })?;

            Ok(ContactRecord {
                id: contact_id,
                name: input.name,
                icon_uri: input.icon_uri,
                reply_model: input.reply_model,
            })
        })
    }

    fn get_contact<'a>(
        &'a self,
        contact_id: ContactId,
    ) -> BoxFuture<'a, StorageResult<Option<ContactRecord>>> {
        Box::pin(self.load_contact(contact_id))
    }
}

impl ChatStore for SqliteStorage {
    fn create_chat<'a>(
        &'a self,
        first_contact: ContactId,
    ) -> BoxFuture<'a, StorageResult<ChatDetail>> {
        Box::pin(async move {
            let contact = self
                .load_contact(first_contact)
                .await?
                .context(MissingRecordSnafu {
                    stage: "chat-create-load-contact",
                    entity: "contact",
                    id: first_contact.to_string(),
                })?;

            let chat_id = ChatId::new_v7();
            sqlx::query("INSERT INTO chats (id, first_contact_id, created_at) VALUES (?, ?, ?)")
                .bind(chat_id.to_string())
                .bind(first_contact.to_string())
                .bind(now_millis())
                .execute(&self.pool)
                .await
                .context(QuerySnafu {
                    stage: "chat-create-insert",
                })?;

            Ok(ChatDetail {
                chat_id,
                first_contact: contact,
                last_message: None,
            })
        })
    }

    fn chat_detail_by_id<'a>(
        &'a self,
        chat_id: ChatId,
    ) -> BoxFuture<'a, StorageResult<Option<ChatDetail>>> {
        Box::pin(async move {
            let row = sqlx::query_as::<_, ChatRow>(
                "SELECT c.id AS chat_id, ct.id AS contact_id, ct.name, ct.icon_uri, ct.reply_model \
                 FROM chats c JOIN contacts ct ON ct.id = c.first_contact_id WHERE c.id = ?",
            )
            .bind(chat_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context(QuerySnafu {
                stage: "chat-detail-query",
            })?;

            match row {
                Some(row) => Ok(Some(self.chat_row_to_detail(row).await?)),
                None => Ok(None),
            }
        })
    }

    fn list_chat_details<'a>(&'a self) -> BoxFuture<'a, StorageResult<Vec<ChatDetail>>> {
        Box::pin(async move {
            let rows = sqlx::query_as::<_, ChatRow>(
                "SELECT c.id AS chat_id, ct.id AS contact_id, ct.name, ct.icon_uri, ct.reply_model \
                 FROM chats c JOIN contacts ct ON ct.id = c.first_contact_id \
                 ORDER BY COALESCE((SELECT MAX(m.timestamp_ms) FROM messages m WHERE m.chat_id = c.id), c.created_at) DESC, c.id DESC",
            )
            .fetch_all(&self.pool)
            .await
            .context(QuerySnafu {
                stage: "chat-list-query",
            })?;

            let mut details = Vec::with_capacity(rows.len());
            for row in rows {
                details.push(self.chat_row_to_detail(row).await?);
            }
            Ok(details)
        })
    }
}

impl MessageStore for SqliteStorage {
    fn insert_message<'a>(
        &'a self,
        chat_id: ChatId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageRecord>> {
        Box::pin(async move {
            // A message carries text, media, or both.
            ensure!(
                !input.text.is_empty() || input.media.is_some(),
                RejectedInputSnafu {
                    stage: "message-insert-validate-content",
                    field: "message",
                    reason: "needs text or media".to_string(),
                }
            );
            if let Some(media) = &input.media {
                validate_media_uri(&media.uri, "message-insert-validate-media")?;
            }

            let chat_exists =
                sqlx::query_scalar::<_, i64>("SELECT 1 FROM chats WHERE id = ? LIMIT 1")
                    .bind(chat_id.to_string())
                    .fetch_optional(&self.pool)
                    .await
                    .context(QuerySnafu {
                        stage: "message-insert-chat-exists",
                    })?
                    .is_some();
            if !chat_exists {
                return MissingRecordSnafu {
                    stage: "message-insert-missing-chat",
                    entity: "chat",
                    id: chat_id.to_string(),
                }
                .fail();
            }

            let message_id = MessageId::new_v7();
            sqlx::query(
                "INSERT INTO messages (id, chat_id, sender_contact_id, text, media_uri, media_mime_type, timestamp_ms) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(message_id.to_string())
            .bind(chat_id.to_string())
            .bind(input.sender.contact_id().map(|contact_id| contact_id.to_string()))
            .bind(&input.text)
            .bind(input.media.as_ref().map(|media| media.uri.clone()))
            .bind(input.media.as_ref().and_then(|media| media.mime_type.clone()))
            .bind(input.timestamp_ms)
            .execute(&self.pool)
            .await
            .context(QuerySnafu {
                stage: "message-insert-apply",
            })?;

            Ok(MessageRecord {
                id: message_id,
                chat_id,
                sender: input.sender,
                text: input.text,
                media: input.media,
                timestamp_ms: input.timestamp_ms,
            })
        })
    }

    fn messages_for_chat<'a>(
        &'a self,
        chat_id: ChatId,
    ) -> BoxFuture<'a, StorageResult<Vec<MessageRecord>>> {
        Box::pin(async move {
            let rows = sqlx::query_as::<_, MessageRow>(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ? ORDER BY timestamp_ms ASC, seq ASC"
            ))
            .bind(chat_id.to_string())
            .fetch_all(&self.pool)
            .await
            .context(QuerySnafu {
                stage: "message-list-query",
            })?;

            rows.into_iter().map(message_row_to_record).collect()
        })
    }

    fn clear_all_messages<'a>(&'a self) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM messages")
                .execute(&self.pool)
                .await
                .context(QuerySnafu {
                    stage: "message-clear-all",
                })?;

            tracing::info!(deleted = result.rows_affected(), "cleared all messages");
            Ok(())
        })
    }
}

#[derive(Debug, FromRow)]
struct ContactRow {
    id: String,
    name: String,
    icon_uri: String,
    reply_model: String,
}

#[derive(Debug, FromRow)]
struct ChatRow {
    chat_id: String,
    contact_id: String,
    name: String,
    icon_uri: String,
    reply_model: String,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    chat_id: String,
    sender_contact_id: Option<String>,
    text: String,
    media_uri: Option<String>,
    media_mime_type: Option<String>,
    timestamp_ms: i64,
}

fn contact_row_to_record(row: ContactRow) -> StorageResult<ContactRecord> {
    Ok(ContactRecord {
        id: ContactId::parse(&row.id)?,
        name: row.name,
        icon_uri: row.icon_uri,
        reply_model: row.reply_model,
    })
}

fn message_row_to_record(row: MessageRow) -> StorageResult<MessageRecord> {
    let sender = match row.sender_contact_id.as_deref() {
        None => Sender::LocalUser,
        Some(raw) => Sender::Contact(ContactId::parse(raw)?),
    };

    Ok(MessageRecord {
        id: MessageId::parse(&row.id)?,
        chat_id: ChatId::parse(&row.chat_id)?,
        sender,
        text: row.text,
        media: row.media_uri.map(|uri| MediaAttachment {
            uri,
            mime_type: row.media_mime_type,
        }),
        timestamp_ms: row.timestamp_ms,
    })
}

fn validate_media_uri(uri: &str, stage: &'static str) -> StorageResult<()> {
    ensure!(
        !uri.trim().is_empty(),
        RejectedInputSnafu {
            stage,
            field: "media uri",
            reason: "must not be blank".to_string(),
        }
    );

    let uri_lower = uri.to_ascii_lowercase();
    let is_blob_like = uri_lower.starts_with("data:") || uri_lower.contains(";base64,");
    if is_blob_like {
        return RejectedInputSnafu {
            stage,
            field: "media uri",
            reason: "inline data is not stored; attach a uri or path".to_string(),
        }
        .fail();
    }

    Ok(())
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(DatabaseDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageError;

    async fn open_memory() -> SqliteStorage {
        SqliteStorage::open(":memory:")
            .await
            .expect("in-memory sqlite store opens")
    }

    async fn seed_chat(storage: &SqliteStorage, reply_model: &str) -> ChatDetail {
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

    #[tokio::test]
    async fn messages_come_back_in_timestamp_order_with_sender_and_media() {
        let storage = open_memory().await;
        let chat = seed_chat(&storage, "cat").await;
        let contact = Sender::Contact(chat.first_contact.id);

        storage
            .insert_message(chat.chat_id, NewMessage::text(contact, "second").at(20))
            .await
            .expect("insert second");
        storage
            .insert_message(
                chat.chat_id,
                NewMessage::text(Sender::LocalUser, "")
                    .with_media(Some(MediaAttachment::new(
                        "content://media/1",
                        Some("image/jpeg".to_string()),
                    )))
                    .at(10),
            )
            .await
            .expect("insert media-only");
        storage
            .insert_message(chat.chat_id, NewMessage::text(Sender::LocalUser, "third").at(20))
            .await
            .expect("insert tie");

        let messages = storage
            .messages_for_chat(chat.chat_id)
            .await
            .expect("list messages");
        let texts = messages
            .iter()
            .map(|message| message.text.as_str())
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["", "second", "third"]);
        assert_eq!(messages[0].sender, Sender::LocalUser);
        assert_eq!(
            messages[0].media.as_ref().map(|media| media.uri.as_str()),
            Some("content://media/1")
        );
        assert_eq!(messages[1].sender, contact);
        assert!(messages[1].is_incoming());
    }

    #[tokio::test]
    async fn chat_detail_carries_first_contact_and_last_message() {
        let storage = open_memory().await;
        let chat = seed_chat(&storage, "dog").await;

        let empty = storage
            .chat_detail_by_id(chat.chat_id)
            .await
            .expect("detail query")
            .expect("chat exists");
        assert_eq!(empty.first_contact.reply_model, "dog");
        assert!(empty.last_message.is_none());

        storage
            .insert_message(chat.chat_id, NewMessage::text(Sender::LocalUser, "hello").at(5))
            .await
            .expect("insert");
        let detail = storage
            .chat_detail_by_id(chat.chat_id)
            .await
            .expect("detail query")
            .expect("chat exists");
        assert_eq!(
            detail.last_message.map(|message| message.text),
            Some("hello".to_string())
        );

        let missing = storage
            .chat_detail_by_id(ChatId::new_v7())
            .await
            .expect("detail query");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn list_orders_by_latest_activity() {
        let storage = open_memory().await;
        let quiet = seed_chat(&storage, "cat").await;
        let busy = seed_chat(&storage, "parrot").await;

        storage
            .insert_message(quiet.chat_id, NewMessage::text(Sender::LocalUser, "old").at(1))
            .await
            .expect("insert old");
        storage
            .insert_message(
                busy.chat_id,
                NewMessage::text(Sender::LocalUser, "new").at(now_millis() + 60_000),
            )
            .await
            .expect("insert new");

        let chats = storage.list_chat_details().await.expect("list chats");
        let ids = chats.iter().map(|chat| chat.chat_id).collect::<Vec<_>>();
        assert_eq!(ids.first(), Some(&busy.chat_id));
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn insert_rejects_messages_without_content_or_with_blob_media() {
        let storage = open_memory().await;
        let chat = seed_chat(&storage, "cat").await;

        let empty = storage
            .insert_message(chat.chat_id, NewMessage::text(Sender::LocalUser, ""))
            .await
            .expect_err("empty message rejected");
        assert!(matches!(
            empty,
            StorageError::RejectedInput {
                field: "message",
                ..
            }
        ));
        assert!(empty.is_rejected_input());

        let blob = storage
            .insert_message(
                chat.chat_id,
                NewMessage::text(Sender::LocalUser, "look").with_media(Some(
                    MediaAttachment::new("data:image/png;base64,AAAA", None),
                )),
            )
            .await
            .expect_err("blob media rejected");
        assert!(matches!(
            blob,
            StorageError::RejectedInput {
                field: "media uri",
                ..
            }
        ));

        let messages = storage
            .messages_for_chat(chat.chat_id)
            .await
            .expect("list messages");
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn insert_into_unknown_chat_is_not_found() {
        let storage = open_memory().await;
        let error = storage
            .insert_message(ChatId::new_v7(), NewMessage::text(Sender::LocalUser, "hi"))
            .await
            .expect_err("unknown chat");
        assert!(matches!(error, StorageError::MissingRecord { entity: "chat", .. }));
    }

    #[tokio::test]
    async fn clear_all_messages_empties_every_chat() {
        let storage = open_memory().await;
        let first = seed_chat(&storage, "cat").await;
        let second = seed_chat(&storage, "dog").await;
        for chat in [&first, &second] {
            storage
                .insert_message(chat.chat_id, NewMessage::text(Sender::LocalUser, "hi"))
                .await
                .expect("insert");
        }

        storage.clear_all_messages().await.expect("clear");

        for chat in [&first, &second] {
            let messages = storage
                .messages_for_chat(chat.chat_id)
                .await
                .expect("list messages");
            assert!(messages.is_empty());
        }
        assert!(
            storage
                .chat_detail_by_id(first.chat_id)
                .await
                .expect("detail")
                .is_some()
        );
    }
}
