use std::process::ExitCode;
use std::sync::Arc;

use parley_llm::{BackendError, ConversationBackend, EchoBackend, create_backend};
use parley_messaging::{
    ChatRepository, LogNotificationGateway, MessagingError, SendOutcome, SettingsStore,
};
use parley_storage::{
    ChatDetail, ChatId, ChatStore, ContactStore, MediaAttachment, MessageRecord, NewContact,
    Sender, SqliteStorage, StorageError,
};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;

mod command;

use command::{Command, HELP};

#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(display("storage failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("messaging failed on `{stage}`: {source}"))]
    Messaging {
        stage: &'static str,
        source: MessagingError,
    },
    #[snafu(display("could not build reply backend on `{stage}`: {source}"))]
    Backend {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("failed to read terminal input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("parley stopped: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), CliError> {
    let settings_store = SettingsStore::load();
    match settings_store.ensure_file() {
        Ok(true) => println!(
            "wrote default settings to {}",
            settings_store.config_path().display()
        ),
        Ok(false) => {}
        Err(error) => tracing::warn!("could not write settings template: {error}"),
    }
    let settings = settings_store.settings();

    let database_path = settings.database_path.to_string_lossy().into_owned();
    let storage = Arc::new(
        SqliteStorage::open(&database_path)
            .await
            .context(StorageSnafu {
                stage: "open-database",
            })?,
    );
    let chat = demo_chat(&storage).await?;

    let backend: Arc<dyn ConversationBackend> = match settings.to_backend_config() {
        Some(config) => create_backend(config).context(BackendSnafu {
            stage: "create-backend",
        })?,
        None => {
            tracing::warn!(
                "no api key in {:?}; replies will echo the last message",
                settings_store.config_path()
            );
            Arc::new(EchoBackend)
        }
    };
    tracing::info!(backend = backend.id(), database = %database_path, "parley ready");

    let repository = ChatRepository::new(
        Handle::current(),
        storage,
        backend,
        Arc::new(LogNotificationGateway::new(true)),
        settings.reply_policy(),
    );
    repository.activate_chat(chat.chat_id);

    println!("chatting with {}. {HELP}", chat.first_contact.name);
    let mut printed = print_new_messages(&repository, &chat, 0).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context(ReadInputSnafu {
        stage: "read-line",
    })? {
        match Command::parse(&line) {
            Command::Send { text, media } => {
                match deliver(&repository, chat.chat_id, text, media).await? {
                    Delivery::Sent => {
                        printed = print_new_messages(&repository, &chat, printed).await?;
                    }
                    Delivery::Rejected => {}
                    Delivery::ChatGone => println!("chat no longer exists"),
                }
            }
            Command::Clear => {
                repository.clear_messages().await.context(MessagingSnafu {
                    stage: "clear-messages",
                })?;
                printed = 0;
                println!("history cleared");
            }
            Command::Background => {
                repository.deactivate_chat(chat.chat_id);
                println!("chat in background; replies will notify");
            }
            Command::Foreground => {
                repository.activate_chat(chat.chat_id);
                printed = print_new_messages(&repository, &chat, printed).await?;
            }
            Command::Bubble => {
                let allowed = repository
                    .can_bubble(chat.chat_id)
                    .await
                    .context(MessagingSnafu {
                        stage: "can-bubble",
                    })?;
                if allowed {
                    repository
                        .show_as_bubble(chat.chat_id)
                        .await
                        .context(MessagingSnafu {
                            stage: "show-as-bubble",
                        })?;
                } else {
                    println!("bubbles are not allowed for this contact");
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
            Command::Empty => {}
            Command::Unknown(input) => println!("unknown command {input:?}. {HELP}"),
        }
    }

    repository.wait_for_replies().await;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    /// The store refused the input; the session carries on.
    Rejected,
    ChatGone,
}

/// Sends one typed message and waits for the reply it triggers.
async fn deliver(
    repository: &ChatRepository,
    chat_id: ChatId,
    text: String,
    media: Option<MediaAttachment>,
) -> Result<Delivery, CliError> {
    match repository.send_message(chat_id, text, media).await {
        Ok(SendOutcome::Sent { .. }) => {
            repository.wait_for_replies().await;
            Ok(Delivery::Sent)
        }
        Ok(SendOutcome::ChatNotFound) => Ok(Delivery::ChatGone),
        Err(error) if error.is_rejected_input() => {
            println!("message not sent: {error}");
            Ok(Delivery::Rejected)
        }
        Err(error) => Err(error).context(MessagingSnafu {
            stage: "send-message",
        }),
    }
}

/// Opens the first chat, seeding a contact when the database is empty.
async fn demo_chat(storage: &SqliteStorage) -> Result<ChatDetail, CliError> {
    let chats = storage.list_chat_details().await.context(StorageSnafu {
        stage: "list-chats",
    })?;
    if let Some(chat) = chats.into_iter().next() {
        return Ok(chat);
    }

    let contact = storage
        .create_contact(NewContact {
            name: "Cat".to_string(),
            icon_uri: "contact_cat.jpg".to_string(),
            reply_model: "cat".to_string(),
        })
        .await
        .context(StorageSnafu {
            stage: "seed-contact",
        })?;
    tracing::info!(contact_id = %contact.id, "seeded demo contact");
    storage.create_chat(contact.id).await.context(StorageSnafu {
        stage: "seed-chat",
    })
}

async fn print_new_messages(
    repository: &ChatRepository,
    chat: &ChatDetail,
    already_printed: usize,
) -> Result<usize, CliError> {
    let messages = repository
        .find_messages(chat.chat_id)
        .await
        .context(MessagingSnafu {
            stage: "load-messages",
        })?;
    for message in messages.iter().skip(already_printed) {
        println!("{}", render(message, chat));
    }
    Ok(messages.len().max(already_printed))
}

fn render(message: &MessageRecord, chat: &ChatDetail) -> String {
    let speaker = match message.sender {
        Sender::LocalUser => "you",
        Sender::Contact(_) => chat.first_contact.name.as_str(),
    };
    match &message.media {
        Some(media) if message.text.is_empty() => format!("{speaker}: [{}]", media.uri),
        Some(media) => format!("{speaker}: {} [{}]", message.text, media.uri),
        None => format!("{speaker}: {}", message.text),
    }
}
