use snafu::Snafu;

/// Failures of the chat store.
///
/// `RejectedInput` and `MissingRecord` describe the caller's request; the rest
/// describe the database itself.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("{field} rejected on `{stage}`: {reason}"))]
    RejectedInput {
        stage: &'static str,
        field: &'static str,
        reason: String,
    },
    #[snafu(display("no {entity} with id {id} (`{stage}`)"))]
    MissingRecord {
        stage: &'static str,
        entity: &'static str,
        id: String,
    },
    #[snafu(display("malformed {kind} id {raw:?} on `{stage}`: {source}"))]
    MalformedId {
        stage: &'static str,
        kind: &'static str,
        raw: String,
        source: uuid::Error,
    },
    #[snafu(display("cannot create database directory {path} on `{stage}`: {source}"))]
    DatabaseDirectory {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("cannot open chat database {database_url} on `{stage}`: {source}"))]
    OpenDatabase {
        stage: &'static str,
        database_url: String,
        source: sqlx::Error,
    },
    #[snafu(display("chat schema migration failed on `{stage}`: {source}"))]
    Migrate {
        stage: &'static str,
        source: sqlx::migrate::MigrateError,
    },
    #[snafu(display("chat database query failed on `{stage}`: {source}"))]
    Query {
        stage: &'static str,
        source: sqlx::Error,
    },
}

impl StorageError {
    /// True when the request itself was refused, so retrying it unchanged
    /// cannot succeed but the store is still healthy.
    pub fn is_rejected_input(&self) -> bool {
        matches!(self, StorageError::RejectedInput { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
