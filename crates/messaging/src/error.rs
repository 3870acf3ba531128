use parley_storage::StorageError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum MessagingError {
    #[snafu(display("message store failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
}

impl MessagingError {
    /// True when the store refused the caller's input; the store itself is fine.
    pub fn is_rejected_input(&self) -> bool {
        match self {
            MessagingError::Storage { source, .. } => source.is_rejected_input(),
        }
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;
