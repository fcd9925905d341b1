use relq_executor::ExecutorError;
use relq_storage::StorageError;
use relq_types::TypeError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("malformed configuration: {0}")]
    ConfigFormat(#[from] serde_json::Error),

    #[error("transaction has already ended")]
    TransactionEnded,
}

impl Error {
    /// True for errors raised while a plan was being built.
    pub fn is_planning(&self) -> bool {
        matches!(self, Error::Executor(err) if err.is_planning())
    }
}
