use thiserror::Error;

use crate::providers::BackendError;
use crate::services::database::StoreError;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("A reply is already being generated")]
    AlreadyStreaming,

    #[error("Busy: wait for the current reply to finish or stop it")]
    Busy,

    #[error("Message is empty")]
    InvalidInput,
}
