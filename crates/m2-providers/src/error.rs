use m2_backend::BackendError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no user is signed in")]
    NotSignedIn,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("backend rejected {0}")]
    Rejected(&'static str),

    #[error("file error: {0}")]
    Io(#[from] std::io::Error),
}
