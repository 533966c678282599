use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend returned {status} for {path}")]
    Status { path: &'static str, status: u16 },

    #[error("unexpected response from {path}: {source}")]
    Decode {
        path: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} cannot be sent as {1}")]
    WrongMethod(&'static str, &'static str),
}
