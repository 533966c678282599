//! The HTTP backend collaborator: endpoint table, the `Backend` seam the
//! providers talk to, and its reqwest implementation.

pub mod client;
pub mod endpoint;
pub mod error;

pub use client::{Backend, BackendExt, HttpBackend, VOICE_MEMO_MIME};
pub use endpoint::{Endpoint, Method};
pub use error::BackendError;
