//! Application state built on top of the command stream and the backend:
//! observable primitives, the chats/friends requests/messages providers,
//! the signed-in session and the context that ties them together.

pub mod chats;
pub mod context;
pub mod diff;
pub mod error;
pub mod friends_requests;
pub mod messages;
pub mod observable;
pub mod users;

#[cfg(test)]
mod test_support;

pub use chats::ChatsProvider;
pub use context::{AppContext, Clock, Feedback, NoFeedback, Session, SystemClock};
pub use diff::{Changeset, Differentiable};
pub use error::ProviderError;
pub use friends_requests::FriendsRequestsProvider;
pub use messages::{MessagesDelegate, MessagesProvider};
pub use observable::{DiffObservable, Observable, Observation, Update};
pub use users::UsersService;
