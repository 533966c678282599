//! Shared types for the m2 chat client: stream commands, domain models and
//! backend response payloads.

pub mod api;
pub mod commands;
pub mod models;

pub use commands::{
    ActiveStatusChanged, Command, FriendsRequestChangeType, FriendsRequestsChanged, LoginCommand,
    MessageCommand, TypingCommand, VoiceMemoCommand,
};
pub use models::{Chat, FriendsRequest, FriendsRequestState, Message, MessageKind, User};
