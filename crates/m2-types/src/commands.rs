use serde::{Deserialize, Serialize};

use crate::models::{Message, MessageKind};

/// Commands exchanged over the chat stream, in either direction.
///
/// Every command is one JSON object whose `cmd` field carries the wire tag.
/// Decoding anything that is not a known tag with all of its required fields
/// fails, and the caller is expected to drop it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// A finished text message
    #[serde(rename = "message")]
    Message(MessageCommand),

    /// A keystroke-level update of a message that is still being composed
    #[serde(rename = "t")]
    Typing(TypingCommand),

    /// A voice memo whose audio has been uploaded to the backend
    #[serde(rename = "voicememo")]
    VoiceMemo(VoiceMemoCommand),

    /// Binds the connection to a user (client to server only)
    #[serde(rename = "login")]
    Login(LoginCommand),

    /// A user opened or left a chat
    #[serde(rename = "changedActive")]
    ActiveStatusChanged(ActiveStatusChanged),

    /// Something changed about the friends requests between two users
    #[serde(rename = "changedFriends")]
    FriendsRequestsChanged(FriendsRequestsChanged),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCommand {
    #[serde(rename = "messageID")]
    pub message_id: String,
    pub from_user: String,
    pub to_user: String,
    pub message: String,
    /// Epoch seconds, string encoded.
    #[serde(rename = "sentDate")]
    pub sent_date: String,
}

/// Typing updates use single-letter keys to keep per-keystroke payloads small.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingCommand {
    #[serde(rename = "i")]
    pub message_id: String,
    #[serde(rename = "f")]
    pub from_user: String,
    #[serde(rename = "t")]
    pub to_user: String,
    #[serde(rename = "m")]
    pub text: String,
    #[serde(rename = "d")]
    pub did_cancel: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceMemoCommand {
    #[serde(rename = "messageID")]
    pub message_id: String,
    pub from_user: String,
    pub to_user: String,
    #[serde(rename = "sentDate")]
    pub sent_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginCommand {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveStatusChanged {
    pub requester: String,
    pub receiver: String,
    pub is_online: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendsRequestsChanged {
    pub requester: String,
    pub receiver: String,
    #[serde(rename = "type")]
    pub change: FriendsRequestChangeType,
}

/// Why a friends request changed on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum FriendsRequestChangeType {
    Accepted = 0,
    Declined = 1,
    Sent = 2,
    Deleted = 3,
}

impl TryFrom<u8> for FriendsRequestChangeType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Accepted),
            1 => Ok(Self::Declined),
            2 => Ok(Self::Sent),
            3 => Ok(Self::Deleted),
            other => Err(format!("unknown friends request change type {}", other)),
        }
    }
}

impl From<FriendsRequestChangeType> for u8 {
    fn from(change: FriendsRequestChangeType) -> Self {
        change as u8
    }
}

/// Formats epoch seconds the way the stream carries them.
///
/// Uses the shortest representation that parses back to the same `f64`, and
/// always keeps a fractional part (`1000.0`, not `1000`).
pub fn format_timestamp(seconds: f64) -> String {
    format!("{:?}", seconds)
}

pub fn parse_timestamp(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|t| t.is_finite())
}

impl Command {
    /// The wire tag carried in the `cmd` field.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Typing(_) => "t",
            Self::VoiceMemo(_) => "voicememo",
            Self::Login(_) => "login",
            Self::ActiveStatusChanged(_) => "changedActive",
            Self::FriendsRequestsChanged(_) => "changedFriends",
        }
    }

    /// Outgoing command for a finished text message. `None` for voice memos.
    pub fn message(message: &Message) -> Option<Self> {
        let MessageKind::Text { text } = &message.kind else {
            return None;
        };
        Some(Self::Message(MessageCommand {
            message_id: message.id.to_string(),
            from_user: message.sender.clone(),
            to_user: message.receiver.clone(),
            message: text.clone(),
            sent_date: format_timestamp(message.sent_date),
        }))
    }

    /// Outgoing typing update for a message being composed. `None` for voice memos.
    pub fn typing(message: &Message) -> Option<Self> {
        let MessageKind::Text { text } = &message.kind else {
            return None;
        };
        Some(Self::Typing(TypingCommand {
            message_id: message.id.to_string(),
            from_user: message.sender.clone(),
            to_user: message.receiver.clone(),
            text: text.clone(),
            did_cancel: message.did_cancel,
        }))
    }

    pub fn voice_memo(message: &Message) -> Self {
        Self::VoiceMemo(VoiceMemoCommand {
            message_id: message.id.to_string(),
            from_user: message.sender.clone(),
            to_user: message.receiver.clone(),
            sent_date: format_timestamp(message.sent_date),
        })
    }

    pub fn login(username: impl Into<String>) -> Self {
        Self::Login(LoginCommand {
            username: username.into(),
        })
    }

    pub fn active_status(
        requester: impl Into<String>,
        receiver: impl Into<String>,
        is_online: bool,
    ) -> Self {
        Self::ActiveStatusChanged(ActiveStatusChanged {
            requester: requester.into(),
            receiver: receiver.into(),
            is_online,
        })
    }

    pub fn friends_requests_changed(
        requester: impl Into<String>,
        receiver: impl Into<String>,
        change: FriendsRequestChangeType,
    ) -> Self {
        Self::FriendsRequestsChanged(FriendsRequestsChanged {
            requester: requester.into(),
            receiver: receiver.into(),
            change,
        })
    }

    /// Serializes to the JSON bytes sent on the stream. No delimiter is appended.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}

impl MessageCommand {
    /// Converts into a finished text message. `None` if the id or timestamp do not parse.
    pub fn to_message(&self) -> Option<Message> {
        let id = self.message_id.trim().parse::<i64>().ok()?;
        let sent_date = parse_timestamp(&self.sent_date)?;
        Some(Message::text(
            id,
            &self.from_user,
            &self.to_user,
            &self.message,
            sent_date,
        ))
    }
}

impl TypingCommand {
    /// Converts into an editing text message stamped with `received_at`.
    pub fn to_message(&self, received_at: f64) -> Option<Message> {
        let id = self.message_id.trim().parse::<i64>().ok()?;
        let mut message =
            Message::text(id, &self.from_user, &self.to_user, &self.text, received_at);
        message.is_editing = true;
        message.did_cancel = self.did_cancel;
        Some(message)
    }
}

impl VoiceMemoCommand {
    pub fn to_message(&self) -> Option<Message> {
        let id = self.message_id.trim().parse::<i64>().ok()?;
        let sent_date = parse_timestamp(&self.sent_date)?;
        Some(Message::voice_memo(id, &self.from_user, &self.to_user, sent_date))
    }
}
