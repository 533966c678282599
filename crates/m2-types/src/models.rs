use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current wall-clock time as fractional epoch seconds.
pub fn epoch_seconds_now() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

/// A signed-in user of the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password: String,
    /// Push token registered with the backend, if the platform provided one.
    pub device_token: Option<String>,
}

impl User {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            password: password.into(),
            device_token: None,
        }
    }
}

/// Payload specific to a message variant.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Text { text: String },
    /// The audio payload lives on the backend, addressed by the message id.
    VoiceMemo,
}

/// A chat message. Identity is `id`, unique within one chat.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: i64,
    pub sender: String,
    pub receiver: String,
    /// Epoch seconds.
    pub sent_date: f64,
    /// True while the sender is still composing.
    pub is_editing: bool,
    pub did_cancel: bool,
    pub kind: MessageKind,
}

impl Message {
    pub fn text(
        id: i64,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        text: impl Into<String>,
        sent_date: f64,
    ) -> Self {
        Self {
            id,
            sender: sender.into(),
            receiver: receiver.into(),
            sent_date,
            is_editing: false,
            did_cancel: false,
            kind: MessageKind::Text { text: text.into() },
        }
    }

    pub fn voice_memo(
        id: i64,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        sent_date: f64,
    ) -> Self {
        Self {
            id,
            sender: sender.into(),
            receiver: receiver.into(),
            sent_date,
            is_editing: false,
            did_cancel: false,
            kind: MessageKind::VoiceMemo,
        }
    }

    /// Body text for text messages.
    pub fn body(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Text { text } => Some(text),
            MessageKind::VoiceMemo => None,
        }
    }

    pub fn is_voice_memo(&self) -> bool {
        matches!(self.kind, MessageKind::VoiceMemo)
    }

    /// Local file name of the audio payload for voice memos.
    pub fn voice_memo_file_name(&self) -> String {
        format!("{}.m4a", self.id)
    }

    /// Whether this message was exchanged between `a` and `b`, in either direction.
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.sender == a && self.receiver == b) || (self.sender == b && self.receiver == a)
    }
}

/// A conversation between the local user and one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    /// Id of the friends request this chat was derived from.
    pub id: i64,
    pub this_user: String,
    pub other_user: String,
    #[serde(default)]
    pub this_user_active: bool,
    #[serde(default)]
    pub other_user_active: bool,
}

impl Chat {
    pub fn new(id: i64, this_user: impl Into<String>, other_user: impl Into<String>) -> Self {
        Self {
            id,
            this_user: this_user.into(),
            other_user: other_user.into(),
            this_user_active: false,
            other_user_active: false,
        }
    }

    /// Builds a chat from a friends request, assigning roles relative to `current_user`.
    ///
    /// The backend does not track who owns which side of a chat, so the side
    /// of the request that matches the current user becomes `this_user`.
    pub fn from_request(request: &FriendsRequest, current_user: &str) -> Self {
        if request.requester == current_user {
            Self::new(request.id, &request.requester, &request.receiver)
        } else {
            Self::new(request.id, &request.receiver, &request.requester)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.this_user_active && self.other_user_active
    }

    pub fn is_participant(&self, username: &str) -> bool {
        self.this_user == username || self.other_user == username
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum FriendsRequestState {
    Unanswered = 0,
    Accepted = 1,
    Declined = 2,
}

impl TryFrom<u8> for FriendsRequestState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unanswered),
            1 => Ok(Self::Accepted),
            2 => Ok(Self::Declined),
            other => Err(format!("unknown friends request state {}", other)),
        }
    }
}

impl From<FriendsRequestState> for u8 {
    fn from(state: FriendsRequestState) -> Self {
        state as u8
    }
}

/// A friends request as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendsRequest {
    pub id: i64,
    pub requester: String,
    pub receiver: String,
    pub date_created: f64,
    pub state: FriendsRequestState,
}

impl FriendsRequest {
    /// The party of this request that is not `username`.
    pub fn counterpart(&self, username: &str) -> &str {
        if self.requester == username {
            &self.receiver
        } else {
            &self.requester
        }
    }
}
