use serde::{Deserialize, Serialize};

// -- Users --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckUsernameResponse {
    pub username: String,
    #[serde(rename = "isAvailable")]
    pub is_available: bool,
}

// -- Chats --

/// The chat a user currently has open. `None` (or empty) when no chat is open.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetActiveChatResponse {
    #[serde(default)]
    pub active_chat: Option<String>,
}

impl GetActiveChatResponse {
    pub fn is_active_with(&self, username: &str) -> bool {
        self.active_chat.as_deref() == Some(username)
    }
}

// -- Voice memos --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMemoResponse {
    pub message_id: String,
    pub owner: String,
    pub filename: String,
}
