use m2_types::models::FriendsRequestState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// Every backend route the client calls. Paths are relative to the backend
/// base URL.
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    // -- Chats --
    GetChats { requester: String },
    SetActiveChat { requester: String, receiver: String },
    GetActiveChat { username: String },

    // -- Friends requests --
    GetFriendsRequests { requester: String },
    SendFriendsRequest { requester: String, receiver: String },
    AnswerFriendsRequest { id: i64, requester: String, state: FriendsRequestState },
    DeleteFriendsRequest { id: i64 },

    // -- Users --
    Login { username: String, password: String, device_token: Option<String> },
    Register { id: String, username: String, password: String, device_token: Option<String> },
    UpdateDeviceToken { username: String, device_token: String },
    Logout { username: String, password: String },
    CheckUsername { username: String },

    // -- Voice memos --
    GetVoiceMemo { message_id: i64 },
    DownloadVoiceMemo { message_id: i64 },
    UploadVoiceMemo { message_id: i64, owner: String },
    DeleteVoiceMemo { message_id: i64, owner: String },
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::GetChats { .. } => "get_chats.php",
            Endpoint::SetActiveChat { .. } => "set_active_chat.php",
            Endpoint::GetActiveChat { .. } => "get_active_chat.php",
            Endpoint::GetFriendsRequests { .. } => "get_friends_requests.php",
            Endpoint::SendFriendsRequest { .. } => "send_friends_request.php",
            Endpoint::AnswerFriendsRequest { .. } => "answer_friends_request.php",
            Endpoint::DeleteFriendsRequest { .. } => "delete_friends_request.php",
            Endpoint::Login { .. } => "login.php",
            Endpoint::Register { .. } => "register.php",
            Endpoint::UpdateDeviceToken { .. } => "update_device_token.php",
            Endpoint::Logout { .. } => "logout.php",
            Endpoint::CheckUsername { .. } => "check_username.php",
            Endpoint::GetVoiceMemo { .. } => "get_voice_memo.php",
            Endpoint::DownloadVoiceMemo { .. } => "download_voice_memo.php",
            Endpoint::UploadVoiceMemo { .. } => "upload_voice_memo.php",
            Endpoint::DeleteVoiceMemo { .. } => "delete_voice_memo.php",
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Endpoint::GetChats { .. }
            | Endpoint::GetActiveChat { .. }
            | Endpoint::GetFriendsRequests { .. }
            | Endpoint::Login { .. }
            | Endpoint::Logout { .. }
            | Endpoint::CheckUsername { .. }
            | Endpoint::GetVoiceMemo { .. }
            | Endpoint::DownloadVoiceMemo { .. } => Method::Get,
            _ => Method::Post,
        }
    }

    /// Voice memo routes read their parameters from the query string even
    /// when posted to.
    pub fn params_in_query(&self) -> bool {
        self.method() == Method::Get
            || matches!(
                self,
                Endpoint::UploadVoiceMemo { .. } | Endpoint::DeleteVoiceMemo { .. }
            )
    }

    pub fn params(&self) -> Vec<(&'static str, String)> {
        match self {
            Endpoint::GetChats { requester } | Endpoint::GetFriendsRequests { requester } => {
                vec![("requester", requester.clone())]
            }
            Endpoint::SetActiveChat { requester, receiver }
            | Endpoint::SendFriendsRequest { requester, receiver } => vec![
                ("requester", requester.clone()),
                ("receiver", receiver.clone()),
            ],
            Endpoint::GetActiveChat { username } | Endpoint::CheckUsername { username } => {
                vec![("username", username.clone())]
            }
            Endpoint::AnswerFriendsRequest { id, requester, state } => vec![
                ("id", id.to_string()),
                ("requester", requester.clone()),
                ("state", u8::from(*state).to_string()),
            ],
            Endpoint::DeleteFriendsRequest { id } => vec![("id", id.to_string())],
            Endpoint::Login { username, password, device_token } => vec![
                ("username", username.clone()),
                ("password", password.clone()),
                ("device_token", device_token.clone().unwrap_or_default()),
            ],
            Endpoint::Register { id, username, password, device_token } => vec![
                ("id", id.clone()),
                ("username", username.clone()),
                ("password", password.clone()),
                ("device_token", device_token.clone().unwrap_or_default()),
            ],
            Endpoint::UpdateDeviceToken { username, device_token } => vec![
                ("username", username.clone()),
                ("device_token", device_token.clone()),
            ],
            Endpoint::Logout { username, password } => vec![
                ("username", username.clone()),
                ("password", password.clone()),
            ],
            Endpoint::GetVoiceMemo { message_id } | Endpoint::DownloadVoiceMemo { message_id } => {
                vec![("message_id", message_id.to_string())]
            }
            Endpoint::UploadVoiceMemo { message_id, owner }
            | Endpoint::DeleteVoiceMemo { message_id, owner } => vec![
                ("message_id", message_id.to_string()),
                ("owner", owner.clone()),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_methods() {
        assert_eq!(Endpoint::GetChats { requester: "a".into() }.method(), Method::Get);
        assert_eq!(
            Endpoint::SetActiveChat { requester: "a".into(), receiver: "b".into() }.method(),
            Method::Post
        );
        assert_eq!(
            Endpoint::Logout { username: "a".into(), password: "p".into() }.method(),
            Method::Get
        );
        assert_eq!(Endpoint::DeleteFriendsRequest { id: 1 }.method(), Method::Post);
    }

    #[test]
    fn test_answer_params() {
        let endpoint = Endpoint::AnswerFriendsRequest {
            id: 5,
            requester: "a".into(),
            state: FriendsRequestState::Declined,
        };
        assert_eq!(endpoint.path(), "answer_friends_request.php");
        assert_eq!(
            endpoint.params(),
            vec![
                ("id", "5".to_string()),
                ("requester", "a".to_string()),
                ("state", "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_missing_device_token_is_empty() {
        let endpoint = Endpoint::Login {
            username: "a".into(),
            password: "p".into(),
            device_token: None,
        };
        assert!(endpoint.params().contains(&("device_token", String::new())));
    }

    #[test]
    fn test_voice_memo_params_go_in_query() {
        let upload = Endpoint::UploadVoiceMemo { message_id: 3, owner: "a".into() };
        assert_eq!(upload.method(), Method::Post);
        assert!(upload.params_in_query());
        assert!(!Endpoint::DeleteFriendsRequest { id: 1 }.params_in_query());
        assert!(Endpoint::GetActiveChat { username: "a".into() }.params_in_query());
    }
}
