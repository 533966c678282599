use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use m2_backend::{Backend, BackendExt, Endpoint};
use m2_stream::Dispatcher;
use m2_types::api::{CheckUsernameResponse, LoginResponse};
use m2_types::commands::Command;
use m2_types::models::User;

use crate::context::{AppContext, Session};
use crate::error::ProviderError;

/// Account operations. Signing in also opens the stream and binds it to
/// the user; signing out closes it.
#[derive(Clone)]
pub struct UsersService {
    dispatcher: Dispatcher,
    backend: Arc<dyn Backend>,
    session: Arc<Session>,
}

impl UsersService {
    pub fn new(context: &AppContext) -> Self {
        Self {
            dispatcher: context.dispatcher.clone(),
            backend: context.backend.clone(),
            session: context.session.clone(),
        }
    }

    pub async fn register(
        &self,
        username: &str,
        password: &str,
        device_token: Option<String>,
    ) -> Result<User, ProviderError> {
        let mut user = User::new(username, password);
        user.device_token = device_token;

        let accepted = self
            .backend
            .fetch_flag(Endpoint::Register {
                id: user.id.to_string(),
                username: user.username.clone(),
                password: user.password.clone(),
                device_token: user.device_token.clone(),
            })
            .await?;
        if !accepted {
            return Err(ProviderError::Rejected("registration"));
        }

        info!("Registered {}", user.username);
        self.start_session(user.clone());
        Ok(user)
    }

    pub async fn login(
        &self,
        username: &str,
        password: &str,
        device_token: Option<String>,
    ) -> Result<User, ProviderError> {
        let mut user = User::new(username, password);
        user.device_token = device_token;

        let response = self
            .backend
            .request(Endpoint::Login {
                username: user.username.clone(),
                password: user.password.clone(),
                device_token: user.device_token.clone(),
            })
            .await?;
        if response == Value::Bool(false) {
            return Err(ProviderError::Rejected("login"));
        }
        if let Some(id) = serde_json::from_value::<LoginResponse>(response)
            .ok()
            .and_then(|resp| Uuid::parse_str(&resp.id).ok())
        {
            user.id = id;
        }

        info!("Logged in as {}", user.username);
        self.start_session(user.clone());
        Ok(user)
    }

    /// Signs out locally even when the backend call fails; the failure is
    /// still returned.
    pub async fn logout(&self) -> Result<(), ProviderError> {
        let user = self.session.current_user().ok_or(ProviderError::NotSignedIn)?;
        let result = self
            .backend
            .fetch_flag(Endpoint::Logout {
                username: user.username.clone(),
                password: user.password.clone(),
            })
            .await;

        self.session.clear();
        self.dispatcher.close();
        info!("Logged out {}", user.username);

        result.map(|_| ()).map_err(|e| {
            warn!("Backend logout failed: {}", e);
            e.into()
        })
    }

    pub async fn check_username(&self, username: &str) -> Result<bool, ProviderError> {
        let resp: CheckUsernameResponse = self
            .backend
            .fetch(Endpoint::CheckUsername {
                username: username.to_string(),
            })
            .await?;
        Ok(resp.is_available)
    }

    pub async fn update_device_token(&self, device_token: &str) -> Result<bool, ProviderError> {
        let username = self.session.username().ok_or(ProviderError::NotSignedIn)?;
        Ok(self
            .backend
            .fetch_flag(Endpoint::UpdateDeviceToken {
                username,
                device_token: device_token.to_string(),
            })
            .await?)
    }

    fn start_session(&self, user: User) {
        let username = user.username.clone();
        self.session.set_user(user);
        self.dispatcher.open();
        self.dispatcher.send(&Command::login(username));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use m2_stream::StreamState;
    use serde_json::json;

    #[tokio::test]
    async fn test_login_opens_stream_and_binds_user() {
        let harness = Harness::new();
        harness.context.dispatcher.close();
        let id = Uuid::new_v4();
        harness
            .backend
            .respond("login.php", json!({ "id": id.to_string(), "username": "a" }));
        let users = UsersService::new(&harness.context);

        let user = users.login("a", "pw", None).await.unwrap();
        assert_eq!(user.id, id);
        assert_eq!(harness.context.session.username().as_deref(), Some("a"));
        assert_eq!(harness.context.dispatcher.state(), StreamState::Opening);
        assert_eq!(harness.link.sent_commands(), vec![Command::login("a")]);
        assert_eq!(
            harness.backend.calls_to("login.php")[0].params(),
            vec![
                ("username", "a".to_string()),
                ("password", "pw".to_string()),
                ("device_token", String::new()),
            ]
        );
    }

    #[tokio::test]
    async fn test_login_with_empty_body_succeeds() {
        let harness = Harness::new();
        harness.backend.respond("login.php", json!(true));
        let users = UsersService::new(&harness.context);
        assert!(users.login("a", "pw", Some("tok".into())).await.is_ok());
        assert!(harness.context.session.is_signed_in());
    }

    #[tokio::test]
    async fn test_rejected_login() {
        let harness = Harness::new();
        harness.backend.respond("login.php", json!(false));
        let users = UsersService::new(&harness.context);
        let result = users.login("a", "wrong", None).await;
        assert!(matches!(result, Err(ProviderError::Rejected(_))));
        assert!(!harness.context.session.is_signed_in());
        assert!(harness.link.sent().is_empty());
    }

    #[tokio::test]
    async fn test_register() {
        let harness = Harness::new();
        harness.backend.respond("register.php", json!(true));
        let users = UsersService::new(&harness.context);

        let user = users.register("new", "pw", None).await.unwrap();
        let calls = harness.backend.calls_to("register.php");
        assert_eq!(calls[0].params()[0], ("id", user.id.to_string()));
        assert_eq!(harness.link.sent_commands(), vec![Command::login("new")]);
    }

    #[tokio::test]
    async fn test_logout_clears_even_on_failure() {
        let harness = Harness::signed_in("a");
        harness.backend.fail("logout.php", 500);
        let users = UsersService::new(&harness.context);

        assert!(users.logout().await.is_err());
        assert!(!harness.context.session.is_signed_in());
        assert_eq!(harness.context.dispatcher.state(), StreamState::Closed);
        assert!(matches!(users.logout().await, Err(ProviderError::NotSignedIn)));
    }

    #[tokio::test]
    async fn test_check_username_and_device_token() {
        let harness = Harness::signed_in("a");
        harness
            .backend
            .respond("check_username.php", json!({ "username": "b", "isAvailable": true }));
        harness.backend.respond("update_device_token.php", json!(""));
        let users = UsersService::new(&harness.context);

        assert!(users.check_username("b").await.unwrap());
        assert!(users.update_device_token("tok").await.unwrap());
        assert_eq!(
            harness.backend.calls_to("update_device_token.php")[0].params(),
            vec![("username", "a".to_string()), ("device_token", "tok".to_string())]
        );
    }
}
