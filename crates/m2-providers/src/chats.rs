use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use m2_backend::{Backend, BackendExt, Endpoint};
use m2_types::models::{Chat, FriendsRequest};

use crate::context::{AppContext, Session, spawn_follow_up};
use crate::error::ProviderError;
use crate::observable::{DiffObservable, Observation, Update};

/// Chats of the signed-in user, one per accepted friends request.
#[derive(Clone)]
pub struct ChatsProvider {
    inner: Arc<ChatsInner>,
}

struct ChatsInner {
    backend: Arc<dyn Backend>,
    session: Arc<Session>,
    chats: Mutex<Vec<Chat>>,
    observable: DiffObservable<Chat>,
    _friends_requests: Observation,
}

impl ChatsProvider {
    /// Builds the provider and keeps it in step with the context's friends
    /// requests: any change there refetches the chats.
    pub fn new(context: &AppContext) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<ChatsInner>| {
            let weak = weak.clone();
            let observation = context.friends_requests().bind(move |_| {
                let weak = weak.clone();
                spawn_follow_up("chats refresh", async move {
                    let Some(inner) = weak.upgrade() else { return };
                    let (backend, session) = (inner.backend.clone(), inner.session.clone());
                    drop(inner);

                    match fetch_chats(backend.as_ref(), &session).await {
                        Ok(fetched) => match weak.upgrade() {
                            Some(inner) => inner.replace(fetched),
                            None => debug!("Chats provider gone, dropping refreshed chats"),
                        },
                        Err(e) => warn!("Chats refresh failed: {}", e),
                    }
                });
            });
            ChatsInner {
                backend: context.backend.clone(),
                session: context.session.clone(),
                chats: Mutex::new(Vec::new()),
                observable: DiffObservable::new(),
                _friends_requests: observation,
            }
        });
        Self { inner }
    }

    pub fn chats(&self) -> Vec<Chat> {
        self.inner
            .chats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn chat_with(&self, username: &str) -> Option<Chat> {
        self.chats().into_iter().find(|chat| chat.other_user == username)
    }

    pub fn bind<F>(&self, handler: F) -> Observation
    where
        F: Fn(&Update<Chat>) + Send + Sync + 'static,
    {
        self.inner.observable.bind(handler)
    }

    pub async fn refresh(&self) -> Result<Vec<Chat>, ProviderError> {
        self.inner.refresh().await
    }
}

/// One chat per record, with the signed-in user on the `this_user` side.
async fn fetch_chats(backend: &dyn Backend, session: &Session) -> Result<Vec<Chat>, ProviderError> {
    let username = session.username().ok_or(ProviderError::NotSignedIn)?;
    let records: Vec<FriendsRequest> = backend
        .fetch(Endpoint::GetChats {
            requester: username.clone(),
        })
        .await?;

    let fetched: Vec<Chat> = records
        .iter()
        .map(|record| Chat::from_request(record, &username))
        .collect();
    debug!("Fetched {} chats for {}", fetched.len(), username);
    Ok(fetched)
}

impl ChatsInner {
    async fn refresh(&self) -> Result<Vec<Chat>, ProviderError> {
        let fetched = fetch_chats(self.backend.as_ref(), &self.session).await?;
        self.replace(fetched.clone());
        Ok(fetched)
    }

    fn replace(&self, fetched: Vec<Chat>) {
        let old = {
            let mut chats = self
                .chats
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *chats, fetched.clone())
        };
        self.observable.notify_diff(&old, &fetched);
    }
}
