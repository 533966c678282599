use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info, warn};

use m2_backend::{Backend, BackendExt, Endpoint};
use m2_stream::{Dispatcher, StreamSubscriber, Subscription};
use m2_types::commands::{Command, FriendsRequestChangeType, FriendsRequestsChanged};
use m2_types::models::{Chat, FriendsRequest, FriendsRequestState};

use crate::context::{Session, spawn_follow_up};
use crate::error::ProviderError;
use crate::observable::{DiffObservable, Observation, Update};

/// Friends requests of the signed-in user. One instance per [`AppContext`],
/// shared by every consumer.
///
/// The local list is never patched from stream events: a
/// `changedFriends` command only triggers a refetch.
///
/// [`AppContext`]: crate::AppContext
#[derive(Clone)]
pub struct FriendsRequestsProvider {
    inner: Arc<FriendsRequestsInner>,
}

struct FriendsRequestsInner {
    dispatcher: Dispatcher,
    backend: Arc<dyn Backend>,
    session: Arc<Session>,
    requests: Mutex<Vec<FriendsRequest>>,
    observable: DiffObservable<FriendsRequest>,
    _subscription: Subscription,
}

struct StreamHook(Weak<FriendsRequestsInner>);

impl StreamSubscriber for StreamHook {
    fn on_friends_requests_changed(&self, change: &FriendsRequestsChanged) {
        debug!(
            "Friends requests changed by {} ({:?}), refetching",
            change.requester, change.change
        );
        let weak = self.0.clone();
        spawn_follow_up("friends requests refresh", async move {
            let Some(inner) = weak.upgrade() else { return };
            if let Err(e) = inner.refresh().await {
                warn!("Friends requests refresh failed: {}", e);
            }
        });
    }
}

impl FriendsRequestsProvider {
    pub fn new(dispatcher: Dispatcher, backend: Arc<dyn Backend>, session: Arc<Session>) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<FriendsRequestsInner>| {
            let subscription = dispatcher.bind(Arc::new(StreamHook(weak.clone())));
            FriendsRequestsInner {
                dispatcher,
                backend,
                session,
                requests: Mutex::new(Vec::new()),
                observable: DiffObservable::new(),
                _subscription: subscription,
            }
        });
        Self { inner }
    }

    pub fn requests(&self) -> Vec<FriendsRequest> {
        self.inner.snapshot()
    }

    pub fn bind<F>(&self, handler: F) -> Observation
    where
        F: Fn(&Update<FriendsRequest>) + Send + Sync + 'static,
    {
        self.inner.observable.bind(handler)
    }

    /// Replaces the local list with the backend's.
    pub async fn refresh(&self) -> Result<Vec<FriendsRequest>, ProviderError> {
        self.inner.refresh().await
    }

    /// Sends a friends request from the signed-in user to `receiver`.
    pub async fn send_request(&self, receiver: &str) -> Result<bool, ProviderError> {
        let requester = self.inner.username()?;
        let accepted = self
            .inner
            .backend
            .fetch_flag(Endpoint::SendFriendsRequest {
                requester: requester.clone(),
                receiver: receiver.to_string(),
            })
            .await?;
        if accepted {
            info!("Sent friends request to {}", receiver);
            self.inner.changed(&requester, receiver, FriendsRequestChangeType::Sent).await;
        }
        Ok(accepted)
    }

    /// Answers a request addressed to the signed-in user.
    pub async fn answer(
        &self,
        request: &FriendsRequest,
        state: FriendsRequestState,
    ) -> Result<bool, ProviderError> {
        let requester = self.inner.username()?;
        let accepted = self
            .inner
            .backend
            .fetch_flag(Endpoint::AnswerFriendsRequest {
                id: request.id,
                requester,
                state,
            })
            .await?;
        if accepted {
            let change = match state {
                FriendsRequestState::Accepted => FriendsRequestChangeType::Accepted,
                _ => FriendsRequestChangeType::Declined,
            };
            info!("Answered friends request {} with {:?}", request.id, state);
            // Addressed back to whoever sent the request
            self.inner
                .changed(&request.receiver, &request.requester, change)
                .await;
        }
        Ok(accepted)
    }

    /// Deletes a request, which also ends the chat derived from it.
    pub async fn delete(&self, request: &FriendsRequest) -> Result<bool, ProviderError> {
        let username = self.inner.username()?;
        let counterpart = request.counterpart(&username).to_string();
        self.inner.delete(request.id, &username, &counterpart).await
    }

    pub async fn delete_for_chat(&self, chat: &Chat) -> Result<bool, ProviderError> {
        self.inner.delete(chat.id, &chat.this_user, &chat.other_user).await
    }
}

impl FriendsRequestsInner {
    fn username(&self) -> Result<String, ProviderError> {
        self.session.username().ok_or(ProviderError::NotSignedIn)
    }

    fn snapshot(&self) -> Vec<FriendsRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn refresh(&self) -> Result<Vec<FriendsRequest>, ProviderError> {
        let requester = self.username()?;
        let fetched: Vec<FriendsRequest> = self
            .backend
            .fetch(Endpoint::GetFriendsRequests { requester })
            .await?;
        debug!("Fetched {} friends requests", fetched.len());

        let old = {
            let mut requests = self
                .requests
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *requests, fetched.clone())
        };
        self.observable.notify_diff(&old, &fetched);
        Ok(fetched)
    }

    async fn delete(
        &self,
        id: i64,
        requester: &str,
        receiver: &str,
    ) -> Result<bool, ProviderError> {
        let accepted = self
            .backend
            .fetch_flag(Endpoint::DeleteFriendsRequest { id })
            .await?;
        if accepted {
            info!("Deleted friends request {}", id);
            self.changed(requester, receiver, FriendsRequestChangeType::Deleted)
                .await;
        }
        Ok(accepted)
    }

    /// Tells the counterpart over the stream, then refetches.
    async fn changed(&self, requester: &str, receiver: &str, change: FriendsRequestChangeType) {
        self.dispatcher
            .send(&Command::friends_requests_changed(requester, receiver, change));
        if let Err(e) = self.refresh().await {
            warn!("Refresh after friends request change failed: {}", e);
        }
    }
}
