use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tracing::warn;

use m2_backend::Backend;
use m2_stream::Dispatcher;
use m2_types::models::{User, epoch_seconds_now};

use crate::friends_requests::FriendsRequestsProvider;

/// Source of "now" for message timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        epoch_seconds_now()
    }
}

/// Tactile/audible acknowledgement of a message event.
pub trait Feedback: Send + Sync {
    fn impact(&self);
}

pub struct NoFeedback;

impl Feedback for NoFeedback {
    fn impact(&self) {}
}

/// The signed-in user, if any.
#[derive(Default)]
pub struct Session {
    user: RwLock<Option<User>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_user(&self) -> Option<User> {
        self.user
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn username(&self) -> Option<String> {
        self.current_user().map(|user| user.username)
    }

    pub fn is_signed_in(&self) -> bool {
        self.current_user().is_some()
    }

    pub fn set_user(&self, user: User) {
        *self.user.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(user);
    }

    pub fn clear(&self) {
        self.user
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}

/// Shared services for one signed-in application instance.
///
/// Holds the single dispatcher and friends requests provider; per-chat
/// providers are built from it.
#[derive(Clone)]
pub struct AppContext {
    pub dispatcher: Dispatcher,
    pub backend: Arc<dyn Backend>,
    pub session: Arc<Session>,
    pub clock: Arc<dyn Clock>,
    pub feedback: Arc<dyn Feedback>,
    pub voice_memo_dir: PathBuf,
    friends_requests: FriendsRequestsProvider,
}

impl AppContext {
    pub fn new(
        dispatcher: Dispatcher,
        backend: Arc<dyn Backend>,
        voice_memo_dir: impl Into<PathBuf>,
    ) -> Self {
        let session = Arc::new(Session::new());
        let friends_requests =
            FriendsRequestsProvider::new(dispatcher.clone(), backend.clone(), session.clone());
        Self {
            dispatcher,
            backend,
            session,
            clock: Arc::new(SystemClock),
            feedback: Arc::new(NoFeedback),
            voice_memo_dir: voice_memo_dir.into(),
            friends_requests,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_feedback(mut self, feedback: Arc<dyn Feedback>) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn friends_requests(&self) -> &FriendsRequestsProvider {
        &self.friends_requests
    }
}

/// Runs follow-up work triggered from a stream callback. Stream callbacks are
/// synchronous, so backend round trips they cause run as separate tasks.
pub(crate) fn spawn_follow_up<F>(what: &'static str, task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
        }
        Err(_) => warn!("No runtime to run {} on, skipping", what),
    }
}
