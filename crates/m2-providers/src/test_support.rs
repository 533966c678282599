//! Doubles shared by the provider tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Notify;

use m2_backend::{Backend, BackendError, Endpoint};
use m2_stream::Dispatcher;
use m2_stream::testing::MemoryLink;
use m2_types::models::{FriendsRequest, FriendsRequestState, User};

use crate::context::{AppContext, Clock, Feedback};

type Script = Arc<dyn Fn(&Endpoint) -> Result<Value, BackendError> + Send + Sync>;

/// Backend answering from per-path scripts and recording every call.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<&'static str, Script>>,
    files: Mutex<HashMap<&'static str, Bytes>>,
    calls: Mutex<Vec<Endpoint>>,
    uploads: Mutex<Vec<(Endpoint, String, Bytes)>>,
    held: Mutex<HashMap<&'static str, Arc<Notify>>>,
}

impl ScriptedBackend {
    pub fn respond(&self, path: &'static str, value: Value) {
        self.respond_with(path, move |_| Ok(value.clone()));
    }

    pub fn respond_with<F>(&self, path: &'static str, script: F)
    where
        F: Fn(&Endpoint) -> Result<Value, BackendError> + Send + Sync + 'static,
    {
        self.scripts.lock().unwrap().insert(path, Arc::new(script));
    }

    pub fn fail(&self, path: &'static str, status: u16) {
        self.respond_with(path, move |_| Err(BackendError::Status { path, status }));
    }

    pub fn serve_file(&self, path: &'static str, data: &'static [u8]) {
        self.files.lock().unwrap().insert(path, Bytes::from_static(data));
    }

    /// Parks requests to `path` after recording them, until the returned
    /// gate is notified.
    pub fn hold(&self, path: &'static str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.held.lock().unwrap().insert(path, gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<Endpoint> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<Endpoint> {
        self.calls()
            .into_iter()
            .filter(|endpoint| endpoint.path() == path)
            .collect()
    }

    pub fn uploads(&self) -> Vec<(Endpoint, String, Bytes)> {
        self.uploads.lock().unwrap().clone()
    }

    async fn answer(&self, endpoint: &Endpoint) -> Result<Value, BackendError> {
        self.calls.lock().unwrap().push(endpoint.clone());
        let gate = self.held.lock().unwrap().get(endpoint.path()).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let script = self.scripts.lock().unwrap().get(endpoint.path()).cloned();
        match script {
            Some(script) => script(endpoint),
            None => Err(BackendError::Status {
                path: endpoint.path(),
                status: 404,
            }),
        }
    }
}

impl Backend for ScriptedBackend {
    fn request(&self, endpoint: Endpoint) -> BoxFuture<'_, Result<Value, BackendError>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.answer(&endpoint).await
        })
    }

    fn upload(
        &self,
        endpoint: Endpoint,
        file_name: String,
        data: Bytes,
    ) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(async move {
            self.uploads
                .lock()
                .unwrap()
                .push((endpoint.clone(), file_name, data));
            self.answer(&endpoint).await.map(|_| ())
        })
    }

    fn download(&self, endpoint: Endpoint) -> BoxFuture<'_, Result<Bytes, BackendError>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(endpoint.clone());
            self.files
                .lock()
                .unwrap()
                .get(endpoint.path())
                .cloned()
                .ok_or(BackendError::Status {
                    path: endpoint.path(),
                    status: 404,
                })
        })
    }
}

/// Clock that only moves when told to.
pub struct FixedClock(AtomicU64);

impl FixedClock {
    pub fn new(now: f64) -> Self {
        Self(AtomicU64::new(now.to_bits()))
    }

    pub fn set(&self, now: f64) {
        self.0.store(now.to_bits(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
pub struct CountingFeedback(AtomicUsize);

impl CountingFeedback {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl Feedback for CountingFeedback {
    fn impact(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub context: AppContext,
    pub link: Arc<MemoryLink>,
    pub backend: Arc<ScriptedBackend>,
    pub clock: Arc<FixedClock>,
    pub feedback: Arc<CountingFeedback>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_memo_dir(std::env::temp_dir().join("m2_providers_test"))
    }

    pub fn with_memo_dir(voice_memo_dir: PathBuf) -> Self {
        let link = Arc::new(MemoryLink::new());
        let dispatcher = Dispatcher::new(link.clone());
        dispatcher.open();
        let backend = Arc::new(ScriptedBackend::default());
        let clock = Arc::new(FixedClock::new(1000.0));
        let feedback = Arc::new(CountingFeedback::default());
        let context = AppContext::new(dispatcher, backend.clone(), voice_memo_dir)
            .with_clock(clock.clone())
            .with_feedback(feedback.clone());
        Self {
            context,
            link,
            backend,
            clock,
            feedback,
        }
    }

    pub fn signed_in(username: &str) -> Self {
        let harness = Self::new();
        harness.context.session.set_user(User::new(username, "secret"));
        harness
    }
}

pub fn request(id: i64, requester: &str, receiver: &str) -> FriendsRequest {
    FriendsRequest {
        id,
        requester: requester.into(),
        receiver: receiver.into(),
        date_created: 1.0,
        state: FriendsRequestState::Unanswered,
    }
}

/// Polls `condition` until it holds, giving spawned follow-ups time to run.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
