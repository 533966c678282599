use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use m2_types::commands::{ActiveStatusChanged, Command, FriendsRequestsChanged};
use m2_types::models::{Message, epoch_seconds_now};

use crate::transport::{Direction, Link, TransportEvents};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Closed,
    Opening,
    Open,
}

/// Receives decoded stream traffic. Every method defaults to a no-op so a
/// subscriber only implements the categories it cares about.
pub trait StreamSubscriber: Send + Sync {
    fn on_open(&self, _direction: Direction) {}
    fn on_close(&self, _direction: Direction) {}
    fn on_message(&self, _message: &Message) {}
    fn on_active_status_changed(&self, _change: &ActiveStatusChanged) {}
    fn on_friends_requests_changed(&self, _change: &FriendsRequestsChanged) {}
}

/// Decodes incoming chunks into commands and routes them to subscribers;
/// encodes outgoing commands onto the link.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    link: Arc<dyn Link>,
    connection: Mutex<ConnectionState>,
    subscribers: RwLock<Vec<(u64, Arc<dyn StreamSubscriber>)>>,
    next_subscriber_id: AtomicU64,
}

struct ConnectionState {
    state: StreamState,
    read_open: bool,
    write_open: bool,
}

/// Keeps a subscriber bound until dropped.
#[must_use = "dropping a Subscription unbinds the subscriber"]
pub struct Subscription {
    id: u64,
    dispatcher: Weak<DispatcherInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.dispatcher.upgrade() {
            inner.unbind(self.id);
        }
    }
}

/// Forwards transport events without keeping the dispatcher alive.
struct EventSink(Weak<DispatcherInner>);

impl TransportEvents for EventSink {
    fn opened(&self, direction: Direction) {
        if let Some(inner) = self.0.upgrade() {
            inner.opened(direction);
        }
    }

    fn closed(&self, direction: Direction) {
        if let Some(inner) = self.0.upgrade() {
            inner.closed(direction);
        }
    }

    fn bytes_available(&self, _direction: Direction, chunk: &[u8]) {
        if let Some(inner) = self.0.upgrade() {
            inner.handle_chunk(chunk);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Dispatcher {
    pub fn new(link: Arc<dyn Link>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                link,
                connection: Mutex::new(ConnectionState {
                    state: StreamState::Closed,
                    read_open: false,
                    write_open: false,
                }),
                subscribers: RwLock::new(Vec::new()),
                next_subscriber_id: AtomicU64::new(1),
            }),
        }
    }

    /// Starts opening the stream. A no-op while already opening or open.
    pub fn open(&self) {
        {
            let mut connection = lock(&self.inner.connection);
            if connection.state != StreamState::Closed {
                debug!("Stream already {:?}", connection.state);
                return;
            }
            connection.state = StreamState::Opening;
            connection.read_open = false;
            connection.write_open = false;
        }
        debug!("Opening stream");
        self.inner
            .link
            .open(Arc::new(EventSink(Arc::downgrade(&self.inner))));
    }

    pub fn close(&self) {
        self.inner.link.close();
        let mut connection = lock(&self.inner.connection);
        connection.state = StreamState::Closed;
        connection.read_open = false;
        connection.write_open = false;
    }

    pub fn state(&self) -> StreamState {
        lock(&self.inner.connection).state
    }

    pub fn is_active(&self) -> bool {
        self.inner.link.is_active()
    }

    /// Binds a subscriber. It stays bound for as long as the returned
    /// [`Subscription`] is alive.
    pub fn bind(&self, subscriber: Arc<dyn StreamSubscriber>) -> Subscription {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, subscriber));
        trace!("Bound stream subscriber {}", id);
        Subscription {
            id,
            dispatcher: Arc::downgrade(&self.inner),
        }
    }

    pub fn unbind(&self, id: u64) {
        self.inner.unbind(id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Serializes `command` and hands it to the link. Fire-and-forget.
    pub fn send(&self, command: &Command) {
        match command.to_bytes() {
            Ok(bytes) => {
                trace!("Sending {} command ({} bytes)", command.tag(), bytes.len());
                self.inner.link.send_bytes(Bytes::from(bytes));
            }
            Err(e) => warn!("Failed to encode {} command: {}", command.tag(), e),
        }
    }

    /// Decodes one raw chunk read from the stream and routes the command.
    pub fn handle_chunk(&self, chunk: &[u8]) {
        self.inner.handle_chunk(chunk);
    }
}

impl DispatcherInner {
    fn unbind(&self, id: u64) {
        self.subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|(subscriber_id, _)| *subscriber_id != id);
        trace!("Unbound stream subscriber {}", id);
    }

    /// Snapshot so subscribers may bind or unbind while being notified.
    fn subscribers(&self) -> Vec<Arc<dyn StreamSubscriber>> {
        self.subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, subscriber)| subscriber.clone())
            .collect()
    }

    fn opened(&self, direction: Direction) {
        {
            let mut connection = lock(&self.connection);
            match direction {
                Direction::Read => connection.read_open = true,
                Direction::Write => connection.write_open = true,
            }
            let both_open = connection.read_open && connection.write_open;
            if both_open && connection.state == StreamState::Opening {
                connection.state = StreamState::Open;
                info!("Stream open");
            }
        }
        for subscriber in self.subscribers() {
            subscriber.on_open(direction);
        }
    }

    fn closed(&self, direction: Direction) {
        {
            let mut connection = lock(&self.connection);
            if connection.state != StreamState::Closed {
                info!("Stream closed ({:?} direction)", direction);
            }
            connection.state = StreamState::Closed;
            connection.read_open = false;
            connection.write_open = false;
        }
        for subscriber in self.subscribers() {
            subscriber.on_close(direction);
        }
    }

    fn handle_chunk(&self, chunk: &[u8]) {
        let cleaned: Vec<u8> = chunk.iter().copied().filter(|b| *b != 0).collect();
        let payload = cleaned.trim_ascii();
        if payload.is_empty() {
            return;
        }

        match Command::from_slice(payload) {
            Ok(command) => self.dispatch(command),
            Err(e) => debug!(
                "Dropping undecodable stream payload ({}): {}",
                e,
                String::from_utf8_lossy(payload)
            ),
        }
    }

    fn dispatch(&self, command: Command) {
        trace!("Received {} command", command.tag());
        match command {
            Command::Message(cmd) => match cmd.to_message() {
                Some(message) => self.deliver_message(&message),
                None => warn!("Dropping message command with invalid fields"),
            },
            Command::Typing(cmd) => match cmd.to_message(epoch_seconds_now()) {
                Some(message) => self.deliver_message(&message),
                None => warn!("Dropping typing command with invalid id"),
            },
            Command::VoiceMemo(cmd) => match cmd.to_message() {
                Some(message) => self.deliver_message(&message),
                None => warn!("Dropping voice memo command with invalid fields"),
            },
            Command::ActiveStatusChanged(change) => {
                for subscriber in self.subscribers() {
                    subscriber.on_active_status_changed(&change);
                }
            }
            Command::FriendsRequestsChanged(change) => {
                for subscriber in self.subscribers() {
                    subscriber.on_friends_requests_changed(&change);
                }
            }
            Command::Login(cmd) => debug!("Ignoring login command for {}", cmd.username),
        }
    }

    fn deliver_message(&self, message: &Message) {
        for subscriber in self.subscribers() {
            subscriber.on_message(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryLink;
    use m2_types::commands::FriendsRequestChangeType;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl StreamSubscriber for Recorder {
        fn on_open(&self, direction: Direction) {
            self.events.lock().unwrap().push(format!("open:{:?}", direction));
        }

        fn on_close(&self, direction: Direction) {
            self.events.lock().unwrap().push(format!("close:{:?}", direction));
        }

        fn on_message(&self, message: &Message) {
            self.events.lock().unwrap().push(format!(
                "message:{}:{}:{}",
                message.id,
                message.sender,
                message.body().unwrap_or("<memo>")
            ));
        }

        fn on_active_status_changed(&self, change: &ActiveStatusChanged) {
            self.events
                .lock()
                .unwrap()
                .push(format!("active:{}:{}", change.requester, change.is_online));
        }

        fn on_friends_requests_changed(&self, change: &FriendsRequestsChanged) {
            self.events
                .lock()
                .unwrap()
                .push(format!("friends:{:?}", change.change));
        }
    }

    fn setup() -> (Dispatcher, Arc<MemoryLink>, Arc<Recorder>, Subscription) {
        let link = Arc::new(MemoryLink::new());
        let dispatcher = Dispatcher::new(link.clone());
        let recorder = Arc::new(Recorder::default());
        let subscription = dispatcher.bind(recorder.clone());
        (dispatcher, link, recorder, subscription)
    }

    #[test]
    fn test_state_machine() {
        let (dispatcher, link, recorder, _sub) = setup();
        assert_eq!(dispatcher.state(), StreamState::Closed);

        dispatcher.open();
        assert_eq!(dispatcher.state(), StreamState::Opening);
        link.emit_opened(Direction::Read);
        assert_eq!(dispatcher.state(), StreamState::Opening);
        link.emit_opened(Direction::Write);
        assert_eq!(dispatcher.state(), StreamState::Open);

        // Second open is a no-op on the link
        dispatcher.open();
        assert_eq!(link.open_count(), 1);

        link.emit_closed(Direction::Write);
        assert_eq!(dispatcher.state(), StreamState::Closed);
        assert_eq!(
            recorder.events(),
            vec!["open:Read", "open:Write", "close:Write"]
        );

        dispatcher.open();
        assert_eq!(link.open_count(), 2);
        assert_eq!(dispatcher.state(), StreamState::Opening);
    }

    #[test]
    fn test_tcp_open_without_runtime_closes() {
        let dispatcher = Dispatcher::new(Arc::new(crate::TcpTransport::new("127.0.0.1", 1)));
        let recorder = Arc::new(Recorder::default());
        let _sub = dispatcher.bind(recorder.clone());

        dispatcher.open();

        assert_eq!(dispatcher.state(), StreamState::Closed);
        assert_eq!(recorder.events(), vec!["close:Read", "close:Write"]);
    }

    #[test]
    fn test_decodes_each_category() {
        let (dispatcher, _link, recorder, _sub) = setup();

        dispatcher.handle_chunk(
            br#"{"cmd":"message","messageID":"3","from_user":"b","to_user":"a","message":"yo","sentDate":"12.5"}"#,
        );
        dispatcher.handle_chunk(br#"{"cmd":"t","i":"4","f":"b","t":"a","m":"ty","d":false}"#);
        dispatcher.handle_chunk(
            br#"{"cmd":"voicememo","messageID":"5","from_user":"b","to_user":"a","sentDate":"13"}"#,
        );
        dispatcher.handle_chunk(
            br#"{"cmd":"changedActive","requester":"b","receiver":"a","is_online":true}"#,
        );
        dispatcher.handle_chunk(
            br#"{"cmd":"changedFriends","requester":"b","receiver":"a","type":2}"#,
        );

        assert_eq!(
            recorder.events(),
            vec![
                "message:3:b:yo".to_string(),
                "message:4:b:ty".to_string(),
                "message:5:b:<memo>".to_string(),
                "active:b:true".to_string(),
                format!("friends:{:?}", FriendsRequestChangeType::Sent),
            ]
        );
    }

    #[test]
    fn test_strips_nul_and_whitespace() {
        let (dispatcher, _link, recorder, _sub) = setup();
        let mut chunk = b"  \n".to_vec();
        chunk.extend_from_slice(
            br#"{"cmd":"changedActive","requester":"b","receiver":"a","is_online":false}"#,
        );
        chunk.extend_from_slice(b"\0\0\r\n");
        dispatcher.handle_chunk(&chunk);
        assert_eq!(recorder.events(), vec!["active:b:false"]);
    }

    #[test]
    fn test_invalid_payloads_reach_nobody() {
        let (dispatcher, _link, recorder, _sub) = setup();
        dispatcher.handle_chunk(b"");
        dispatcher.handle_chunk(b"\0\0\0");
        dispatcher.handle_chunk(b"not json");
        dispatcher.handle_chunk(b"[1,2,3]");
        dispatcher.handle_chunk(br#"{"cmd":"unknown","x":1}"#);
        dispatcher.handle_chunk(br#"{"cmd":"message","messageID":"1","from_user":"b"}"#);
        dispatcher.handle_chunk(
            br#"{"cmd":"message","messageID":"x","from_user":"b","to_user":"a","message":"m","sentDate":"1"}"#,
        );
        dispatcher.handle_chunk(
            br#"{"cmd":"changedActive","requester":"b","receiver":"a","is_online":"yes"}"#,
        );
        dispatcher.handle_chunk(br#"{"cmd":"login","username":"a"}"#);
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_fan_out_in_bind_order_and_unbind_on_drop() {
        let (dispatcher, _link, first, first_sub) = setup();
        let second = Arc::new(Recorder::default());
        let second_sub = dispatcher.bind(second.clone());
        assert_eq!(dispatcher.subscriber_count(), 2);
        assert!(second_sub.id() > first_sub.id());

        let payload = br#"{"cmd":"changedActive","requester":"b","receiver":"a","is_online":true}"#;
        dispatcher.handle_chunk(payload);
        assert_eq!(first.events().len(), 1);
        assert_eq!(second.events().len(), 1);

        drop(first_sub);
        assert_eq!(dispatcher.subscriber_count(), 1);
        dispatcher.handle_chunk(payload);
        assert_eq!(first.events().len(), 1);
        assert_eq!(second.events().len(), 2);

        dispatcher.unbind(second_sub.id());
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[test]
    fn test_send_writes_unframed_json() {
        let (dispatcher, link, _recorder, _sub) = setup();
        dispatcher.send(&Command::login("a"));
        dispatcher.send(&Command::active_status("a", "b", true));

        let sent = link.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].last(), Some(&b'}'));

        let decoded = Command::from_slice(&sent[0]).unwrap();
        assert_eq!(decoded, Command::login("a"));
        let value: serde_json::Value = serde_json::from_slice(&sent[1]).unwrap();
        assert_eq!(value["cmd"], "changedActive");
        assert_eq!(value["is_online"], true);
    }

    #[test]
    fn test_outgoing_message_decodes_back() {
        let (dispatcher, link, recorder, _sub) = setup();
        let message = Message::text(9, "a", "b", "round trip", 1234.5);
        dispatcher.send(&Command::message(&message).unwrap());

        let sent = link.sent();
        let decoded = Command::from_slice(&sent[0]).unwrap();
        let Command::Message(cmd) = decoded else {
            panic!("expected message command");
        };
        assert_eq!(cmd.to_message(), Some(message));

        dispatcher.handle_chunk(&sent[0]);
        assert_eq!(recorder.events(), vec!["message:9:a:round trip"]);
    }
}
