/// Integration test: drive a real TCP stream against a local listener and
/// check commands flow both ways through the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use m2_stream::{Direction, Dispatcher, Link, StreamState, StreamSubscriber, TcpTransport};
use m2_types::commands::{ActiveStatusChanged, Command};
use m2_types::models::Message;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug)]
enum Seen {
    Opened(Direction),
    Closed(Direction),
    Message(Message),
    Active(ActiveStatusChanged),
}

struct Forward(mpsc::UnboundedSender<Seen>);

impl StreamSubscriber for Forward {
    fn on_open(&self, direction: Direction) {
        let _ = self.0.send(Seen::Opened(direction));
    }

    fn on_close(&self, direction: Direction) {
        let _ = self.0.send(Seen::Closed(direction));
    }

    fn on_message(&self, message: &Message) {
        let _ = self.0.send(Seen::Message(message.clone()));
    }

    fn on_active_status_changed(&self, change: &ActiveStatusChanged) {
        let _ = self.0.send(Seen::Active(change.clone()));
    }
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for stream event")
        .expect("subscriber channel closed")
}

/// Reads from the server side until one full JSON command has arrived.
async fn read_command(socket: &mut tokio::net::TcpStream, pending: &mut Vec<u8>) -> Command {
    loop {
        let mut stream = serde_json::Deserializer::from_slice(&pending[..]).into_iter::<Command>();
        if let Some(Ok(command)) = stream.next() {
            let consumed = stream.byte_offset();
            pending.drain(..consumed);
            return command;
        }

        let mut buf = [0u8; 1024];
        let n = timeout(WAIT, socket.read(&mut buf))
            .await
            .expect("timed out reading from client")
            .unwrap();
        assert!(n > 0, "client hung up");
        pending.extend_from_slice(&buf[..n]);
    }
}

#[tokio::test]
async fn loopback_commands_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let transport = Arc::new(TcpTransport::new("127.0.0.1", port));
    let dispatcher = Dispatcher::new(transport.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = dispatcher.bind(Arc::new(Forward(tx)));

    dispatcher.open();
    assert_eq!(dispatcher.state(), StreamState::Opening);

    let (mut server, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();

    assert!(matches!(next(&mut rx).await, Seen::Opened(Direction::Read)));
    assert!(matches!(next(&mut rx).await, Seen::Opened(Direction::Write)));
    assert_eq!(dispatcher.state(), StreamState::Open);
    assert!(transport.is_active());

    // Client to server
    dispatcher.send(&Command::login("alice"));
    let message = Message::text(0, "alice", "bob", "hi", 1000.0);
    dispatcher.send(&Command::message(&message).unwrap());

    let mut pending = Vec::new();
    assert_eq!(read_command(&mut server, &mut pending).await, Command::login("alice"));
    match read_command(&mut server, &mut pending).await {
        Command::Message(cmd) => {
            assert_eq!(cmd.message_id, "0");
            assert_eq!(cmd.sent_date, "1000.0");
            assert_eq!(cmd.to_message(), Some(message));
        }
        other => panic!("unexpected command {:?}", other),
    }

    // Server to client, one command per write
    let incoming = Message::text(1, "bob", "alice", "hey", 1001.0);
    let bytes = Command::message(&incoming).unwrap().to_bytes().unwrap();
    server.write_all(&bytes).await.unwrap();
    match next(&mut rx).await {
        Seen::Message(received) => assert_eq!(received, incoming),
        other => panic!("unexpected event {:?}", other),
    }

    let bytes = Command::active_status("bob", "alice", true).to_bytes().unwrap();
    server.write_all(&bytes).await.unwrap();
    match next(&mut rx).await {
        Seen::Active(change) => {
            assert_eq!(change.requester, "bob");
            assert!(change.is_online);
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Garbage is dropped without closing the stream
    server.write_all(b"\0\0garbage\0").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    server.write_all(&bytes).await.unwrap();
    assert!(matches!(next(&mut rx).await, Seen::Active(_)));

    // Peer hang-up closes the stream
    drop(server);
    assert!(matches!(next(&mut rx).await, Seen::Closed(_)));
    assert!(matches!(next(&mut rx).await, Seen::Closed(_)));
    assert_eq!(dispatcher.state(), StreamState::Closed);
    assert!(!transport.is_active());
}

#[tokio::test]
async fn connection_refused_reports_closed() {
    // Bind then drop to get a port nothing listens on
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let transport = Arc::new(TcpTransport::new("127.0.0.1", port));
    let dispatcher = Dispatcher::new(transport.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = dispatcher.bind(Arc::new(Forward(tx)));

    dispatcher.open();
    assert!(matches!(next(&mut rx).await, Seen::Closed(Direction::Read)));
    assert!(matches!(next(&mut rx).await, Seen::Closed(Direction::Write)));
    assert_eq!(dispatcher.state(), StreamState::Closed);

    // Sending while closed is dropped quietly
    dispatcher.send(&Command::login("alice"));
    assert!(!transport.is_active());
}
