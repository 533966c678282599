//! In-memory [`Link`] for exercising the dispatcher and its subscribers
//! without a socket.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use m2_types::commands::Command;

use crate::transport::{Direction, Link, TransportEvents};

/// Records every write and lets the caller raise transport events by hand.
#[derive(Default)]
pub struct MemoryLink {
    events: Mutex<Option<Arc<dyn TransportEvents>>>,
    sent: Mutex<Vec<Bytes>>,
    opens: AtomicUsize,
    active: AtomicBool,
}

impl MemoryLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Raw writes, in order.
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    /// Writes decoded back into commands. Undecodable writes are skipped.
    pub fn sent_commands(&self) -> Vec<Command> {
        self.sent()
            .iter()
            .filter_map(|bytes| Command::from_slice(bytes).ok())
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }

    fn sink(&self) -> Option<Arc<dyn TransportEvents>> {
        self.events.lock().unwrap().clone()
    }

    pub fn emit_opened(&self, direction: Direction) {
        self.active.store(true, Ordering::SeqCst);
        if let Some(events) = self.sink() {
            events.opened(direction);
        }
    }

    pub fn emit_closed(&self, direction: Direction) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(events) = self.sink() {
            events.closed(direction);
        }
    }

    /// Delivers `chunk` as if it had been read from the socket.
    pub fn emit_bytes(&self, chunk: &[u8]) {
        if let Some(events) = self.sink() {
            events.bytes_available(Direction::Read, chunk);
        }
    }
}

impl Link for MemoryLink {
    fn open(&self, events: Arc<dyn TransportEvents>) {
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.events.lock().unwrap() = Some(events);
    }

    fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.events.lock().unwrap().take();
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn send_bytes(&self, data: Bytes) {
        self.sent.lock().unwrap().push(data);
    }
}
