//! The persistent command stream: a raw duplex TCP transport and the
//! dispatcher that decodes, routes and encodes stream commands.

pub mod dispatcher;
pub mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use dispatcher::{Dispatcher, StreamState, StreamSubscriber, Subscription};
pub use transport::{Direction, Link, TcpTransport, TransportEvents, READ_CHUNK_SIZE};
