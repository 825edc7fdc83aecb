//! Inter-process communication for taskhost
//!
//! Worker processes talk to the supervisor over their standard streams using
//! one minified JSON array per line. The first element of every array is a
//! string keyword:
//!
//! | direction | line                 | meaning                          |
//! |-----------|----------------------|----------------------------------|
//! | inbound   | `["heartbeat"]`      | extend the watchdog deadline     |
//! | inbound   | `["result", "text"]` | deliver the task result          |
//! | outbound  | `["message", "text"]`| deliver the task payload         |
//!
//! Both sides flush after every line.

pub mod error;
pub mod protocol;
pub mod reply;
pub mod transport;

// Re-export commonly used types
pub use error::{IpcError, ProtocolError};
pub use protocol::{InboundMessage, OutboundMessage};
pub use reply::{ReplyState, RpcReply};
pub use transport::{LineReader, LineWriter};
