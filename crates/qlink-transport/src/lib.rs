//! QLink Transport Layer
//!
//! Talks to the controller over raw TCP:
//! - [`QlinkClient`]: one short-lived connection per command, every call
//!   serialized behind a single gate, refused connections retried with
//!   exponential backoff
//! - [`MonitorConnection`]: a persistent connection for the unsolicited
//!   event stream
//! - [`probe`]: connect-only reachability check

pub mod error;
pub mod retry;
pub mod stream;
pub mod tcp;
pub mod traits;

pub use error::{ErrorKind, Result, TransportError};
pub use retry::{ReconnectBackoff, RetryPolicy};
pub use stream::MonitorConnection;
pub use tcp::{probe, ClientOptions, QlinkClient};
pub use traits::CommandSender;
