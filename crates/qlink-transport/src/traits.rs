//! Transport trait definitions

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::tcp::ClientOptions;

/// Anything that can run one command/response exchange with the controller
#[async_trait]
pub trait CommandSender: Send + Sync {
    /// Send `command` and return the first response line.
    ///
    /// `timeout` overrides the configured per-call timeout.
    async fn send(&self, command: &str, timeout: Option<Duration>) -> Result<String>;

    /// Replace the runtime options used by later calls
    fn reconfigure(&self, _options: ClientOptions) {}
}
