//! QLink Bridge
//!
//! Exposes a Vantage QLink controller over HTTP and WebSocket:
//! - [`settings`]: runtime settings and the persisted settings file
//! - [`stations`]: station address translation and `loads.json`
//! - [`context`]: the shared [`BridgeContext`]
//! - [`monitor`]: event-stream or poll based state monitoring
//! - [`hub`]: fan-out of events to WebSocket subscribers
//! - [`http`]: the axum router

pub mod context;
pub mod error;
pub mod http;
pub mod hub;
pub mod monitor;
pub mod settings;
pub mod stations;

pub use context::{BridgeContext, LedQuery, SettingsOutcome};
pub use error::{ApiError, ApiResult, BridgeError, Result};
pub use http::{router, serve};
pub use hub::{HubHandle, Subscription};
pub use monitor::{poll_cycle, MonitorSnapshot, MonitorState, MonitorStatus, PollReport};
pub use settings::{MonitorMode, SettingKey, Settings, SettingsFile, UpdateReport};
pub use stations::{LoadsConfig, Mapping, StationAddress, StationMap};
