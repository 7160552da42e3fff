//! # xwalk-telephony-core
//!
//! Call and service state tracking behind the Crosswalk telephony extension.
//!
//! The backend sits between a remote telephony provider (oFono over DBus, or
//! the in-memory provider used for tests and simulation) and a JavaScript page
//! speaking a JSON message protocol:
//!
//! ```text
//!   page ──JSON request──> BackendHandle ──> TelephonyBackend ──> TelephonyProvider
//!   page <──reply/notification── OutboundMessage <──┘      <──── ProviderEvent
//! ```
//!
//! It keeps the service (modem) registry and the call registry in sync with
//! provider signals, emulates conference calls on top of the provider's flat
//! call list, derives the single active call and pushes change notifications.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use tokio::sync::mpsc;
//! use xwalk_telephony_core::provider::memory::InMemoryProvider;
//! use xwalk_telephony_core::{spawn_backend, TelephonyConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (events_tx, events_rx) = mpsc::unbounded_channel();
//!     let provider = InMemoryProvider::with_events(events_tx);
//!     provider.add_modem("/phonesim", InMemoryProvider::modem_properties("phonesim"));
//!
//!     let runtime = spawn_backend(Arc::new(provider), events_rx, &TelephonyConfig::default());
//!     let reply = runtime
//!         .handle
//!         .request(json!({ "cmd": "dial", "promiseId": 1, "remoteParty": "12345" }))
//!         .await?;
//!     println!("{}", serde_json::to_string(&reply)?);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod call;
pub mod config;
pub mod error;
pub mod ids;
pub mod logging;
pub mod notify;
pub mod protocol;
pub mod provider;
pub mod registry;
pub mod service;
pub mod validation;

pub use backend::{spawn_backend, BackendHandle, BackendRuntime, TelephonyBackend};
pub use call::{CallField, CallInfo, CallState, TelephonyCall};
pub use config::TelephonyConfig;
pub use error::{TelephonyError, TelephonyResult};
pub use notify::{Notification, Notifier, OutboundMessage};
pub use protocol::{Command, Reply, Request};
pub use provider::{ProviderEvent, TelephonyProvider};
pub use service::{ServiceInfo, TelephonyService};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
