//! Backend task and its handle
//!
//! ```text
//!   BackendHandle ──requests──┐
//!                             ├──> backend task ──> OutboundMessage stream
//!   provider ─────events──────┘
//! ```
//!
//! Provider events are drained before the next request is taken, so a
//! request always sees the effects of the signals posted before it.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::TelephonyConfig;
use crate::error::{TelephonyError, TelephonyResult};
use crate::notify::{Notifier, OutboundMessage};
use crate::protocol::Reply;
use crate::provider::{ProviderEvent, TelephonyProvider};

use super::TelephonyBackend;

/// Messages accepted by the backend task
#[derive(Debug)]
pub enum BackendMessage {
    /// A raw inbound request; without `reply_to` the reply goes to the
    /// outbound stream
    Request {
        message: Value,
        reply_to: Option<oneshot::Sender<Reply>>,
    },
    Shutdown,
}

/// Cloneable handle for posting requests to the backend task
#[derive(Debug, Clone)]
pub struct BackendHandle {
    sender: mpsc::Sender<BackendMessage>,
}

impl BackendHandle {
    /// Post a request whose reply is written to the outbound stream
    pub async fn post(&self, message: Value) -> TelephonyResult<()> {
        self.send(BackendMessage::Request {
            message,
            reply_to: None,
        })
        .await
    }

    /// Send a request and wait for its reply
    pub async fn request(&self, message: Value) -> TelephonyResult<Reply> {
        let (reply_to, reply) = oneshot::channel();
        self.send(BackendMessage::Request {
            message,
            reply_to: Some(reply_to),
        })
        .await?;
        reply
            .await
            .map_err(|_| TelephonyError::unavailable("Backend dropped the request"))
    }

    /// Ask the backend task to stop
    pub async fn shutdown(&self) -> TelephonyResult<()> {
        self.send(BackendMessage::Shutdown).await
    }

    async fn send(&self, message: BackendMessage) -> TelephonyResult<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| TelephonyError::unavailable("Backend task has stopped"))
    }
}

/// A running backend
pub struct BackendRuntime {
    pub handle: BackendHandle,
    /// Replies to posted requests and notifications
    pub outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    pub task: JoinHandle<()>,
}

/// Start the backend task
pub fn spawn_backend(
    provider: Arc<dyn TelephonyProvider>,
    events: mpsc::UnboundedReceiver<ProviderEvent>,
    config: &TelephonyConfig,
) -> BackendRuntime {
    let (sender, requests) = mpsc::channel(config.channel_capacity.max(1));
    let (outbound_tx, outbound) = mpsc::unbounded_channel();

    let notifier = Notifier::new(outbound_tx, config.notifications_enabled);
    let backend = TelephonyBackend::new(provider, notifier);
    let task = tokio::spawn(run_backend(backend, requests, events));

    BackendRuntime {
        handle: BackendHandle { sender },
        outbound,
        task,
    }
}

async fn run_backend(
    mut backend: TelephonyBackend,
    mut requests: mpsc::Receiver<BackendMessage>,
    mut events: mpsc::UnboundedReceiver<ProviderEvent>,
) {
    tracing::info!("Starting telephony backend");
    if let Err(e) = backend.start().await {
        tracing::warn!("Initial service discovery failed: {}", e);
    }

    let mut events_open = true;
    loop {
        tokio::select! {
            biased;

            event = events.recv(), if events_open => match event {
                Some(event) => backend.handle_event(event).await,
                None => {
                    tracing::debug!("Provider event stream closed");
                    events_open = false;
                }
            },

            message = requests.recv() => match message {
                Some(BackendMessage::Request { message, reply_to }) => {
                    backend.handle_message(message, reply_to).await;
                }
                Some(BackendMessage::Shutdown) | None => break,
            },
        }
    }

    tracing::info!("Telephony backend stopped");
}
