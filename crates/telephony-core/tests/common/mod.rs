//! Shared fixtures for backend integration tests

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use xwalk_telephony_core::provider::memory::InMemoryProvider;
use xwalk_telephony_core::provider::{ProviderEvent, TelephonyProvider};
use xwalk_telephony_core::{CallInfo, Notification, Notifier, OutboundMessage, Reply, Request, TelephonyBackend};

pub const MODEM: &str = "/phonesim";
pub const SERVICE_ID: &str = "|phonesim";

/// A backend driven directly, with the in-memory provider posting its signals
/// into a queue the test pumps explicitly
pub struct Harness {
    pub provider: Arc<InMemoryProvider>,
    pub backend: TelephonyBackend,
    events: mpsc::UnboundedReceiver<ProviderEvent>,
    outbound: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl Harness {
    /// One powered modem, notifications on, start-up notifications drained
    pub async fn new() -> Self {
        Self::with_modems(&[MODEM]).await
    }

    pub async fn with_modems(modems: &[&str]) -> Self {
        Self::build(|provider| {
            for modem in modems {
                let name = modem.trim_start_matches('/');
                provider.add_modem(modem, InMemoryProvider::modem_properties(name));
            }
        })
        .await
    }

    /// Start a backend over a provider prepared by `setup`
    pub async fn build<F: FnOnce(&InMemoryProvider)>(setup: F) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let provider = Arc::new(InMemoryProvider::with_events(events_tx));
        setup(provider.as_ref());

        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let backend = TelephonyBackend::new(
            provider.clone() as Arc<dyn TelephonyProvider>,
            Notifier::new(outbound_tx, true),
        );

        let mut harness = Self {
            provider,
            backend,
            events,
            outbound,
        };
        harness.backend.start().await.expect("backend start");
        harness.pump().await;
        harness.notifications();
        harness.provider.clear_operations();
        harness
    }

    /// Execute one request without processing the signals it caused
    pub async fn request(&mut self, message: Value) -> Reply {
        match Request::decode(message) {
            Ok(request) => self.backend.handle_request(request).await,
            Err(reply) => reply,
        }
    }

    /// Execute one request and process the signals it caused
    pub async fn request_and_pump(&mut self, message: Value) -> Reply {
        let reply = self.request(message).await;
        self.pump().await;
        reply
    }

    /// Feed every queued provider signal to the backend
    pub async fn pump(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.backend.handle_event(event).await;
        }
    }

    /// Drain the notifications posted so far
    pub fn notifications(&mut self) -> Vec<Notification> {
        let mut notifications = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            if let OutboundMessage::Notification(notification) = message {
                notifications.push(notification);
            }
        }
        notifications
    }

    /// Wire names of the notifications posted so far
    pub fn notification_names(&mut self) -> Vec<&'static str> {
        self.notifications().iter().map(Notification::name).collect()
    }

    /// A call the network brings up on `MODEM`, announced to the backend
    pub async fn network_call(&mut self, state: &str, number: &str) -> String {
        let path = self.provider.add_call(MODEM, state, number);
        self.backend
            .handle_event(ProviderEvent::CallAdded {
                path: path.clone(),
                properties: InMemoryProvider::call_properties(state, number),
            })
            .await;
        self.notifications();
        path.replace('/', "|")
    }

    pub fn call(&self, call_id: &str) -> CallInfo {
        self.backend
            .calls()
            .find(call_id)
            .unwrap_or_else(|| panic!("call {} not tracked", call_id))
            .to_info()
    }
}

pub fn provider_path(id: &str) -> String {
    id.replace('|', "/")
}

pub fn error_name(reply: &Reply) -> Option<&str> {
    reply.error_name()
}

pub fn return_value(reply: &Reply) -> &Value {
    assert!(!reply.is_error, "unexpected error reply: {:?}", reply);
    reply.return_value.as_ref().expect("reply carries a value")
}
