//! Outbound messages: replies and push notifications
//!
//! Everything the backend sends to the JavaScript side goes through the
//! [`Notifier`]. Replies are always delivered; notifications only while the
//! page has asked for them.

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::call::{CallField, CallInfo};
use crate::protocol::Reply;
use crate::service::{ServiceField, ServiceInfo};

/// Push notifications posted to the JavaScript side
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum Notification {
    DefaultServiceChanged {
        service: Option<ServiceInfo>,
    },
    ServiceAdded {
        service: ServiceInfo,
    },
    ServiceChanged {
        service: ServiceInfo,
        #[serde(rename = "changedFields")]
        changed_fields: Vec<ServiceField>,
    },
    ServiceRemoved {
        service: ServiceInfo,
    },
    CallAdded {
        call: CallInfo,
    },
    CallChanged {
        call: CallInfo,
        #[serde(rename = "changedFields")]
        changed_fields: Vec<CallField>,
    },
    CallStateChanged {
        call: CallInfo,
        #[serde(rename = "changedFields")]
        changed_fields: Vec<CallField>,
    },
    CallRemoved {
        call: CallInfo,
    },
    ActiveCallChanged {
        call: Option<CallInfo>,
    },
    EmergencyNumbersChanged {
        numbers: Vec<String>,
    },
}

impl Notification {
    /// Wire name of the notification
    pub fn name(&self) -> &'static str {
        match self {
            Notification::DefaultServiceChanged { .. } => "defaultServiceChanged",
            Notification::ServiceAdded { .. } => "serviceAdded",
            Notification::ServiceChanged { .. } => "serviceChanged",
            Notification::ServiceRemoved { .. } => "serviceRemoved",
            Notification::CallAdded { .. } => "callAdded",
            Notification::CallChanged { .. } => "callChanged",
            Notification::CallStateChanged { .. } => "callStateChanged",
            Notification::CallRemoved { .. } => "callRemoved",
            Notification::ActiveCallChanged { .. } => "activeCallChanged",
            Notification::EmergencyNumbersChanged { .. } => "emergencyNumbersChanged",
        }
    }
}

/// Anything written to the outbound stream
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Reply(Reply),
    Notification(Notification),
}

/// Delivers replies and gated notifications
#[derive(Debug)]
pub struct Notifier {
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    enabled: bool,
}

impl Notifier {
    pub fn new(outbound: mpsc::UnboundedSender<OutboundMessage>, enabled: bool) -> Self {
        Self { outbound, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            tracing::info!("Notifications {}", if enabled { "enabled" } else { "disabled" });
        }
        self.enabled = enabled;
    }

    /// Post a notification if notifications are enabled
    pub fn notify(&self, notification: Notification) {
        if !self.enabled {
            tracing::trace!("Dropping {} notification, notifications disabled", notification.name());
            return;
        }
        tracing::debug!("Posting {} notification", notification.name());
        self.send(OutboundMessage::Notification(notification));
    }

    /// Deliver a reply, to the waiting requester when there is one
    pub fn reply(&self, reply: Reply, reply_to: Option<oneshot::Sender<Reply>>) {
        match reply_to {
            Some(reply_to) => {
                if reply_to.send(reply).is_err() {
                    tracing::debug!("Requester went away before the reply");
                }
            }
            None => self.send(OutboundMessage::Reply(reply)),
        }
    }

    fn send(&self, message: OutboundMessage) {
        if self.outbound.send(message).is_err() {
            tracing::warn!("Outbound channel closed, message dropped");
        }
    }
}
