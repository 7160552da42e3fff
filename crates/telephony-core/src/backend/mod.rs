//! Telephony backend
//!
//! [`TelephonyBackend`] owns every piece of mutable state: both registries,
//! the active call and the notification switch. It is driven one message at
//! a time, either an inbound request ([`dispatch`]) or a provider signal
//! ([`TelephonyBackend::handle_event`]), and is normally hosted by the task
//! started from [`runtime::spawn_backend`].
//!
//! Handlers never keep references into the registries across a provider
//! round-trip; ids are looked up again afterwards.

mod calls;
pub mod dispatch;
pub mod runtime;
mod services;

use std::sync::Arc;

use crate::call::CallInfo;
use crate::error::TelephonyResult;
use crate::ids;
use crate::notify::Notifier;
use crate::provider::{ProviderEvent, TelephonyProvider};
use crate::registry::{CallRegistry, ServiceRegistry};
use crate::service::ServiceInfo;

pub use runtime::{spawn_backend, BackendHandle, BackendRuntime};

/// Call and service state tracker sitting between the provider and the page
pub struct TelephonyBackend {
    provider: Arc<dyn TelephonyProvider>,
    services: ServiceRegistry,
    calls: CallRegistry,
    active_call: Option<String>,
    notifier: Notifier,
}

impl TelephonyBackend {
    pub fn new(provider: Arc<dyn TelephonyProvider>, notifier: Notifier) -> Self {
        Self {
            provider,
            services: ServiceRegistry::new(),
            calls: CallRegistry::new(),
            active_call: None,
            notifier,
        }
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn calls(&self) -> &CallRegistry {
        &self.calls
    }

    pub fn active_call_id(&self) -> Option<&str> {
        self.active_call.as_deref()
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notifier.is_enabled()
    }

    /// Load services and the calls already present on them
    pub async fn start(&mut self) -> TelephonyResult<()> {
        self.refresh_services().await?;

        let service_ids: Vec<String> = self.services.iter().map(|service| service.id.clone()).collect();
        for service_id in service_ids {
            if let Err(e) = self.seed_calls(&service_id).await {
                tracing::warn!("Failed to list calls of {}: {}", service_id, e);
            }
        }

        if !self.calls.is_empty() {
            self.update_active_call(None);
        }
        tracing::info!(
            "Telephony backend ready with {} services and {} calls",
            self.services.len(),
            self.calls.len()
        );
        Ok(())
    }

    /// Apply one provider signal
    pub async fn handle_event(&mut self, event: ProviderEvent) {
        tracing::trace!("Handling provider event: {:?}", event);

        match event {
            ProviderEvent::ModemAdded { path, properties } => {
                self.on_service_added(&ids::to_opaque(&path), &properties);
            }
            ProviderEvent::ModemRemoved { path } => {
                self.on_service_removed(&ids::to_opaque(&path));
            }
            ProviderEvent::ModemPropertyChanged { path, key, value } => {
                self.on_service_property_changed(&ids::to_opaque(&path), &key, &value);
            }
            ProviderEvent::CallAdded { path, properties } => {
                self.on_call_added(&ids::to_opaque(&path), &properties).await;
            }
            ProviderEvent::CallRemoved { path } => {
                self.on_call_removed(&ids::to_opaque(&path));
            }
            ProviderEvent::CallPropertyChanged { path, key, value } => {
                self.on_call_property_changed(&ids::to_opaque(&path), &key, &value);
            }
            ProviderEvent::CallDisconnectReason { path, reason } => {
                self.on_call_disconnect_reason(&ids::to_opaque(&path), &reason);
            }
            ProviderEvent::CallManagerPropertyChanged { modem, key, value } => {
                self.on_call_manager_property_changed(&ids::to_opaque(&modem), &key, &value);
            }
        }
    }

    pub(crate) fn service_infos(&self) -> Vec<ServiceInfo> {
        self.services.iter().map(|service| service.to_info()).collect()
    }

    pub(crate) fn call_infos(&self) -> Vec<CallInfo> {
        self.calls.iter().map(|call| call.to_info()).collect()
    }
}
