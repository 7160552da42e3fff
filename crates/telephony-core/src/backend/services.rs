//! Service registry maintenance and service-level operations

use crate::error::{TelephonyError, TelephonyResult};
use crate::ids;
use crate::notify::Notification;
use crate::provider::{keys, PropertyMap, PropertyValue};
use crate::validation;

use super::TelephonyBackend;

impl TelephonyBackend {
    /// Reload every service from the provider.
    ///
    /// On provider failure the registry is left untouched.
    pub(crate) async fn refresh_services(&mut self) -> TelephonyResult<()> {
        let modems = self.provider.get_modems().await.map_err(|e| {
            tracing::warn!("Failed to list modems: {}", e);
            e
        })?;

        for (path, properties) in &modems {
            self.services.upsert(&ids::to_opaque(path), properties);
        }
        tracing::debug!("Refreshed {} services", modems.len());

        self.ensure_default_service();
        Ok(())
    }

    /// Pick a default service when there is none, announcing the choice
    fn ensure_default_service(&mut self) {
        let Some(default_id) = self.services.ensure_default().map(str::to_string) else {
            return;
        };
        tracing::info!("Default service is now {}", default_id);
        self.notify_default_service();
    }

    fn notify_default_service(&self) {
        let service = self.services.default_service().map(|service| service.to_info());
        self.notifier.notify(Notification::DefaultServiceChanged { service });
    }

    /// Resolve an optional service id to a known service, falling back to the
    /// default
    pub(crate) fn resolve_service(&self, service_id: Option<&str>) -> TelephonyResult<String> {
        let service_id = match service_id {
            Some(service_id) => service_id,
            None => self
                .services
                .default_id()
                .ok_or_else(|| TelephonyError::not_allowed("No default service"))?,
        };
        if !self.services.contains(service_id) {
            return Err(TelephonyError::unknown_service(service_id));
        }
        Ok(service_id.to_string())
    }

    /// Resolve a service that must be usable for calls
    pub(crate) fn resolve_enabled_service(&self, service_id: Option<&str>) -> TelephonyResult<String> {
        let service_id = self.resolve_service(service_id)?;
        match self.services.find(&service_id) {
            Some(service) if service.is_enabled() => Ok(service_id),
            _ => Err(TelephonyError::not_allowed(format!("Service {} is not enabled", service_id))),
        }
    }

    /// Power a service up or down: `Powered` first, then `Online`.
    ///
    /// The first failure aborts; an already applied `Powered` is not rolled
    /// back.
    pub(crate) async fn set_service_enabled(&mut self, service_id: &str, enabled: bool) -> TelephonyResult<()> {
        let service_id = self.resolve_service(Some(service_id))?;
        let path = ids::to_provider(&service_id);

        for key in [keys::POWERED, keys::ONLINE] {
            if let Err(e) = self.provider.set_modem_property(&path, key, enabled.into()).await {
                tracing::warn!("Failed to set {} on {}: {}", key, service_id, e);
                return Err(e.into());
            }
        }
        tracing::info!("Service {} {}", service_id, if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Make `service_id` the default, enabling it first if needed
    pub(crate) async fn set_default_service(&mut self, service_id: &str) -> TelephonyResult<()> {
        let service_id = self.resolve_service(Some(service_id))?;
        let online = self.services.find(&service_id).map(|service| service.online).unwrap_or(false);
        if !online {
            self.set_service_enabled(&service_id, true).await?;
        }

        tracing::info!("Default service set to {}", service_id);
        self.services.set_default(Some(service_id));
        Ok(())
    }

    pub(crate) async fn get_emergency_numbers(&mut self, service_id: Option<&str>) -> TelephonyResult<Vec<String>> {
        let service_id = self.resolve_service(service_id)?;
        Ok(self.provider.get_emergency_numbers(&ids::to_provider(&service_id)).await?)
    }

    pub(crate) async fn send_tones(&mut self, service_id: Option<&str>, tones: &str) -> TelephonyResult<()> {
        validation::validate_tones(tones)?;
        let service_id = self.resolve_enabled_service(service_id)?;
        Ok(self.provider.send_tones(&ids::to_provider(&service_id), tones).await?)
    }

    pub(crate) fn on_service_added(&mut self, service_id: &str, properties: &PropertyMap) {
        if !self.services.upsert(service_id, properties) {
            tracing::debug!("Service {} re-announced", service_id);
            return;
        }

        tracing::info!("Service {} added", service_id);
        if let Some(service) = self.services.find(service_id) {
            self.notifier.notify(Notification::ServiceAdded {
                service: service.to_info(),
            });
        }
        self.ensure_default_service();
    }

    pub(crate) fn on_service_removed(&mut self, service_id: &str) {
        let was_default = self.services.default_id() == Some(service_id);
        let Some(service) = self.services.remove(service_id) else {
            tracing::debug!("Ignoring removal of unknown service {}", service_id);
            return;
        };

        tracing::info!("Service {} removed", service_id);
        self.notifier.notify(Notification::ServiceRemoved {
            service: service.to_info(),
        });

        if was_default {
            let promoted = self.services.ensure_default().map(str::to_string);
            tracing::info!("Default service is now {:?}", promoted);
            self.notify_default_service();
        }
    }

    pub(crate) fn on_service_property_changed(&mut self, service_id: &str, key: &str, value: &PropertyValue) {
        let Some(service) = self.services.find_mut(service_id) else {
            tracing::debug!("Property {} changed on unknown service {}", key, service_id);
            return;
        };

        let Some(field) = service.update_property(key, value) else {
            return;
        };
        tracing::debug!("Service {} {} = {}", service_id, key, value);
        self.notifier.notify(Notification::ServiceChanged {
            service: service.to_info(),
            changed_fields: vec![field],
        });
    }

    pub(crate) fn on_call_manager_property_changed(&mut self, service_id: &str, key: &str, value: &PropertyValue) {
        if key != keys::EMERGENCY_NUMBERS {
            return;
        }
        let Some(numbers) = value.as_string_list() else {
            tracing::debug!("Ignoring malformed {} on {}", key, service_id);
            return;
        };
        self.notifier.notify(Notification::EmergencyNumbersChanged {
            numbers: numbers.to_vec(),
        });
    }
}
