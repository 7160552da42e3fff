//! Service registry

use crate::provider::PropertyMap;
use crate::service::TelephonyService;

/// Known services plus the default-service selection.
///
/// A device carries a handful of modems at most, so lookups are linear.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: Vec<TelephonyService>,
    default_id: Option<String>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, id: &str) -> Option<&TelephonyService> {
        self.services.iter().find(|service| service.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut TelephonyService> {
        self.services.iter_mut().find(|service| service.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TelephonyService> {
        self.services.iter()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Create or update the service `id` from a property snapshot.
    ///
    /// Returns `true` when the service was created.
    pub fn upsert(&mut self, id: &str, properties: &PropertyMap) -> bool {
        if let Some(service) = self.find_mut(id) {
            service.apply_properties(properties);
            return false;
        }

        let mut service = TelephonyService::new(id);
        service.apply_properties(properties);
        self.services.push(service);
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<TelephonyService> {
        let index = self.services.iter().position(|service| service.id == id)?;
        let removed = self.services.remove(index);
        if self.default_id.as_deref() == Some(id) {
            self.default_id = None;
        }
        Some(removed)
    }

    pub fn default_id(&self) -> Option<&str> {
        self.default_id.as_deref()
    }

    pub fn default_service(&self) -> Option<&TelephonyService> {
        self.default_id.as_deref().and_then(|id| self.find(id))
    }

    pub fn set_default(&mut self, id: Option<String>) {
        self.default_id = id;
    }

    /// Make the first service the default when none is selected.
    ///
    /// Returns the newly selected id.
    pub fn ensure_default(&mut self) -> Option<&str> {
        if self.default_id.is_some() {
            return None;
        }
        self.default_id = self.services.first().map(|service| service.id.clone());
        self.default_id.as_deref()
    }
}
