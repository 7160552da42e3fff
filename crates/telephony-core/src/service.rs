//! Telephony service (modem) records

use serde::Serialize;

use crate::provider::{keys, PropertyMap, PropertyValue};

/// Protocol reported for every service and call
pub const PROTOCOL_GSM: &str = "gsm";

/// Kind of modem backing a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Hw,
    Hfp,
    Sap,
    #[default]
    Unknown,
}

impl ServiceType {
    /// Map the provider's modem type string
    pub fn from_provider(value: &str) -> Self {
        match value {
            "hardware" => ServiceType::Hw,
            "hfp" => ServiceType::Hfp,
            "sap" => ServiceType::Sap,
            _ => ServiceType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Hw => "hw",
            ServiceType::Hfp => "hfp",
            ServiceType::Sap => "sap",
            ServiceType::Unknown => "unknown",
        }
    }
}

/// Externally visible service fields reported in `serviceChanged`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceField {
    Enabled,
    Emergency,
    Name,
    Type,
}

impl ServiceField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceField::Enabled => "enabled",
            ServiceField::Emergency => "emergency",
            ServiceField::Name => "name",
            ServiceField::Type => "type",
        }
    }
}

/// One modem / subscriber identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelephonyService {
    pub id: String,
    pub name: String,
    pub service_type: ServiceType,
    pub model: String,
    pub revision: String,
    pub serial: String,
    pub protocol: String,
    pub provider: String,
    pub emergency: bool,
    pub powered: bool,
    pub online: bool,
    pub lockdown: bool,
}

impl TelephonyService {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            service_type: ServiceType::Unknown,
            model: String::new(),
            revision: String::new(),
            serial: String::new(),
            protocol: PROTOCOL_GSM.to_string(),
            provider: String::new(),
            emergency: false,
            powered: false,
            online: false,
            lockdown: false,
        }
    }

    /// Usable for calls
    pub fn is_enabled(&self) -> bool {
        self.powered && self.online
    }

    /// Merge a full property snapshot
    pub fn apply_properties(&mut self, properties: &PropertyMap) {
        for (key, value) in properties {
            self.update_property(key, value);
        }
    }

    /// Apply one provider property.
    ///
    /// Returns the externally visible field that changed, if the property is
    /// observable at all. `Lockdown` and unknown keys are stored or ignored
    /// silently.
    pub fn update_property(&mut self, key: &str, value: &PropertyValue) -> Option<ServiceField> {
        match key {
            keys::POWERED => {
                self.powered = value.as_bool()?;
                Some(ServiceField::Enabled)
            }
            keys::ONLINE => {
                self.online = value.as_bool()?;
                Some(ServiceField::Enabled)
            }
            keys::EMERGENCY => {
                self.emergency = value.as_bool()?;
                Some(ServiceField::Emergency)
            }
            keys::LOCKDOWN => {
                if let Some(lockdown) = value.as_bool() {
                    self.lockdown = lockdown;
                }
                None
            }
            keys::MANUFACTURER => {
                self.provider = value.as_str()?.to_string();
                Some(ServiceField::Name)
            }
            keys::NAME => {
                self.name = value.as_str()?.to_string();
                Some(ServiceField::Name)
            }
            keys::MODEL => {
                self.model = value.as_str()?.to_string();
                Some(ServiceField::Name)
            }
            keys::REVISION => {
                self.revision = value.as_str()?.to_string();
                Some(ServiceField::Name)
            }
            keys::SERIAL => {
                self.serial = value.as_str()?.to_string();
                Some(ServiceField::Name)
            }
            keys::TYPE => {
                self.service_type = ServiceType::from_provider(value.as_str()?);
                Some(ServiceField::Type)
            }
            _ => None,
        }
    }

    /// Name shown to JavaScript; falls back to the device identity when the
    /// modem has no friendly name
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        [&self.provider, &self.model, &self.revision, &self.serial]
            .iter()
            .filter(|part| !part.is_empty())
            .map(|part| part.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn to_info(&self) -> ServiceInfo {
        ServiceInfo {
            service_id: self.id.clone(),
            name: self.display_name(),
            service_type: self.service_type,
            enabled: self.is_enabled(),
            provider: self.provider.clone(),
            protocol: self.protocol.clone(),
            emergency: self.emergency,
        }
    }
}

/// Wire form of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub service_id: String,
    pub name: String,
    pub service_type: ServiceType,
    pub enabled: bool,
    pub provider: String,
    pub protocol: String,
    pub emergency: bool,
}
