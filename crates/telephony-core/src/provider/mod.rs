//! Remote telephony provider boundary
//!
//! The backend never talks to the modem stack directly. Everything it needs
//! is expressed by [`TelephonyProvider`] (request/response operations) and
//! [`ProviderEvent`] (signals posted asynchronously by the provider). Paths
//! passed across this boundary are provider object paths, not opaque ids.
//!
//! Two implementations ship with the crate:
//!
//! - [`memory::InMemoryProvider`], a scripted modem used by tests and by the
//!   CLI simulation mode
//! - `ofono::OfonoProvider` (feature `ofono`), backed by oFono over DBus

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
#[cfg(feature = "ofono")]
pub mod ofono;

/// Property keys shared by the provider implementations.
pub mod keys {
    pub const POWERED: &str = "Powered";
    pub const ONLINE: &str = "Online";
    pub const LOCKDOWN: &str = "Lockdown";
    pub const EMERGENCY: &str = "Emergency";
    pub const MANUFACTURER: &str = "Manufacturer";
    pub const NAME: &str = "Name";
    pub const MODEL: &str = "Model";
    pub const REVISION: &str = "Revision";
    pub const SERIAL: &str = "Serial";
    pub const TYPE: &str = "Type";

    pub const STATE: &str = "State";
    pub const START_TIME: &str = "StartTime";
    pub const LINE_IDENTIFICATION: &str = "LineIdentification";
    pub const MULTIPARTY: &str = "Multiparty";

    pub const EMERGENCY_NUMBERS: &str = "EmergencyNumbers";
}

/// A property value as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    String(String),
    StringList(Vec<String>),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_string_list(&self) -> Option<&[String]> {
        match self {
            PropertyValue::StringList(values) => Some(values),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(value) => write!(f, "{}", value),
            PropertyValue::Int(value) => write!(f, "{}", value),
            PropertyValue::String(value) => write!(f, "{:?}", value),
            PropertyValue::StringList(values) => write!(f, "{:?}", values),
        }
    }
}

/// Property snapshot keyed by provider property name.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// Caller-id presentation requested on dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HideCallerId {
    /// Network default
    #[default]
    Default,
    Enabled,
    Disabled,
}

impl HideCallerId {
    pub fn as_str(&self) -> &'static str {
        match self {
            HideCallerId::Default => "default",
            HideCallerId::Enabled => "enabled",
            HideCallerId::Disabled => "disabled",
        }
    }
}

impl From<Option<bool>> for HideCallerId {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => HideCallerId::Default,
            Some(true) => HideCallerId::Enabled,
            Some(false) => HideCallerId::Disabled,
        }
    }
}

/// Signals posted by the provider, independent of any request.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    ModemAdded { path: String, properties: PropertyMap },
    ModemRemoved { path: String },
    ModemPropertyChanged { path: String, key: String, value: PropertyValue },
    CallAdded { path: String, properties: PropertyMap },
    CallRemoved { path: String },
    CallPropertyChanged { path: String, key: String, value: PropertyValue },
    CallDisconnectReason { path: String, reason: String },
    /// A voice-call-manager property changed on `modem`.
    CallManagerPropertyChanged { modem: String, key: String, value: PropertyValue },
}

/// Errors returned by provider operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The transport to the provider failed
    #[error("Provider transport error: {message}")]
    Transport { message: String },

    /// The remote method returned an error
    #[error("{method} failed: {message}")]
    Method { method: String, message: String },

    /// The object path is unknown to the provider
    #[error("Unknown provider object: {path}")]
    UnknownObject { path: String },
}

impl ProviderError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    pub fn method(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Method {
            method: method.into(),
            message: message.into(),
        }
    }

    pub fn unknown_object(path: impl Into<String>) -> Self {
        Self::UnknownObject { path: path.into() }
    }
}

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Request/response surface of the remote telephony provider.
///
/// Every operation blocks the calling handler until the provider replies.
/// `modem` and `call` are provider object paths.
#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    /// List all modems with their full property snapshots
    async fn get_modems(&self) -> ProviderResult<Vec<(String, PropertyMap)>>;

    /// Set one modem property
    async fn set_modem_property(&self, modem: &str, key: &str, value: PropertyValue) -> ProviderResult<()>;

    /// List the calls of a modem with their property snapshots
    async fn get_calls(&self, modem: &str) -> ProviderResult<Vec<(String, PropertyMap)>>;

    /// Fetch the property snapshot of one call
    async fn get_call_properties(&self, call: &str) -> ProviderResult<PropertyMap>;

    /// Place a call and return the new call path
    async fn dial(&self, modem: &str, number: &str, hide_caller_id: HideCallerId) -> ProviderResult<String>;

    async fn answer(&self, call: &str) -> ProviderResult<()>;

    async fn hangup(&self, call: &str) -> ProviderResult<()>;

    async fn deflect(&self, call: &str, number: &str) -> ProviderResult<()>;

    async fn hangup_all(&self, modem: &str) -> ProviderResult<()>;

    async fn hold_and_answer(&self, modem: &str) -> ProviderResult<()>;

    async fn swap_calls(&self, modem: &str) -> ProviderResult<()>;

    async fn transfer(&self, modem: &str) -> ProviderResult<()>;

    /// Merge the active and held calls; returns the member call paths
    async fn create_multiparty(&self, modem: &str) -> ProviderResult<Vec<String>>;

    /// Split `call` out of the multiparty; returns the remaining member paths
    async fn private_chat(&self, modem: &str, call: &str) -> ProviderResult<Vec<String>>;

    async fn send_tones(&self, modem: &str, tones: &str) -> ProviderResult<()>;

    async fn get_emergency_numbers(&self, modem: &str) -> ProviderResult<Vec<String>>;
}
