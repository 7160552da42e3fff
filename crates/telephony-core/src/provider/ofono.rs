//! oFono provider over DBus
//!
//! Method calls go through typed proxies created per request. Signals are
//! received with plain match rules on interface and member, with no path
//! filter, so calls and modems that appear later are covered without
//! re-subscribing.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};
use zbus::{proxy, Connection, MatchRule, Message, MessageStream};

use super::{
    keys, HideCallerId, PropertyMap, PropertyValue, ProviderError, ProviderEvent, ProviderResult,
    TelephonyProvider,
};
use crate::config::{BusKind, OfonoConfig};

const MANAGER_INTERFACE: &str = "org.ofono.Manager";
const MODEM_INTERFACE: &str = "org.ofono.Modem";
const VOICE_CALL_MANAGER_INTERFACE: &str = "org.ofono.VoiceCallManager";
const VOICE_CALL_INTERFACE: &str = "org.ofono.VoiceCall";

type RawProperties = HashMap<String, OwnedValue>;

#[proxy(interface = "org.ofono.Manager", default_service = "org.ofono", default_path = "/", gen_blocking = false)]
trait Manager {
    fn get_modems(&self) -> zbus::Result<Vec<(OwnedObjectPath, RawProperties)>>;
}

#[proxy(interface = "org.ofono.Modem", default_service = "org.ofono", default_path = "/", gen_blocking = false)]
trait Modem {
    fn set_property(&self, name: &str, value: &Value<'_>) -> zbus::Result<()>;
}

#[proxy(interface = "org.ofono.VoiceCallManager", default_service = "org.ofono", default_path = "/", gen_blocking = false)]
trait VoiceCallManager {
    fn get_properties(&self) -> zbus::Result<RawProperties>;

    fn get_calls(&self) -> zbus::Result<Vec<(OwnedObjectPath, RawProperties)>>;

    fn dial(&self, number: &str, hide_callerid: &str) -> zbus::Result<OwnedObjectPath>;

    fn hangup_all(&self) -> zbus::Result<()>;

    fn hold_and_answer(&self) -> zbus::Result<()>;

    fn swap_calls(&self) -> zbus::Result<()>;

    fn transfer(&self) -> zbus::Result<()>;

    fn create_multiparty(&self) -> zbus::Result<Vec<OwnedObjectPath>>;

    fn private_chat(&self, call: &zbus::zvariant::ObjectPath<'_>) -> zbus::Result<Vec<OwnedObjectPath>>;

    fn send_tones(&self, tones: &str) -> zbus::Result<()>;
}

#[proxy(interface = "org.ofono.VoiceCall", default_service = "org.ofono", default_path = "/", gen_blocking = false)]
trait VoiceCall {
    fn get_properties(&self) -> zbus::Result<RawProperties>;

    fn answer(&self) -> zbus::Result<()>;

    fn hangup(&self) -> zbus::Result<()>;

    fn deflect(&self, number: &str) -> zbus::Result<()>;
}

/// Map a DBus failure of `method` into a provider error
fn map_error(method: &'static str) -> impl FnOnce(zbus::Error) -> ProviderError {
    move |err| match err {
        zbus::Error::MethodError(name, detail, _) => {
            let message = match detail {
                Some(detail) => format!("{}: {}", name, detail),
                None => name.to_string(),
            };
            ProviderError::method(method, message)
        }
        other => ProviderError::transport(other.to_string()),
    }
}

fn transport_error(err: zbus::Error) -> ProviderError {
    ProviderError::transport(err.to_string())
}

/// Convert a DBus value into a property value; unsupported shapes yield `None`
fn property_value(value: &Value<'_>) -> Option<PropertyValue> {
    match value {
        Value::Bool(value) => Some(PropertyValue::Bool(*value)),
        Value::Str(value) => Some(PropertyValue::String(value.to_string())),
        Value::ObjectPath(value) => Some(PropertyValue::String(value.to_string())),
        Value::U8(value) => Some(PropertyValue::Int(i64::from(*value))),
        Value::I16(value) => Some(PropertyValue::Int(i64::from(*value))),
        Value::U16(value) => Some(PropertyValue::Int(i64::from(*value))),
        Value::I32(value) => Some(PropertyValue::Int(i64::from(*value))),
        Value::U32(value) => Some(PropertyValue::Int(i64::from(*value))),
        Value::I64(value) => Some(PropertyValue::Int(*value)),
        Value::U64(value) => i64::try_from(*value).ok().map(PropertyValue::Int),
        Value::Array(array) => {
            let mut strings = Vec::new();
            for item in array.iter() {
                match item {
                    Value::Str(value) => strings.push(value.to_string()),
                    _ => return None,
                }
            }
            Some(PropertyValue::StringList(strings))
        }
        Value::Value(inner) => property_value(inner),
        _ => None,
    }
}

fn property_map(raw: &RawProperties) -> PropertyMap {
    raw.iter()
        .filter_map(|(key, value)| property_value(value).map(|value| (key.clone(), value)))
        .collect()
}

fn dbus_value(value: PropertyValue) -> Value<'static> {
    match value {
        PropertyValue::Bool(value) => Value::from(value),
        PropertyValue::Int(value) => Value::from(value),
        PropertyValue::String(value) => Value::from(value),
        PropertyValue::StringList(values) => Value::from(values),
    }
}

/// oFono reached over the system or session bus
pub struct OfonoProvider {
    connection: Connection,
    service: String,
}

impl OfonoProvider {
    /// Connect to the bus named in `config`
    pub async fn connect(config: &OfonoConfig) -> ProviderResult<Self> {
        let connection = match config.bus {
            BusKind::System => Connection::system().await,
            BusKind::Session => Connection::session().await,
        }
        .map_err(transport_error)?;

        tracing::info!("Connected to {:?} bus for {}", config.bus, config.service);
        Ok(Self {
            connection,
            service: config.service.clone(),
        })
    }

    /// Start forwarding oFono signals as provider events.
    ///
    /// Each subscription runs in its own task until the receiver goes away.
    pub async fn subscribe(&self, events: mpsc::UnboundedSender<ProviderEvent>) -> ProviderResult<Vec<JoinHandle<()>>> {
        let subscriptions: [(&'static str, &'static str, SignalDecoder); 8] = [
            (MANAGER_INTERFACE, "ModemAdded", decode_modem_added),
            (MANAGER_INTERFACE, "ModemRemoved", decode_modem_removed),
            (MODEM_INTERFACE, "PropertyChanged", decode_modem_property),
            (VOICE_CALL_MANAGER_INTERFACE, "CallAdded", decode_call_added),
            (VOICE_CALL_MANAGER_INTERFACE, "CallRemoved", decode_call_removed),
            (VOICE_CALL_MANAGER_INTERFACE, "PropertyChanged", decode_call_manager_property),
            (VOICE_CALL_INTERFACE, "PropertyChanged", decode_call_property),
            (VOICE_CALL_INTERFACE, "DisconnectReason", decode_disconnect_reason),
        ];

        let mut tasks = Vec::with_capacity(subscriptions.len());
        for (interface, member, decode) in subscriptions {
            let rule = MatchRule::builder()
                .msg_type(zbus::message::Type::Signal)
                .sender(self.service.as_str())
                .and_then(|builder| builder.interface(interface))
                .and_then(|builder| builder.member(member))
                .map_err(transport_error)?
                .build();
            let mut stream = MessageStream::for_match_rule(rule, &self.connection, None)
                .await
                .map_err(transport_error)?;
            let events = events.clone();

            tasks.push(tokio::spawn(async move {
                tracing::debug!("Listening for {}.{}", interface, member);
                while let Some(message) = stream.next().await {
                    let message = match message {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::warn!("Signal stream {}.{} failed: {}", interface, member, e);
                            continue;
                        }
                    };
                    let Some(event) = decode(&message) else {
                        tracing::debug!("Undecodable {}.{} signal", interface, member);
                        continue;
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
                tracing::debug!("Stopped listening for {}.{}", interface, member);
            }));
        }
        Ok(tasks)
    }

    async fn manager(&self) -> ProviderResult<ManagerProxy<'static>> {
        ManagerProxy::builder(&self.connection)
            .destination(self.service.clone())
            .map_err(transport_error)?
            .build()
            .await
            .map_err(transport_error)
    }

    async fn modem(&self, path: &str) -> ProviderResult<ModemProxy<'static>> {
        ModemProxy::builder(&self.connection)
            .destination(self.service.clone())
            .and_then(|builder| builder.path(path.to_string()))
            .map_err(transport_error)?
            .build()
            .await
            .map_err(transport_error)
    }

    async fn call_manager(&self, modem: &str) -> ProviderResult<VoiceCallManagerProxy<'static>> {
        VoiceCallManagerProxy::builder(&self.connection)
            .destination(self.service.clone())
            .and_then(|builder| builder.path(modem.to_string()))
            .map_err(transport_error)?
            .build()
            .await
            .map_err(transport_error)
    }

    async fn voice_call(&self, call: &str) -> ProviderResult<VoiceCallProxy<'static>> {
        VoiceCallProxy::builder(&self.connection)
            .destination(self.service.clone())
            .and_then(|builder| builder.path(call.to_string()))
            .map_err(transport_error)?
            .build()
            .await
            .map_err(transport_error)
    }
}

fn object_paths(paths: Vec<OwnedObjectPath>) -> Vec<String> {
    paths.into_iter().map(|path| path.as_str().to_string()).collect()
}

fn object_list(objects: Vec<(OwnedObjectPath, RawProperties)>) -> Vec<(String, PropertyMap)> {
    objects
        .into_iter()
        .map(|(path, raw)| (path.as_str().to_string(), property_map(&raw)))
        .collect()
}

#[async_trait]
impl TelephonyProvider for OfonoProvider {
    async fn get_modems(&self) -> ProviderResult<Vec<(String, PropertyMap)>> {
        let modems = self.manager().await?.get_modems().await.map_err(map_error("GetModems"))?;
        Ok(object_list(modems))
    }

    async fn set_modem_property(&self, modem: &str, key: &str, value: PropertyValue) -> ProviderResult<()> {
        self.modem(modem)
            .await?
            .set_property(key, &dbus_value(value))
            .await
            .map_err(map_error("SetProperty"))
    }

    async fn get_calls(&self, modem: &str) -> ProviderResult<Vec<(String, PropertyMap)>> {
        let calls = self.call_manager(modem).await?.get_calls().await.map_err(map_error("GetCalls"))?;
        Ok(object_list(calls))
    }

    async fn get_call_properties(&self, call: &str) -> ProviderResult<PropertyMap> {
        let raw = self
            .voice_call(call)
            .await?
            .get_properties()
            .await
            .map_err(map_error("GetProperties"))?;
        Ok(property_map(&raw))
    }

    async fn dial(&self, modem: &str, number: &str, hide_caller_id: HideCallerId) -> ProviderResult<String> {
        let path = self
            .call_manager(modem)
            .await?
            .dial(number, hide_caller_id.as_str())
            .await
            .map_err(map_error("Dial"))?;
        Ok(path.as_str().to_string())
    }

    async fn answer(&self, call: &str) -> ProviderResult<()> {
        self.voice_call(call).await?.answer().await.map_err(map_error("Answer"))
    }

    async fn hangup(&self, call: &str) -> ProviderResult<()> {
        self.voice_call(call).await?.hangup().await.map_err(map_error("Hangup"))
    }

    async fn deflect(&self, call: &str, number: &str) -> ProviderResult<()> {
        self.voice_call(call).await?.deflect(number).await.map_err(map_error("Deflect"))
    }

    async fn hangup_all(&self, modem: &str) -> ProviderResult<()> {
        self.call_manager(modem).await?.hangup_all().await.map_err(map_error("HangupAll"))
    }

    async fn hold_and_answer(&self, modem: &str) -> ProviderResult<()> {
        self.call_manager(modem)
            .await?
            .hold_and_answer()
            .await
            .map_err(map_error("HoldAndAnswer"))
    }

    async fn swap_calls(&self, modem: &str) -> ProviderResult<()> {
        self.call_manager(modem).await?.swap_calls().await.map_err(map_error("SwapCalls"))
    }

    async fn transfer(&self, modem: &str) -> ProviderResult<()> {
        self.call_manager(modem).await?.transfer().await.map_err(map_error("Transfer"))
    }

    async fn create_multiparty(&self, modem: &str) -> ProviderResult<Vec<String>> {
        let members = self
            .call_manager(modem)
            .await?
            .create_multiparty()
            .await
            .map_err(map_error("CreateMultiparty"))?;
        Ok(object_paths(members))
    }

    async fn private_chat(&self, modem: &str, call: &str) -> ProviderResult<Vec<String>> {
        let call_path = zbus::zvariant::ObjectPath::try_from(call).map_err(|e| ProviderError::transport(e.to_string()))?;
        let remaining = self
            .call_manager(modem)
            .await?
            .private_chat(&call_path)
            .await
            .map_err(map_error("PrivateChat"))?;
        Ok(object_paths(remaining))
    }

    async fn send_tones(&self, modem: &str, tones: &str) -> ProviderResult<()> {
        self.call_manager(modem).await?.send_tones(tones).await.map_err(map_error("SendTones"))
    }

    async fn get_emergency_numbers(&self, modem: &str) -> ProviderResult<Vec<String>> {
        let raw = self
            .call_manager(modem)
            .await?
            .get_properties()
            .await
            .map_err(map_error("GetProperties"))?;
        let numbers = property_map(&raw)
            .remove(keys::EMERGENCY_NUMBERS)
            .and_then(|value| value.as_string_list().map(<[String]>::to_vec))
            .unwrap_or_default();
        Ok(numbers)
    }
}

type SignalDecoder = fn(&Message) -> Option<ProviderEvent>;

fn signal_path(message: &Message) -> Option<String> {
    message.header().path().map(|path| path.as_str().to_string())
}

fn decode_property_change(message: &Message) -> Option<(String, String, PropertyValue)> {
    let path = signal_path(message)?;
    let (key, value): (String, OwnedValue) = message.body().deserialize().ok()?;
    let value = property_value(&value)?;
    Some((path, key, value))
}

fn decode_modem_added(message: &Message) -> Option<ProviderEvent> {
    let (path, raw): (OwnedObjectPath, RawProperties) = message.body().deserialize().ok()?;
    Some(ProviderEvent::ModemAdded {
        path: path.as_str().to_string(),
        properties: property_map(&raw),
    })
}

fn decode_modem_removed(message: &Message) -> Option<ProviderEvent> {
    let path: OwnedObjectPath = message.body().deserialize().ok()?;
    Some(ProviderEvent::ModemRemoved {
        path: path.as_str().to_string(),
    })
}

fn decode_modem_property(message: &Message) -> Option<ProviderEvent> {
    let (path, key, value) = decode_property_change(message)?;
    Some(ProviderEvent::ModemPropertyChanged { path, key, value })
}

fn decode_call_added(message: &Message) -> Option<ProviderEvent> {
    let (path, raw): (OwnedObjectPath, RawProperties) = message.body().deserialize().ok()?;
    Some(ProviderEvent::CallAdded {
        path: path.as_str().to_string(),
        properties: property_map(&raw),
    })
}

fn decode_call_removed(message: &Message) -> Option<ProviderEvent> {
    let path: OwnedObjectPath = message.body().deserialize().ok()?;
    Some(ProviderEvent::CallRemoved {
        path: path.as_str().to_string(),
    })
}

fn decode_call_manager_property(message: &Message) -> Option<ProviderEvent> {
    let (modem, key, value) = decode_property_change(message)?;
    Some(ProviderEvent::CallManagerPropertyChanged { modem, key, value })
}

fn decode_call_property(message: &Message) -> Option<ProviderEvent> {
    let (path, key, value) = decode_property_change(message)?;
    Some(ProviderEvent::CallPropertyChanged { path, key, value })
}

fn decode_disconnect_reason(message: &Message) -> Option<ProviderEvent> {
    let path = signal_path(message)?;
    let reason: String = message.body().deserialize().ok()?;
    Some(ProviderEvent::CallDisconnectReason { path, reason })
}
