//! In-memory telephony provider
//!
//! Behaves like a single oFono daemon holding a few modems: operations mutate
//! the modeled modem/call state and, when an event sender is attached, post
//! the signals a real modem would emit. Every operation is recorded so tests
//! can assert exactly which provider calls were issued.

use std::collections::HashSet;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    keys, HideCallerId, PropertyMap, PropertyValue, ProviderError, ProviderEvent, ProviderResult,
    TelephonyProvider,
};

/// One recorded provider request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOperation {
    GetModems,
    SetModemProperty { modem: String, key: String, value: PropertyValue },
    GetCalls { modem: String },
    GetCallProperties { call: String },
    Dial { modem: String, number: String, hide_caller_id: HideCallerId },
    Answer { call: String },
    Hangup { call: String },
    Deflect { call: String, number: String },
    HangupAll { modem: String },
    HoldAndAnswer { modem: String },
    SwapCalls { modem: String },
    Transfer { modem: String },
    CreateMultiparty { modem: String },
    PrivateChat { modem: String, call: String },
    SendTones { modem: String, tones: String },
    GetEmergencyNumbers { modem: String },
}

impl ProviderOperation {
    /// Method name used for failure injection
    pub fn method(&self) -> &'static str {
        match self {
            ProviderOperation::GetModems => "GetModems",
            ProviderOperation::SetModemProperty { .. } => "SetProperty",
            ProviderOperation::GetCalls { .. } => "GetCalls",
            ProviderOperation::GetCallProperties { .. } => "GetProperties",
            ProviderOperation::Dial { .. } => "Dial",
            ProviderOperation::Answer { .. } => "Answer",
            ProviderOperation::Hangup { .. } => "Hangup",
            ProviderOperation::Deflect { .. } => "Deflect",
            ProviderOperation::HangupAll { .. } => "HangupAll",
            ProviderOperation::HoldAndAnswer { .. } => "HoldAndAnswer",
            ProviderOperation::SwapCalls { .. } => "SwapCalls",
            ProviderOperation::Transfer { .. } => "Transfer",
            ProviderOperation::CreateMultiparty { .. } => "CreateMultiparty",
            ProviderOperation::PrivateChat { .. } => "PrivateChat",
            ProviderOperation::SendTones { .. } => "SendTones",
            ProviderOperation::GetEmergencyNumbers { .. } => "GetEmergencyNumbers",
        }
    }
}

#[derive(Debug, Clone)]
struct ModeledCall {
    modem: String,
    properties: PropertyMap,
}

impl ModeledCall {
    fn state(&self) -> &str {
        self.properties
            .get(keys::STATE)
            .and_then(PropertyValue::as_str)
            .unwrap_or("")
    }

    fn is_multiparty(&self) -> bool {
        self.properties
            .get(keys::MULTIPARTY)
            .and_then(PropertyValue::as_bool)
            .unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct ModemState {
    modems: IndexMap<String, PropertyMap>,
    calls: IndexMap<String, ModeledCall>,
    emergency_numbers: Vec<String>,
    next_call: u32,
    operations: Vec<ProviderOperation>,
    failing: HashSet<String>,
    events: Vec<ProviderEvent>,
}

impl ModemState {
    fn record(&mut self, operation: ProviderOperation) -> ProviderResult<()> {
        let method = operation.method();
        self.operations.push(operation);
        if self.failing.contains(method) {
            return Err(ProviderError::method(method, "org.ofono.Error.Failed"));
        }
        Ok(())
    }

    fn require_modem(&self, modem: &str) -> ProviderResult<()> {
        if self.modems.contains_key(modem) {
            Ok(())
        } else {
            Err(ProviderError::unknown_object(modem))
        }
    }

    fn require_call(&self, call: &str) -> ProviderResult<&ModeledCall> {
        self.calls.get(call).ok_or_else(|| ProviderError::unknown_object(call))
    }

    fn set_call_property(&mut self, call: &str, key: &str, value: PropertyValue) {
        if let Some(modeled) = self.calls.get_mut(call) {
            if modeled.properties.get(key) == Some(&value) {
                return;
            }
            modeled.properties.insert(key.to_string(), value.clone());
            self.events.push(ProviderEvent::CallPropertyChanged {
                path: call.to_string(),
                key: key.to_string(),
                value,
            });
        }
    }

    fn set_call_state(&mut self, call: &str, state: &str) {
        self.set_call_property(call, keys::STATE, PropertyValue::from(state));
    }

    fn release_call(&mut self, call: &str, reason: &str) {
        if !self.calls.contains_key(call) {
            return;
        }
        self.events.push(ProviderEvent::CallDisconnectReason {
            path: call.to_string(),
            reason: reason.to_string(),
        });
        self.set_call_state(call, "disconnected");
        self.calls.shift_remove(call);
        self.events.push(ProviderEvent::CallRemoved { path: call.to_string() });
    }

    fn calls_of(&self, modem: &str) -> Vec<String> {
        self.calls
            .iter()
            .filter(|(_, call)| call.modem == modem)
            .map(|(path, _)| path.clone())
            .collect()
    }

    fn calls_in_state(&self, modem: &str, state: &str) -> Vec<String> {
        self.calls
            .iter()
            .filter(|(_, call)| call.modem == modem && call.state() == state)
            .map(|(path, _)| path.clone())
            .collect()
    }
}

/// Scripted in-process provider
pub struct InMemoryProvider {
    state: Mutex<ModemState>,
    events: Option<mpsc::UnboundedSender<ProviderEvent>>,
}

impl InMemoryProvider {
    /// Create a provider that records operations without posting signals
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ModemState::default()),
            events: None,
        }
    }

    /// Create a provider that posts the signals its operations cause
    pub fn with_events(events: mpsc::UnboundedSender<ProviderEvent>) -> Self {
        Self {
            state: Mutex::new(ModemState::default()),
            events: Some(events),
        }
    }

    /// Default property set of a powered, online hardware modem
    pub fn modem_properties(name: &str) -> PropertyMap {
        let mut properties = PropertyMap::new();
        properties.insert(keys::POWERED.to_string(), true.into());
        properties.insert(keys::ONLINE.to_string(), true.into());
        properties.insert(keys::LOCKDOWN.to_string(), false.into());
        properties.insert(keys::EMERGENCY.to_string(), false.into());
        properties.insert(keys::NAME.to_string(), name.into());
        properties.insert(keys::MANUFACTURER.to_string(), "oFono".into());
        properties.insert(keys::MODEL.to_string(), "Synthetic Device".into());
        properties.insert(keys::REVISION.to_string(), "1.0".into());
        properties.insert(keys::SERIAL.to_string(), "1234567890".into());
        properties.insert(keys::TYPE.to_string(), "hardware".into());
        properties
    }

    /// Default property set of a call in `state`
    pub fn call_properties(state: &str, number: &str) -> PropertyMap {
        let mut properties = PropertyMap::new();
        properties.insert(keys::STATE.to_string(), state.into());
        properties.insert(keys::LINE_IDENTIFICATION.to_string(), number.into());
        properties.insert(keys::NAME.to_string(), "".into());
        properties.insert(keys::EMERGENCY.to_string(), false.into());
        properties.insert(keys::MULTIPARTY.to_string(), false.into());
        properties
    }

    /// Install a modem without posting `ModemAdded`
    pub fn add_modem(&self, path: &str, properties: PropertyMap) {
        self.state.lock().modems.insert(path.to_string(), properties);
    }

    /// Install a call on `modem` without posting `CallAdded`; returns its path
    pub fn add_call(&self, modem: &str, state: &str, number: &str) -> String {
        let mut guard = self.state.lock();
        guard.next_call += 1;
        let path = format!("{}/voicecall{:02}", modem, guard.next_call);
        guard.calls.insert(
            path.clone(),
            ModeledCall {
                modem: modem.to_string(),
                properties: Self::call_properties(state, number),
            },
        );
        path
    }

    /// Set a call property as the network would, posting the change
    pub fn set_call_property(&self, call: &str, key: &str, value: PropertyValue) {
        let mut guard = self.state.lock();
        guard.set_call_property(call, key, value);
        self.flush(&mut guard);
    }

    pub fn set_emergency_numbers(&self, numbers: &[&str]) {
        self.state.lock().emergency_numbers = numbers.iter().map(|n| n.to_string()).collect();
    }

    /// Make every subsequent call of `method` fail
    pub fn fail_on(&self, method: &str) {
        self.state.lock().failing.insert(method.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().failing.clear();
    }

    /// Operations issued so far
    pub fn operations(&self) -> Vec<ProviderOperation> {
        self.state.lock().operations.clone()
    }

    pub fn clear_operations(&self) {
        self.state.lock().operations.clear();
    }

    /// Number of calls the modeled modem still holds
    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    fn flush(&self, state: &mut ModemState) {
        let pending = std::mem::take(&mut state.events);
        if let Some(events) = &self.events {
            for event in pending {
                if events.send(event).is_err() {
                    tracing::debug!("Provider event receiver closed");
                    break;
                }
            }
        }
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelephonyProvider for InMemoryProvider {
    async fn get_modems(&self) -> ProviderResult<Vec<(String, PropertyMap)>> {
        let mut state = self.state.lock();
        state.record(ProviderOperation::GetModems)?;
        Ok(state
            .modems
            .iter()
            .map(|(path, properties)| (path.clone(), properties.clone()))
            .collect())
    }

    async fn set_modem_property(&self, modem: &str, key: &str, value: PropertyValue) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.record(ProviderOperation::SetModemProperty {
            modem: modem.to_string(),
            key: key.to_string(),
            value: value.clone(),
        })?;
        state.require_modem(modem)?;

        let changed = state
            .modems
            .get_mut(modem)
            .map(|properties| properties.insert(key.to_string(), value.clone()) != Some(value.clone()))
            .unwrap_or(false);
        if changed {
            state.events.push(ProviderEvent::ModemPropertyChanged {
                path: modem.to_string(),
                key: key.to_string(),
                value,
            });
        }
        self.flush(&mut state);
        Ok(())
    }

    async fn get_calls(&self, modem: &str) -> ProviderResult<Vec<(String, PropertyMap)>> {
        let mut state = self.state.lock();
        state.record(ProviderOperation::GetCalls { modem: modem.to_string() })?;
        state.require_modem(modem)?;
        Ok(state
            .calls
            .iter()
            .filter(|(_, call)| call.modem == modem)
            .map(|(path, call)| (path.clone(), call.properties.clone()))
            .collect())
    }

    async fn get_call_properties(&self, call: &str) -> ProviderResult<PropertyMap> {
        let mut state = self.state.lock();
        state.record(ProviderOperation::GetCallProperties { call: call.to_string() })?;
        Ok(state.require_call(call)?.properties.clone())
    }

    async fn dial(&self, modem: &str, number: &str, hide_caller_id: HideCallerId) -> ProviderResult<String> {
        let mut state = self.state.lock();
        state.record(ProviderOperation::Dial {
            modem: modem.to_string(),
            number: number.to_string(),
            hide_caller_id,
        })?;
        state.require_modem(modem)?;

        // A new outgoing call puts the current active call on hold
        for call in state.calls_in_state(modem, "active") {
            state.set_call_state(&call, "held");
        }

        state.next_call += 1;
        let path = format!("{}/voicecall{:02}", modem, state.next_call);
        let properties = Self::call_properties("dialing", number);
        state.calls.insert(
            path.clone(),
            ModeledCall {
                modem: modem.to_string(),
                properties: properties.clone(),
            },
        );
        state.events.push(ProviderEvent::CallAdded {
            path: path.clone(),
            properties,
        });
        self.flush(&mut state);
        Ok(path)
    }

    async fn answer(&self, call: &str) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.record(ProviderOperation::Answer { call: call.to_string() })?;
        if state.require_call(call)?.state() != "incoming" {
            return Err(ProviderError::method("Answer", "org.ofono.Error.Failed"));
        }
        state.set_call_state(call, "active");
        self.flush(&mut state);
        Ok(())
    }

    async fn hangup(&self, call: &str) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.record(ProviderOperation::Hangup { call: call.to_string() })?;
        state.require_call(call)?;
        state.release_call(call, "local");
        self.flush(&mut state);
        Ok(())
    }

    async fn deflect(&self, call: &str, number: &str) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.record(ProviderOperation::Deflect {
            call: call.to_string(),
            number: number.to_string(),
        })?;
        state.require_call(call)?;
        state.release_call(call, "local");
        self.flush(&mut state);
        Ok(())
    }

    async fn hangup_all(&self, modem: &str) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.record(ProviderOperation::HangupAll { modem: modem.to_string() })?;
        state.require_modem(modem)?;
        for call in state.calls_of(modem) {
            state.release_call(&call, "local");
        }
        self.flush(&mut state);
        Ok(())
    }

    async fn hold_and_answer(&self, modem: &str) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.record(ProviderOperation::HoldAndAnswer { modem: modem.to_string() })?;
        state.require_modem(modem)?;
        for call in state.calls_in_state(modem, "active") {
            state.set_call_state(&call, "held");
        }
        for call in state.calls_in_state(modem, "waiting") {
            state.set_call_state(&call, "active");
        }
        self.flush(&mut state);
        Ok(())
    }

    async fn swap_calls(&self, modem: &str) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.record(ProviderOperation::SwapCalls { modem: modem.to_string() })?;
        state.require_modem(modem)?;
        let active = state.calls_in_state(modem, "active");
        let held = state.calls_in_state(modem, "held");
        for call in active {
            state.set_call_state(&call, "held");
        }
        for call in held {
            state.set_call_state(&call, "active");
        }
        self.flush(&mut state);
        Ok(())
    }

    async fn transfer(&self, modem: &str) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.record(ProviderOperation::Transfer { modem: modem.to_string() })?;
        state.require_modem(modem)?;
        let active = state.calls_in_state(modem, "active");
        let held = state.calls_in_state(modem, "held");
        if active.is_empty() || held.is_empty() {
            return Err(ProviderError::method("Transfer", "org.ofono.Error.NotAvailable"));
        }
        for call in active.into_iter().chain(held) {
            state.release_call(&call, "local");
        }
        self.flush(&mut state);
        Ok(())
    }

    async fn create_multiparty(&self, modem: &str) -> ProviderResult<Vec<String>> {
        let mut state = self.state.lock();
        state.record(ProviderOperation::CreateMultiparty { modem: modem.to_string() })?;
        state.require_modem(modem)?;
        let members: Vec<String> = state
            .calls
            .iter()
            .filter(|(_, call)| call.modem == modem && matches!(call.state(), "active" | "held"))
            .map(|(path, _)| path.clone())
            .collect();
        if members.len() < 2 {
            return Err(ProviderError::method("CreateMultiparty", "org.ofono.Error.NotAvailable"));
        }
        for call in &members {
            state.set_call_property(call, keys::MULTIPARTY, true.into());
            state.set_call_state(call, "active");
        }
        self.flush(&mut state);
        Ok(members)
    }

    async fn private_chat(&self, modem: &str, call: &str) -> ProviderResult<Vec<String>> {
        let mut state = self.state.lock();
        state.record(ProviderOperation::PrivateChat {
            modem: modem.to_string(),
            call: call.to_string(),
        })?;
        state.require_modem(modem)?;
        if !state.require_call(call)?.is_multiparty() {
            return Err(ProviderError::method("PrivateChat", "org.ofono.Error.NotFound"));
        }

        let remaining: Vec<String> = state
            .calls
            .iter()
            .filter(|(path, modeled)| {
                modeled.modem == modem && modeled.is_multiparty() && path.as_str() != call
            })
            .map(|(path, _)| path.clone())
            .collect();

        state.set_call_property(call, keys::MULTIPARTY, false.into());
        state.set_call_state(call, "active");
        for member in &remaining {
            if remaining.len() < 2 {
                state.set_call_property(member, keys::MULTIPARTY, false.into());
            }
            state.set_call_state(member, "held");
        }
        self.flush(&mut state);
        Ok(remaining)
    }

    async fn send_tones(&self, modem: &str, tones: &str) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.record(ProviderOperation::SendTones {
            modem: modem.to_string(),
            tones: tones.to_string(),
        })?;
        state.require_modem(modem)
    }

    async fn get_emergency_numbers(&self, modem: &str) -> ProviderResult<Vec<String>> {
        let mut state = self.state.lock();
        state.record(ProviderOperation::GetEmergencyNumbers { modem: modem.to_string() })?;
        state.require_modem(modem)?;
        Ok(state.emergency_numbers.clone())
    }
}
