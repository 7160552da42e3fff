//! Telephony call records
//!
//! A [`TelephonyCall`] is either a real provider call or a synthetic
//! conference record. Conference membership is expressed through ids:
//!
//! ```text
//!   conference-1  { conference_id: Some("conference-1"), participants: [a, b] }
//!   a             { conference_id: Some("conference-1"), state: Conference, saved_state: Some(Active) }
//!   b             { conference_id: Some("conference-1"), state: Conference, saved_state: Some(Held) }
//! ```

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;

use crate::service::PROTOCOL_GSM;

/// Call lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    #[default]
    Init,
    Dialing,
    Alerting,
    Incoming,
    Waiting,
    Active,
    Held,
    /// Shadow state shown for conference participants
    Conference,
    Disconnected,
}

impl CallState {
    /// Map the provider's call state string; unknown values map to `Init`
    pub fn from_provider(value: &str) -> Self {
        match value {
            "dialing" => CallState::Dialing,
            "alerting" => CallState::Alerting,
            "incoming" => CallState::Incoming,
            "waiting" => CallState::Waiting,
            "active" => CallState::Active,
            "held" => CallState::Held,
            "disconnected" => CallState::Disconnected,
            _ => CallState::Init,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Init => "init",
            CallState::Dialing => "dialing",
            CallState::Alerting => "alerting",
            CallState::Incoming => "incoming",
            CallState::Waiting => "waiting",
            CallState::Active => "active",
            CallState::Held => "held",
            CallState::Conference => "conference",
            CallState::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally visible call fields reported in `callChanged`/`callStateChanged`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CallField {
    State,
    StateReason,
    StartTime,
    RemoteParty,
    Name,
    Emergency,
}

impl CallField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallField::State => "state",
            CallField::StateReason => "stateReason",
            CallField::StartTime => "startTime",
            CallField::RemoteParty => "remoteParty",
            CallField::Name => "name",
            CallField::Emergency => "emergency",
        }
    }
}

/// A call or conference record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelephonyCall {
    pub id: String,
    pub service_id: Option<String>,
    pub remote_party: String,
    pub name: String,
    pub state: CallState,
    pub state_reason: String,
    /// True state of a conference participant
    pub saved_state: Option<CallState>,
    pub start_time: Option<DateTime<Utc>>,
    /// Milliseconds, computed on disconnect
    pub duration: Option<u64>,
    pub emergency: bool,
    pub protocol: String,
    /// Owning conference; equal to `id` for the conference record itself
    pub conference_id: Option<String>,
    pub participants: Vec<String>,
}

impl TelephonyCall {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            service_id: None,
            remote_party: String::new(),
            name: String::new(),
            state: CallState::Init,
            state_reason: String::new(),
            saved_state: None,
            start_time: None,
            duration: None,
            emergency: false,
            protocol: PROTOCOL_GSM.to_string(),
            conference_id: None,
            participants: Vec::new(),
        }
    }

    /// This record is a synthetic conference call
    pub fn is_conference(&self) -> bool {
        self.conference_id.as_deref() == Some(self.id.as_str())
    }

    /// This call is a member of some other conference record
    pub fn is_participant(&self) -> bool {
        matches!(&self.conference_id, Some(conference) if conference != &self.id)
    }

    /// The state the call is really in, looking through the conference shadow
    pub fn effective_state(&self) -> CallState {
        if self.is_participant() {
            self.saved_state.unwrap_or(self.state)
        } else {
            self.state
        }
    }

    /// Record the disconnect time and derive the duration
    pub fn finish(&mut self, now: DateTime<Utc>) {
        let elapsed = self
            .start_time
            .map(|start| (now - start).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        self.duration = Some(elapsed);
        self.state = CallState::Disconnected;
    }

    pub fn to_info(&self) -> CallInfo {
        CallInfo {
            call_id: self.id.clone(),
            service_id: self.service_id.clone(),
            remote_party: self.remote_party.clone(),
            name: self.name.clone(),
            state: self.state,
            state_reason: self.state_reason.clone(),
            start_time: self.start_time.map(|start| start.timestamp_millis()),
            duration: self.duration,
            protocol: self.protocol.clone(),
            emergency: self.emergency,
            conference_id: self.conference_id.clone(),
            participants: self.participants.clone(),
        }
    }
}

/// Wire form of a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInfo {
    pub call_id: String,
    pub service_id: Option<String>,
    pub remote_party: String,
    pub name: String,
    pub state: CallState,
    pub state_reason: String,
    /// Milliseconds since the Unix epoch
    pub start_time: Option<i64>,
    pub duration: Option<u64>,
    pub protocol: String,
    pub emergency: bool,
    pub conference_id: Option<String>,
    pub participants: Vec<String>,
}

/// Parse the provider's `StartTime` property.
///
/// oFono reports local time with a numeric offset (`2013-04-12T10:23:45+0300`);
/// some modems omit the offset, in which case the time is taken as UTC.
pub fn parse_start_time(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::<FixedOffset>::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}
