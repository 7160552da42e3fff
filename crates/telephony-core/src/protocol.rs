//! JSON wire protocol
//!
//! Inbound messages are objects carrying a `cmd` name, a `promiseId` the
//! JavaScript side uses to match the reply, and command-specific fields:
//!
//! ```json
//! { "cmd": "dial", "promiseId": 7, "serviceId": "|ril_0", "remoteParty": "12345" }
//! ```
//!
//! Every request gets exactly one [`Reply`]:
//!
//! ```json
//! { "promiseId": 7, "cmd": "dial", "isError": false, "returnValue": { "callId": "..." } }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TelephonyError;

/// Every command name the backend understands
pub const COMMANDS: &[&str] = &[
    "getServices",
    "setDefaultService",
    "setServiceEnabled",
    "enableNotifications",
    "disableNotifications",
    "getCalls",
    "dial",
    "accept",
    "disconnect",
    "hold",
    "resume",
    "deflect",
    "transfer",
    "sendTones",
    "startTone",
    "stopTone",
    "getEmergencyNumbers",
    "emergencyDial",
    "createConference",
    "getParticipants",
    "split",
];

/// Decoded inbound command
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    GetServices,
    SetDefaultService {
        service_id: String,
    },
    SetServiceEnabled {
        service_id: String,
        enabled: bool,
    },
    EnableNotifications,
    DisableNotifications,
    GetCalls,
    Dial {
        #[serde(default)]
        service_id: Option<String>,
        remote_party: String,
        #[serde(default)]
        hide_caller_id: Option<bool>,
    },
    Accept {
        call_id: String,
    },
    Disconnect {
        call_id: String,
    },
    Hold {
        call_id: String,
    },
    Resume {
        call_id: String,
    },
    Deflect {
        call_id: String,
        remote_party: String,
    },
    Transfer {
        call_id: String,
    },
    SendTones {
        #[serde(default)]
        service_id: Option<String>,
        tones: String,
    },
    StartTone,
    StopTone,
    GetEmergencyNumbers {
        #[serde(default)]
        service_id: Option<String>,
    },
    EmergencyDial,
    CreateConference {
        #[serde(default)]
        service_id: Option<String>,
    },
    GetParticipants {
        call_id: String,
    },
    Split {
        call_id: String,
    },
}

impl Command {
    /// Wire name of the command
    pub fn name(&self) -> &'static str {
        match self {
            Command::GetServices => "getServices",
            Command::SetDefaultService { .. } => "setDefaultService",
            Command::SetServiceEnabled { .. } => "setServiceEnabled",
            Command::EnableNotifications => "enableNotifications",
            Command::DisableNotifications => "disableNotifications",
            Command::GetCalls => "getCalls",
            Command::Dial { .. } => "dial",
            Command::Accept { .. } => "accept",
            Command::Disconnect { .. } => "disconnect",
            Command::Hold { .. } => "hold",
            Command::Resume { .. } => "resume",
            Command::Deflect { .. } => "deflect",
            Command::Transfer { .. } => "transfer",
            Command::SendTones { .. } => "sendTones",
            Command::StartTone => "startTone",
            Command::StopTone => "stopTone",
            Command::GetEmergencyNumbers { .. } => "getEmergencyNumbers",
            Command::EmergencyDial => "emergencyDial",
            Command::CreateConference { .. } => "createConference",
            Command::GetParticipants { .. } => "getParticipants",
            Command::Split { .. } => "split",
        }
    }
}

/// A decoded inbound request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub promise_id: Value,
    pub command: Command,
}

impl Request {
    /// Decode a raw inbound message.
    ///
    /// Undecodable messages yield the error reply to send back.
    pub fn decode(message: Value) -> Result<Self, Reply> {
        let promise_id = message.get("promiseId").cloned().unwrap_or(Value::Null);
        let cmd = message.get("cmd").and_then(Value::as_str).map(str::to_string);

        let Some(name) = cmd.as_deref() else {
            let err = TelephonyError::invalid_argument("cmd", "missing command name");
            return Err(Reply::error(promise_id, None, &err));
        };
        if !COMMANDS.contains(&name) {
            let err = TelephonyError::not_supported(name);
            return Err(Reply::error(promise_id, cmd, &err));
        }

        match serde_json::from_value::<Command>(message) {
            Ok(command) => Ok(Self { promise_id, command }),
            Err(e) => {
                let err = TelephonyError::invalid_argument(name, e.to_string());
                Err(Reply::error(promise_id, cmd, &err))
            }
        }
    }
}

/// Wire error names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorName {
    NoModificationAllowedError,
    NotSupportedError,
}

impl ErrorName {
    /// Numeric DOM exception code
    pub fn code(&self) -> u16 {
        match self {
            ErrorName::NoModificationAllowedError => 7,
            ErrorName::NotSupportedError => 9,
        }
    }
}

/// `returnValue` of an error reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReply {
    pub name: ErrorName,
    pub code: u16,
    pub message: String,
}

impl From<&TelephonyError> for ErrorReply {
    fn from(err: &TelephonyError) -> Self {
        let name = if err.is_not_supported() {
            ErrorName::NotSupportedError
        } else {
            ErrorName::NoModificationAllowedError
        };
        Self {
            name,
            code: name.code(),
            message: err.to_string(),
        }
    }
}

/// Reply envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub promise_id: Value,
    pub cmd: Option<String>,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,
}

impl Reply {
    pub fn success(promise_id: Value, cmd: &str, return_value: Option<Value>) -> Self {
        Self {
            promise_id,
            cmd: Some(cmd.to_string()),
            is_error: false,
            return_value,
        }
    }

    pub fn error(promise_id: Value, cmd: Option<String>, err: &TelephonyError) -> Self {
        let error = ErrorReply::from(err);
        Self {
            promise_id,
            cmd,
            is_error: true,
            return_value: serde_json::to_value(error).ok(),
        }
    }

    /// Wire name of the error, for error replies
    pub fn error_name(&self) -> Option<&str> {
        if !self.is_error {
            return None;
        }
        self.return_value.as_ref()?.get("name")?.as_str()
    }
}
