//! Inbound request dispatch

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{TelephonyError, TelephonyResult};
use crate::protocol::{Command, Reply, Request};

use super::TelephonyBackend;

fn to_json<T: Serialize>(value: &T) -> TelephonyResult<Option<Value>> {
    Ok(Some(serde_json::to_value(value)?))
}

impl TelephonyBackend {
    /// Decode and execute one raw message, then deliver its reply
    pub async fn handle_message(&mut self, message: Value, reply_to: Option<oneshot::Sender<Reply>>) {
        let reply = match Request::decode(message) {
            Ok(request) => self.handle_request(request).await,
            Err(reply) => {
                tracing::warn!("Rejected undecodable request {:?}", reply.cmd);
                reply
            }
        };
        self.notifier.reply(reply, reply_to);
    }

    /// Execute a decoded request and build its reply
    pub async fn handle_request(&mut self, request: Request) -> Reply {
        let Request { promise_id, command } = request;
        let name = command.name();
        tracing::debug!("Handling {} request", name);

        match self.execute(command).await {
            Ok(return_value) => Reply::success(promise_id, name, return_value),
            Err(e) => {
                if e.is_not_supported() {
                    tracing::debug!("{} is not supported", name);
                } else {
                    tracing::warn!("{} failed: {}", name, e);
                }
                Reply::error(promise_id, Some(name.to_string()), &e)
            }
        }
    }

    async fn execute(&mut self, command: Command) -> TelephonyResult<Option<Value>> {
        match command {
            Command::GetServices => {
                self.refresh_services().await?;
                to_json(&self.service_infos())
            }
            Command::SetDefaultService { service_id } => {
                self.set_default_service(&service_id).await?;
                Ok(None)
            }
            Command::SetServiceEnabled { service_id, enabled } => {
                self.set_service_enabled(&service_id, enabled).await?;
                Ok(None)
            }
            Command::EnableNotifications => {
                self.notifier.set_enabled(true);
                Ok(None)
            }
            Command::DisableNotifications => {
                self.notifier.set_enabled(false);
                Ok(None)
            }
            Command::GetCalls => to_json(&self.get_calls()),
            Command::Dial {
                service_id,
                remote_party,
                hide_caller_id,
            } => {
                let call = self
                    .dial(service_id.as_deref(), &remote_party, hide_caller_id.into())
                    .await?;
                to_json(&call)
            }
            Command::Accept { call_id } => {
                self.accept(&call_id).await?;
                Ok(None)
            }
            Command::Disconnect { call_id } => {
                self.disconnect(&call_id).await?;
                Ok(None)
            }
            Command::Hold { call_id } => {
                self.hold(&call_id).await?;
                Ok(None)
            }
            Command::Resume { call_id } => {
                self.resume(&call_id).await?;
                Ok(None)
            }
            Command::Deflect { call_id, remote_party } => {
                self.deflect(&call_id, &remote_party).await?;
                Ok(None)
            }
            Command::Transfer { call_id } => {
                self.transfer(&call_id).await?;
                Ok(None)
            }
            Command::SendTones { service_id, tones } => {
                self.send_tones(service_id.as_deref(), &tones).await?;
                Ok(None)
            }
            Command::GetEmergencyNumbers { service_id } => {
                let numbers = self.get_emergency_numbers(service_id.as_deref()).await?;
                to_json(&numbers)
            }
            Command::CreateConference { service_id } => {
                let conference = self.create_conference(service_id.as_deref()).await?;
                to_json(&conference)
            }
            Command::GetParticipants { call_id } => to_json(&self.get_participants(&call_id)?),
            Command::Split { call_id } => {
                self.split(&call_id).await?;
                Ok(None)
            }
            command @ (Command::StartTone | Command::StopTone | Command::EmergencyDial) => {
                Err(TelephonyError::not_supported(command.name()))
            }
        }
    }
}
