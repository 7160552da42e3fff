//! Call tracking and call-level operations

use chrono::Utc;

use crate::call::{CallField, CallInfo, CallState, TelephonyCall};
use crate::error::{TelephonyError, TelephonyResult};
use crate::ids;
use crate::notify::Notification;
use crate::provider::{keys, HideCallerId, PropertyMap, PropertyValue};
use crate::registry::{CallRegistry, PropertyUpdate};
use crate::validation;

use super::TelephonyBackend;

impl TelephonyBackend {
    /// Seed the calls a service already carries
    pub(crate) async fn seed_calls(&mut self, service_id: &str) -> TelephonyResult<()> {
        let calls = self.provider.get_calls(&ids::to_provider(service_id)).await?;
        for (path, properties) in calls {
            let call_id = ids::to_opaque(&path);
            if self.calls.contains(&call_id) {
                continue;
            }
            self.init_call(&call_id, &properties).await;
            self.notify_call_added(&call_id);
        }
        Ok(())
    }

    /// Create the record for a new provider call
    async fn init_call(&mut self, call_id: &str, properties: &PropertyMap) {
        let mut call = TelephonyCall::new(call_id);
        CallRegistry::seed(&mut call, properties);
        call.service_id = self.resolve_call_service(call_id).await;

        tracing::debug!("Call {} created in state {}", call_id, call.state);
        self.calls.insert(call);
    }

    /// Owning service of a call, refreshing the services once when the
    /// service is not known yet
    async fn resolve_call_service(&mut self, call_id: &str) -> Option<String> {
        let service_id = ids::service_id_of_call(call_id)?.to_string();
        if !self.services.contains(&service_id) {
            tracing::debug!("Call {} belongs to unknown service {}, refreshing", call_id, service_id);
            if let Err(e) = self.refresh_services().await {
                tracing::warn!("Service refresh for call {} failed: {}", call_id, e);
            }
            if !self.services.contains(&service_id) {
                tracing::warn!("Service {} of call {} is still unknown", service_id, call_id);
            }
        }
        Some(service_id)
    }

    fn notify_call_added(&self, call_id: &str) {
        if let Some(call) = self.calls.find(call_id) {
            self.notifier.notify(Notification::CallAdded { call: call.to_info() });
        }
    }

    /// Post `callChanged` or `callStateChanged` for `call_id`
    fn emit_call_changed(&self, call_id: &str, changed_fields: Vec<CallField>) {
        let Some(call) = self.calls.find(call_id) else {
            return;
        };
        let call = call.to_info();
        let notification = if changed_fields.contains(&CallField::State) {
            Notification::CallStateChanged { call, changed_fields }
        } else {
            Notification::CallChanged { call, changed_fields }
        };
        self.notifier.notify(notification);
    }

    /// Report changed fields, re-deriving the active call after a state change
    fn call_changed(&mut self, call_id: &str, changed_fields: Vec<CallField>) {
        let state_changed = changed_fields.contains(&CallField::State);
        self.emit_call_changed(call_id, changed_fields);
        if state_changed {
            self.update_active_call(Some(call_id));
        }
    }

    /// Re-derive the active call and announce it
    pub(crate) fn update_active_call(&mut self, trigger: Option<&str>) {
        let next = self.calls.active_candidate(trigger, self.active_call.as_deref());
        if next != self.active_call {
            tracing::debug!("Active call {:?} -> {:?}", self.active_call, next);
        }
        self.active_call = next;

        let call = self
            .active_call
            .as_deref()
            .and_then(|call_id| self.calls.find(call_id))
            .map(TelephonyCall::to_info);
        self.notifier.notify(Notification::ActiveCallChanged { call });
    }

    /// Drop a call from the live registry, then any conference it orphaned
    pub(crate) fn remove_call(&mut self, call_id: &str) {
        let mut pending = vec![call_id.to_string()];
        let mut removed_any = false;

        while let Some(call_id) = pending.pop() {
            let Some(removed) = self.calls.remove(&call_id) else {
                continue;
            };
            removed_any = true;
            tracing::debug!("Call {} removed", call_id);

            for member in &removed.released_participants {
                self.emit_call_changed(member, vec![CallField::State]);
            }
            self.notifier.notify(Notification::CallRemoved {
                call: removed.call.to_info(),
            });
            if removed.freed > 0 {
                tracing::debug!("Freed {} retired calls", removed.freed);
            }
            if let Some(conference_id) = removed.orphaned_conference {
                tracing::debug!("Conference {} has no participants left", conference_id);
                pending.push(conference_id);
            }
        }

        if removed_any {
            self.update_active_call(None);
        }
    }

    /// Turn a registry update into notifications
    fn apply_call_update(&mut self, call_id: &str, update: PropertyUpdate) {
        if let Some(conference_id) = update.conference_changed {
            self.call_changed(&conference_id, vec![CallField::State]);
        }

        if let Some(field) = update.field {
            let disconnected = field == CallField::State
                && self
                    .calls
                    .find(call_id)
                    .map(|call| call.state == CallState::Disconnected)
                    .unwrap_or(false);
            if disconnected {
                tracing::info!("Call {} disconnected", call_id);
                self.emit_call_changed(call_id, vec![field]);
                self.remove_call(call_id);
            } else {
                self.call_changed(call_id, vec![field]);
            }
        }

        if let Some(conference_id) = update.orphaned_conference {
            tracing::debug!("Conference {} has no participants left", conference_id);
            self.remove_call(&conference_id);
        }
    }

    pub(crate) async fn on_call_added(&mut self, call_id: &str, properties: &PropertyMap) {
        if self.calls.contains(call_id) {
            // Created by dial before the signal arrived
            for (key, value) in properties {
                self.on_call_property_changed(call_id, key, value);
            }
            return;
        }

        self.init_call(call_id, properties).await;
        tracing::info!("Call {} added", call_id);
        self.notify_call_added(call_id);

        let state = self.calls.find(call_id).map(|call| call.state);
        if state == Some(CallState::Active) {
            self.update_active_call(Some(call_id));
        }
    }

    pub(crate) fn on_call_removed(&mut self, call_id: &str) {
        if self.calls.contains(call_id) {
            self.remove_call(call_id);
        } else if self.calls.is_retired(call_id) {
            tracing::debug!("Ignoring removal of retired call {}", call_id);
        } else {
            tracing::debug!("Ignoring removal of unknown call {}", call_id);
        }
    }

    pub(crate) fn on_call_property_changed(&mut self, call_id: &str, key: &str, value: &PropertyValue) {
        if !self.calls.contains(call_id) {
            tracing::debug!("Property {} changed on untracked call {}", key, call_id);
            return;
        }
        tracing::debug!("Call {} {} = {}", call_id, key, value);
        let update = self.calls.update_property(call_id, key, value, Utc::now());
        self.apply_call_update(call_id, update);
    }

    pub(crate) fn on_call_disconnect_reason(&mut self, call_id: &str, reason: &str) {
        let update = self.calls.update_state_reason(call_id, reason);
        self.apply_call_update(call_id, update);
    }

    fn require_call(&self, call_id: &str) -> TelephonyResult<&TelephonyCall> {
        self.calls.find(call_id).ok_or_else(|| TelephonyError::unknown_call(call_id))
    }

    /// Provider path of the service owning `call`
    fn call_service_path(call: &TelephonyCall) -> TelephonyResult<String> {
        call.service_id
            .as_deref()
            .map(ids::to_provider)
            .ok_or_else(|| TelephonyError::not_allowed(format!("Call {} has no service", call.id)))
    }

    fn wrong_state(operation: &str, call: &TelephonyCall) -> TelephonyError {
        TelephonyError::not_allowed(format!("Cannot {} call {} in state {}", operation, call.id, call.state))
    }

    pub(crate) fn get_calls(&self) -> Vec<CallInfo> {
        self.call_infos()
    }

    pub(crate) async fn dial(
        &mut self,
        service_id: Option<&str>,
        remote_party: &str,
        hide_caller_id: HideCallerId,
    ) -> TelephonyResult<CallInfo> {
        validation::validate_phone_number("remoteParty", remote_party)?;
        let service_id = self.resolve_enabled_service(service_id)?;

        let path = self
            .provider
            .dial(&ids::to_provider(&service_id), remote_party, hide_caller_id)
            .await?;
        let call_id = ids::to_opaque(&path);
        tracing::info!("Dialed {} on {} as {}", remote_party, service_id, call_id);

        if !self.calls.contains(&call_id) {
            let properties = match self.provider.get_call_properties(&path).await {
                Ok(properties) => properties,
                Err(e) => {
                    tracing::warn!("Failed to read properties of {}: {}", call_id, e);
                    let mut properties = PropertyMap::new();
                    properties.insert(keys::STATE.to_string(), "dialing".into());
                    properties.insert(keys::LINE_IDENTIFICATION.to_string(), remote_party.into());
                    properties
                }
            };
            self.init_call(&call_id, &properties).await;
            self.notify_call_added(&call_id);
        }

        Ok(self.require_call(&call_id)?.to_info())
    }

    pub(crate) async fn accept(&mut self, call_id: &str) -> TelephonyResult<()> {
        let call = self.require_call(call_id)?;
        match call.state {
            CallState::Incoming => {
                let path = ids::to_provider(call_id);
                self.provider.answer(&path).await?;
            }
            CallState::Waiting => {
                let service_path = Self::call_service_path(call)?;
                self.provider.hold_and_answer(&service_path).await?;
            }
            _ => return Err(Self::wrong_state("accept", call)),
        }
        Ok(())
    }

    pub(crate) async fn disconnect(&mut self, call_id: &str) -> TelephonyResult<()> {
        let call = self.require_call(call_id)?;
        if !call.is_conference() {
            let path = ids::to_provider(call_id);
            self.provider.hangup(&path).await?;
            return Ok(());
        }

        let participants = call.participants.clone();
        let service_path = Self::call_service_path(call)?;
        if let Some(conference) = self.calls.find_mut(call_id) {
            conference.finish(Utc::now());
        }

        for member in &participants {
            if let Err(e) = self.provider.hangup(&ids::to_provider(member)).await {
                tracing::warn!("Failed to hang up participant {} of {}: {}", member, call_id, e);
                if let Err(e) = self.provider.hangup_all(&service_path).await {
                    tracing::error!("Hangup of all calls on {} failed: {}", service_path, e);
                }
                return Err(e.into());
            }
        }

        tracing::info!("Conference {} disconnected", call_id);
        self.remove_call(call_id);
        Ok(())
    }

    pub(crate) async fn hold(&mut self, call_id: &str) -> TelephonyResult<()> {
        let call = self.require_call(call_id)?;
        if !matches!(call.state, CallState::Incoming | CallState::Active | CallState::Waiting) {
            return Err(Self::wrong_state("hold", call));
        }

        let service_path = Self::call_service_path(call)?;
        if self.calls.any_other_in_state(call_id, CallState::Waiting) {
            self.provider.hold_and_answer(&service_path).await?;
        } else {
            self.provider.swap_calls(&service_path).await?;
        }
        Ok(())
    }

    pub(crate) async fn resume(&mut self, call_id: &str) -> TelephonyResult<()> {
        let call = self.require_call(call_id)?;
        if call.state != CallState::Held {
            return Err(Self::wrong_state("resume", call));
        }

        let service_path = Self::call_service_path(call)?;
        self.provider.swap_calls(&service_path).await?;
        Ok(())
    }

    pub(crate) async fn deflect(&mut self, call_id: &str, remote_party: &str) -> TelephonyResult<()> {
        let call = self.require_call(call_id)?;
        if !matches!(call.state, CallState::Incoming | CallState::Waiting) {
            return Err(Self::wrong_state("deflect", call));
        }
        validation::validate_phone_number("remoteParty", remote_party)?;

        self.provider.deflect(&ids::to_provider(call_id), remote_party).await?;
        Ok(())
    }

    pub(crate) async fn transfer(&mut self, call_id: &str) -> TelephonyResult<()> {
        let call = self.require_call(call_id)?;
        if !matches!(call.state, CallState::Active | CallState::Held) {
            return Err(Self::wrong_state("transfer", call));
        }

        let service_path = Self::call_service_path(call)?;
        self.provider.transfer(&service_path).await?;
        Ok(())
    }

    pub(crate) async fn create_conference(&mut self, service_id: Option<&str>) -> TelephonyResult<CallInfo> {
        let service_id = self.resolve_enabled_service(service_id)?;
        let members = self.provider.create_multiparty(&ids::to_provider(&service_id)).await?;
        let member_ids: Vec<String> = members.iter().map(|path| ids::to_opaque(path)).collect();

        let conference_id = self
            .calls
            .create_conference(&service_id, &member_ids, Utc::now())
            .map_err(|missing| TelephonyError::not_allowed(format!("Conference member {} is not tracked", missing)))?;
        tracing::info!("Conference {} created with {} participants", conference_id, member_ids.len());

        self.update_active_call(Some(conference_id.as_str()));
        for member in &member_ids {
            self.emit_call_changed(member, vec![CallField::State]);
        }
        for superseded in self.calls.empty_conferences() {
            tracing::debug!("Conference {} merged into {}", superseded, conference_id);
            self.remove_call(&superseded);
        }

        Ok(self.require_call(&conference_id)?.to_info())
    }

    pub(crate) fn get_participants(&self, call_id: &str) -> TelephonyResult<Vec<CallInfo>> {
        let call = self.require_call(call_id)?;
        if !call.is_conference() {
            return Err(TelephonyError::not_allowed(format!("Call {} is not a conference", call_id)));
        }
        Ok(call
            .participants
            .iter()
            .filter_map(|member| self.calls.find(member))
            .map(TelephonyCall::to_info)
            .collect())
    }

    pub(crate) async fn split(&mut self, call_id: &str) -> TelephonyResult<()> {
        let call = self.require_call(call_id)?;
        let in_conference = call
            .conference_id
            .as_deref()
            .and_then(|conference_id| self.calls.find(conference_id))
            .map(|conference| conference.participants.iter().any(|member| member == call_id))
            .unwrap_or(false);
        if !call.is_participant() || !in_conference {
            return Err(TelephonyError::not_allowed(format!("Call {} is not in a conference", call_id)));
        }

        let service_path = Self::call_service_path(call)?;
        self.provider.private_chat(&service_path, &ids::to_provider(call_id)).await?;

        if let Some(conference_id) = self.calls.split(call_id) {
            tracing::info!("Conference {} dissolved by split of {}", conference_id, call_id);
            self.update_active_call(None);
        }
        Ok(())
    }
}
