//! Call registry and call state machine
//!
//! Live calls are kept in an id-indexed arena in creation order. Conference
//! relations are plain ids, so a conference record and its members can be
//! walked in either direction without shared ownership.
//!
//! Calls that leave the arena move to a retired list. Late provider signals
//! may still name them; the list is only freed once the arena is empty.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::call::{parse_start_time, CallField, CallState, TelephonyCall};
use crate::provider::{keys, PropertyMap, PropertyValue};

const CONFERENCE_ID_PREFIX: &str = "conference-";

/// Outcome of applying one provider property to a call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyUpdate {
    /// Field of the updated call that changed, if any
    pub field: Option<CallField>,
    /// Conference record whose derived state changed
    pub conference_changed: Option<String>,
    /// Conference record left without participants
    pub orphaned_conference: Option<String>,
}

impl PropertyUpdate {
    fn field(field: CallField) -> Self {
        Self {
            field: Some(field),
            ..Default::default()
        }
    }
}

/// Outcome of removing a call from the arena
#[derive(Debug, Clone)]
pub struct RemovedCall {
    /// Snapshot taken at removal
    pub call: TelephonyCall,
    /// Conference record left without participants by this removal
    pub orphaned_conference: Option<String>,
    /// Members released because their conference record was removed
    pub released_participants: Vec<String>,
    /// Number of retired records freed because the arena became empty
    pub freed: usize,
}

/// Arena of live calls plus the retired list
#[derive(Debug, Default)]
pub struct CallRegistry {
    live: IndexMap<String, TelephonyCall>,
    retired: Vec<TelephonyCall>,
    next_conference: u32,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, id: &str) -> Option<&TelephonyCall> {
        self.live.get(id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut TelephonyCall> {
        self.live.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.live.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TelephonyCall> {
        self.live.values()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn is_retired(&self, id: &str) -> bool {
        self.retired.iter().any(|call| call.id == id)
    }

    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    /// Insert a new call, replacing nothing
    pub fn insert(&mut self, call: TelephonyCall) {
        self.live.insert(call.id.clone(), call);
    }

    /// Any call other than `except` currently in `state`
    pub fn any_other_in_state(&self, except: &str, state: CallState) -> bool {
        self.live
            .values()
            .any(|call| call.id != except && call.effective_state() == state)
    }

    /// Seed `call` from a full property snapshot, without reporting changes
    pub fn seed(call: &mut TelephonyCall, properties: &PropertyMap) {
        for (key, value) in properties {
            match key.as_str() {
                keys::STATE => {
                    if let Some(state) = value.as_str() {
                        call.state = CallState::from_provider(state);
                    }
                }
                keys::START_TIME => {
                    call.start_time = value.as_str().and_then(parse_start_time);
                }
                keys::LINE_IDENTIFICATION => {
                    if let Some(number) = value.as_str() {
                        call.remote_party = number.to_string();
                    }
                }
                keys::NAME => {
                    if let Some(name) = value.as_str() {
                        call.name = name.to_string();
                    }
                }
                keys::EMERGENCY => {
                    if let Some(emergency) = value.as_bool() {
                        call.emergency = emergency;
                    }
                }
                _ => {}
            }
        }
    }

    /// Apply one provider property to the live call `id`.
    ///
    /// Unchanged values report nothing.
    pub fn update_property(
        &mut self,
        id: &str,
        key: &str,
        value: &PropertyValue,
        now: DateTime<Utc>,
    ) -> PropertyUpdate {
        let Some(call) = self.live.get_mut(id) else {
            return PropertyUpdate::default();
        };

        match key {
            keys::STATE => match value.as_str() {
                Some(state) => self.update_state(id, CallState::from_provider(state), now),
                None => PropertyUpdate::default(),
            },
            keys::START_TIME => {
                let start_time = value.as_str().and_then(parse_start_time);
                if call.start_time == start_time {
                    return PropertyUpdate::default();
                }
                call.start_time = start_time;
                PropertyUpdate::field(CallField::StartTime)
            }
            keys::LINE_IDENTIFICATION => match value.as_str() {
                Some(number) if number != call.remote_party => {
                    call.remote_party = number.to_string();
                    PropertyUpdate::field(CallField::RemoteParty)
                }
                _ => PropertyUpdate::default(),
            },
            keys::NAME => match value.as_str() {
                Some(name) if name != call.name => {
                    call.name = name.to_string();
                    PropertyUpdate::field(CallField::Name)
                }
                _ => PropertyUpdate::default(),
            },
            keys::EMERGENCY => match value.as_bool() {
                Some(emergency) if emergency != call.emergency => {
                    call.emergency = emergency;
                    PropertyUpdate::field(CallField::Emergency)
                }
                _ => PropertyUpdate::default(),
            },
            keys::MULTIPARTY => match value.as_bool() {
                // The conference itself was built by create_conference
                Some(false) if call.is_participant() => self.detach_participant(id),
                _ => PropertyUpdate::default(),
            },
            _ => PropertyUpdate::default(),
        }
    }

    /// Record the provider's disconnect reason
    pub fn update_state_reason(&mut self, id: &str, reason: &str) -> PropertyUpdate {
        match self.live.get_mut(id) {
            Some(call) if call.state_reason != reason => {
                call.state_reason = reason.to_string();
                PropertyUpdate::field(CallField::StateReason)
            }
            _ => PropertyUpdate::default(),
        }
    }

    /// Apply a state transition to the live call `id`.
    ///
    /// Participants keep showing `conference`; their new state is stored in
    /// `saved_state` and only the conference record may change.
    pub fn update_state(&mut self, id: &str, state: CallState, now: DateTime<Utc>) -> PropertyUpdate {
        let Some(call) = self.live.get_mut(id) else {
            return PropertyUpdate::default();
        };

        if state == CallState::Disconnected {
            call.finish(now);
            return PropertyUpdate::field(CallField::State);
        }

        if !call.is_participant() {
            if call.state == state {
                return PropertyUpdate::default();
            }
            call.state = state;
            return PropertyUpdate::field(CallField::State);
        }

        if call.saved_state == Some(state) {
            return PropertyUpdate::default();
        }
        call.saved_state = Some(state);
        let Some(conference_id) = call.conference_id.clone() else {
            return PropertyUpdate::default();
        };

        let target = match state {
            CallState::Active => Some(CallState::Active),
            CallState::Held if self.others_all_held(&conference_id, id) => Some(CallState::Held),
            _ => None,
        };

        let mut update = PropertyUpdate::default();
        if let (Some(target), Some(conference)) = (target, self.live.get_mut(&conference_id)) {
            if conference.state != target {
                tracing::debug!("Conference {} derived state {} -> {}", conference_id, conference.state, target);
                conference.state = target;
                update.conference_changed = Some(conference_id);
            }
        }
        update
    }

    fn others_all_held(&self, conference_id: &str, except: &str) -> bool {
        let Some(conference) = self.live.get(conference_id) else {
            return false;
        };
        conference
            .participants
            .iter()
            .filter(|member| member.as_str() != except)
            .all(|member| {
                self.live
                    .get(member)
                    .map(|call| call.saved_state == Some(CallState::Held))
                    .unwrap_or(false)
            })
    }

    /// Release a participant from its conference, restoring its saved state
    pub fn detach_participant(&mut self, id: &str) -> PropertyUpdate {
        let Some(call) = self.live.get_mut(id) else {
            return PropertyUpdate::default();
        };
        let Some(conference_id) = call.conference_id.take() else {
            return PropertyUpdate::default();
        };
        call.state = call.saved_state.take().unwrap_or(CallState::Active);

        let mut update = PropertyUpdate::field(CallField::State);
        if let Some(conference) = self.live.get_mut(&conference_id) {
            conference.participants.retain(|member| member != id);
            if conference.participants.is_empty() {
                update.orphaned_conference = Some(conference_id);
            }
        }
        update
    }

    fn next_conference_id(&mut self) -> String {
        self.next_conference += 1;
        format!("{}{}", CONFERENCE_ID_PREFIX, self.next_conference)
    }

    /// Build a conference record over existing calls.
    ///
    /// Fails with the first unknown member id, leaving the arena untouched.
    pub fn create_conference(
        &mut self,
        service_id: &str,
        members: &[String],
        now: DateTime<Utc>,
    ) -> Result<String, String> {
        if let Some(missing) = members.iter().find(|member| !self.live.contains_key(member.as_str())) {
            return Err(missing.clone());
        }

        let conference_id = self.next_conference_id();
        for member in members {
            let Some(call) = self.live.get_mut(member) else {
                continue;
            };
            call.saved_state = Some(call.effective_state());
            call.state = CallState::Conference;
            let previous = call.conference_id.replace(conference_id.clone());

            // Merging into a new conference takes the member out of the old one
            if let Some(previous) = previous.filter(|previous| previous != member) {
                if let Some(old) = self.live.get_mut(&previous) {
                    old.participants.retain(|id| id != member);
                }
            }
        }

        let mut conference = TelephonyCall::new(conference_id.clone());
        conference.service_id = Some(service_id.to_string());
        conference.state = CallState::Active;
        conference.start_time = Some(now);
        conference.conference_id = Some(conference_id.clone());
        conference.participants = members.to_vec();
        self.live.insert(conference_id.clone(), conference);

        Ok(conference_id)
    }

    /// Conference records left without participants
    pub fn empty_conferences(&self) -> Vec<String> {
        self.live
            .values()
            .filter(|call| call.is_conference() && call.participants.is_empty())
            .map(|call| call.id.clone())
            .collect()
    }

    /// Drop `id` from its conference's participant list.
    ///
    /// The call keeps its own state; the provider follows up with property
    /// changes. Returns the conference id when the split dissolved it.
    pub fn split(&mut self, id: &str) -> Option<String> {
        let conference_id = self.live.get(id)?.conference_id.clone()?;
        let conference = self.live.get_mut(&conference_id)?;

        let before = conference.participants.len();
        conference.participants.retain(|member| member != id);
        if before != 2 {
            return None;
        }

        if let Some(dissolved) = self.live.shift_remove(&conference_id) {
            tracing::debug!("Conference {} dissolved", conference_id);
            self.retired.push(dissolved);
        }
        Some(conference_id)
    }

    /// Remove `id` from the arena and retire it
    pub fn remove(&mut self, id: &str) -> Option<RemovedCall> {
        let call = self.live.shift_remove(id)?;

        let mut orphaned_conference = None;
        if call.is_participant() {
            if let Some(conference_id) = &call.conference_id {
                if let Some(conference) = self.live.get_mut(conference_id) {
                    conference.participants.retain(|member| member != id);
                    if conference.participants.is_empty() {
                        orphaned_conference = Some(conference_id.clone());
                    }
                }
            }
        }

        // Members of a torn-down conference stay shadowed until their own
        // disconnect arrives
        let mut released_participants = Vec::new();
        if call.is_conference() && call.state != CallState::Disconnected {
            for member_id in &call.participants {
                if let Some(member) = self.live.get_mut(member_id) {
                    if member.conference_id.as_deref() != Some(id) {
                        continue;
                    }
                    member.conference_id = None;
                    if member.state == CallState::Conference {
                        member.state = member.saved_state.unwrap_or(CallState::Active);
                    }
                    member.saved_state = None;
                    released_participants.push(member_id.clone());
                }
            }
        }

        self.retired.push(call.clone());

        let mut freed = 0;
        if self.live.is_empty() {
            freed = self.retired.len();
            self.retired.clear();
        }

        Some(RemovedCall {
            call,
            orphaned_conference,
            released_participants,
            freed,
        })
    }

    /// Pick the call holding audio focus.
    ///
    /// `trigger` is the call whose state just changed and wins when it
    /// qualifies; otherwise the current active call is kept while it still
    /// qualifies, else the first qualifying call.
    pub fn active_candidate(&self, trigger: Option<&str>, current: Option<&str>) -> Option<String> {
        let qualifies = |id: &str| {
            self.live
                .get(id)
                .map(Self::holds_focus)
                .unwrap_or(false)
        };

        if let Some(trigger) = trigger.filter(|id| qualifies(id)) {
            return Some(trigger.to_string());
        }
        if let Some(current) = current.filter(|id| qualifies(id)) {
            return Some(current.to_string());
        }
        self.live
            .values()
            .find(|call| Self::holds_focus(call))
            .map(|call| call.id.clone())
    }

    fn holds_focus(call: &TelephonyCall) -> bool {
        call.state == CallState::Active && !call.is_participant()
    }
}
