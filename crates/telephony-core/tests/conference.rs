//! Conference emulation over the provider's flat call list

mod common;

use common::{error_name, provider_path, return_value, Harness, MODEM};
use pretty_assertions::assert_eq;
use serde_json::json;
use xwalk_telephony_core::provider::memory::ProviderOperation;
use xwalk_telephony_core::provider::keys;
use xwalk_telephony_core::{CallState, Notification};

/// Two calls merged into a conference; returns (conference, first, second)
async fn merged_pair(h: &mut Harness) -> (String, String, String) {
    let first = h.network_call("held", "111").await;
    let second = h.network_call("active", "222").await;

    let reply = h.request_and_pump(json!({ "cmd": "createConference", "promiseId": 1 })).await;
    let conference_id = return_value(&reply)["callId"].as_str().unwrap().to_string();
    h.notifications();
    h.provider.clear_operations();
    (conference_id, first, second)
}

fn count_removed(notifications: &[Notification], call_id: &str) -> usize {
    notifications
        .iter()
        .filter(|notification| matches!(notification, Notification::CallRemoved { call } if call.call_id == call_id))
        .count()
}

#[tokio::test]
async fn test_merge_two_calls() {
    let mut h = Harness::new().await;
    let first = h.network_call("held", "111").await;
    let second = h.network_call("active", "222").await;

    let reply = h.request(json!({ "cmd": "createConference", "promiseId": 1 })).await;
    let conference = return_value(&reply).clone();
    assert_eq!(conference["callId"], "conference-1");
    assert_eq!(conference["state"], "active");
    assert_eq!(conference["conferenceId"], "conference-1");
    assert_eq!(conference["participants"], json!([first, second]));
    assert!(conference["startTime"].is_i64());
    assert_eq!(
        h.provider.operations(),
        vec![ProviderOperation::CreateMultiparty { modem: MODEM.to_string() }]
    );

    let notifications = h.notifications();
    let names: Vec<_> = notifications.iter().map(Notification::name).collect();
    assert_eq!(names, vec!["activeCallChanged", "callStateChanged", "callStateChanged"]);
    match &notifications[0] {
        Notification::ActiveCallChanged { call: Some(call) } => assert_eq!(call.call_id, "conference-1"),
        other => panic!("unexpected notification {:?}", other),
    }
    for notification in &notifications[1..] {
        match notification {
            Notification::CallStateChanged { call, .. } => {
                assert_eq!(call.state, CallState::Conference);
                assert_eq!(call.conference_id.as_deref(), Some("conference-1"));
            }
            other => panic!("unexpected notification {:?}", other),
        }
    }

    // Provider follow-ups (Multiparty, held member going active) stay hidden
    h.pump().await;
    assert!(h.notifications().is_empty());
    for member in [&first, &second] {
        let call = h.call(member);
        assert_eq!(call.state, CallState::Conference);
    }
    assert_eq!(h.backend.calls().find(&first).unwrap().saved_state, Some(CallState::Active));
    assert_eq!(h.backend.active_call_id(), Some("conference-1"));
}

#[tokio::test]
async fn test_get_participants() {
    let mut h = Harness::new().await;
    let (conference_id, first, second) = merged_pair(&mut h).await;

    let reply = h.request(json!({ "cmd": "getParticipants", "promiseId": 2, "callId": conference_id })).await;
    let participants = return_value(&reply).as_array().unwrap().clone();
    assert_eq!(participants.len(), 2);
    assert_eq!(participants[0]["callId"], first.as_str());
    assert_eq!(participants[1]["callId"], second.as_str());
    assert_eq!(participants[0]["state"], "conference");

    let reply = h.request(json!({ "cmd": "getParticipants", "promiseId": 3, "callId": first })).await;
    assert_eq!(error_name(&reply), Some("NoModificationAllowedError"));
}

#[tokio::test]
async fn test_conference_held_only_when_every_participant_held() {
    let mut h = Harness::new().await;
    let (conference_id, first, second) = merged_pair(&mut h).await;

    h.provider.set_call_property(&provider_path(&first), keys::STATE, "held".into());
    h.pump().await;
    assert!(h.notifications().is_empty());
    assert_eq!(h.call(&conference_id).state, CallState::Active);

    h.provider.set_call_property(&provider_path(&second), keys::STATE, "held".into());
    h.pump().await;
    let notifications = h.notifications();
    assert_eq!(notifications.len(), 2);
    match &notifications[0] {
        Notification::CallStateChanged { call, .. } => {
            assert_eq!(call.call_id, conference_id);
            assert_eq!(call.state, CallState::Held);
        }
        other => panic!("unexpected notification {:?}", other),
    }
    assert_eq!(notifications[1], Notification::ActiveCallChanged { call: None });

    // Participants keep reporting the shadow state throughout
    assert_eq!(h.call(&first).state, CallState::Conference);
    assert_eq!(h.call(&second).state, CallState::Conference);
}

#[tokio::test]
async fn test_hold_conference_swaps() {
    let mut h = Harness::new().await;
    let (conference_id, _, _) = merged_pair(&mut h).await;

    let reply = h.request_and_pump(json!({ "cmd": "hold", "promiseId": 2, "callId": conference_id })).await;
    assert!(!reply.is_error);
    assert_eq!(h.provider.operations(), vec![ProviderOperation::SwapCalls { modem: MODEM.to_string() }]);
    assert_eq!(h.call(&conference_id).state, CallState::Held);

    let reply = h.request_and_pump(json!({ "cmd": "resume", "promiseId": 3, "callId": conference_id })).await;
    assert!(!reply.is_error);
    assert_eq!(h.call(&conference_id).state, CallState::Active);
}

#[tokio::test]
async fn test_participant_cannot_be_held_directly() {
    let mut h = Harness::new().await;
    let (_, first, _) = merged_pair(&mut h).await;

    let reply = h.request(json!({ "cmd": "hold", "promiseId": 2, "callId": first })).await;
    assert!(reply.is_error);
    assert!(h.provider.operations().is_empty());
}

#[tokio::test]
async fn test_disconnect_conference_hangs_up_every_participant() {
    let mut h = Harness::new().await;
    let (conference_id, first, second) = merged_pair(&mut h).await;

    let reply = h.request(json!({ "cmd": "disconnect", "promiseId": 2, "callId": conference_id })).await;
    assert!(!reply.is_error);
    assert_eq!(
        h.provider.operations(),
        vec![
            ProviderOperation::Hangup { call: provider_path(&first) },
            ProviderOperation::Hangup { call: provider_path(&second) },
        ]
    );
    assert!(!h.backend.calls().contains(&conference_id));

    h.pump().await;
    let notifications = h.notifications();
    assert_eq!(count_removed(&notifications, &conference_id), 1);
    assert_eq!(count_removed(&notifications, &first), 1);
    assert_eq!(count_removed(&notifications, &second), 1);
    assert!(h.backend.calls().is_empty());
    assert_eq!(h.backend.active_call_id(), None);
}

#[tokio::test]
async fn test_disconnect_conference_leaves_no_active_call() {
    let mut h = Harness::new().await;
    let (conference_id, first, second) = merged_pair(&mut h).await;

    let reply = h.request(json!({ "cmd": "disconnect", "promiseId": 2, "callId": conference_id })).await;
    assert!(!reply.is_error);

    let notifications = h.notifications();
    let names: Vec<_> = notifications.iter().map(Notification::name).collect();
    assert_eq!(names, vec!["callRemoved", "activeCallChanged"]);
    assert_eq!(notifications[1], Notification::ActiveCallChanged { call: None });
    assert_eq!(h.backend.active_call_id(), None);

    // Hung-up members never surface as active while their signals are pending
    assert_eq!(h.call(&first).state, CallState::Conference);
    assert_eq!(h.call(&second).state, CallState::Conference);

    h.pump().await;
    let notifications = h.notifications();
    assert!(notifications
        .iter()
        .all(|notification| !matches!(notification, Notification::ActiveCallChanged { call: Some(_) })));
    assert!(notifications.iter().all(|notification| match notification {
        Notification::CallStateChanged { call, .. } => call.state != CallState::Active,
        _ => true,
    }));
    assert!(h.backend.calls().is_empty());
}

#[tokio::test]
async fn test_disconnect_conference_failure_hangs_up_all() {
    let mut h = Harness::new().await;
    let (conference_id, _, _) = merged_pair(&mut h).await;
    h.provider.fail_on("Hangup");

    let reply = h.request(json!({ "cmd": "disconnect", "promiseId": 2, "callId": conference_id })).await;
    assert_eq!(error_name(&reply), Some("NoModificationAllowedError"));
    assert!(h
        .provider
        .operations()
        .contains(&ProviderOperation::HangupAll { modem: MODEM.to_string() }));

    // Not removed by the failed request itself
    assert!(h.backend.calls().contains(&conference_id));
    assert!(h.notifications().is_empty());

    // Tearing down every member leaves the conference empty, which removes it
    h.pump().await;
    let notifications = h.notifications();
    assert_eq!(count_removed(&notifications, &conference_id), 1);
    assert!(h.backend.calls().is_empty());
}

#[tokio::test]
async fn test_split_from_two_member_conference_dissolves_it() {
    let mut h = Harness::new().await;
    let (conference_id, first, second) = merged_pair(&mut h).await;

    let reply = h.request(json!({ "cmd": "split", "promiseId": 2, "callId": first })).await;
    assert!(!reply.is_error);
    assert_eq!(
        h.provider.operations(),
        vec![ProviderOperation::PrivateChat {
            modem: MODEM.to_string(),
            call: provider_path(&first),
        }]
    );
    assert!(!h.backend.calls().contains(&conference_id));
    assert_eq!(count_removed(&h.notifications(), &conference_id), 0);

    h.pump().await;
    assert_eq!(h.call(&first).state, CallState::Active);
    assert_eq!(h.call(&first).conference_id, None);
    assert_eq!(h.call(&second).state, CallState::Held);
    assert_eq!(h.call(&second).conference_id, None);
    assert_eq!(h.backend.active_call_id(), Some(first.as_str()));
}

#[tokio::test]
async fn test_split_from_three_member_conference_keeps_it() {
    let mut h = Harness::new().await;
    let first = h.network_call("active", "111").await;
    let second = h.network_call("held", "222").await;
    let third = h.network_call("held", "333").await;

    let reply = h.request_and_pump(json!({ "cmd": "createConference", "promiseId": 1 })).await;
    let conference_id = return_value(&reply)["callId"].as_str().unwrap().to_string();
    assert_eq!(h.call(&conference_id).participants.len(), 3);

    let reply = h.request_and_pump(json!({ "cmd": "split", "promiseId": 2, "callId": second })).await;
    assert!(!reply.is_error);

    let conference = h.call(&conference_id);
    assert_eq!(conference.participants, vec![first.clone(), third.clone()]);
    assert_eq!(h.call(&second).conference_id, None);
    assert_eq!(h.call(&second).state, CallState::Active);
    assert_eq!(h.call(&first).state, CallState::Conference);
    assert_eq!(h.call(&third).state, CallState::Conference);
}

#[tokio::test]
async fn test_split_requires_participant() {
    let mut h = Harness::new().await;
    let standalone = h.network_call("active", "111").await;

    let reply = h.request(json!({ "cmd": "split", "promiseId": 1, "callId": standalone })).await;
    assert_eq!(error_name(&reply), Some("NoModificationAllowedError"));
    assert!(h.provider.operations().is_empty());
}

#[tokio::test]
async fn test_create_conference_with_untracked_member_fails_cleanly() {
    let mut h = Harness::new().await;
    let tracked = h.network_call("active", "111").await;
    // Known to the provider only
    h.provider.add_call(MODEM, "held", "222");

    let reply = h.request(json!({ "cmd": "createConference", "promiseId": 1 })).await;
    assert_eq!(error_name(&reply), Some("NoModificationAllowedError"));
    assert!(h.notifications().is_empty());
    assert_eq!(h.backend.calls().len(), 1);
    assert_eq!(h.call(&tracked).state, CallState::Active);
    assert_eq!(h.call(&tracked).conference_id, None);
}

#[tokio::test]
async fn test_remote_release_of_members_removes_conference() {
    let mut h = Harness::new().await;
    let (conference_id, first, second) = merged_pair(&mut h).await;

    h.provider.set_call_property(&provider_path(&first), keys::MULTIPARTY, false.into());
    h.pump().await;
    assert_eq!(h.call(&first).conference_id, None);
    assert_eq!(h.call(&conference_id).participants, vec![second.clone()]);

    h.provider.set_call_property(&provider_path(&second), keys::MULTIPARTY, false.into());
    h.pump().await;
    assert!(!h.backend.calls().contains(&conference_id));
    assert_eq!(count_removed(&h.notifications(), &conference_id), 1);
    assert_eq!(h.backend.calls().len(), 2);
}
