//! Single-call lifecycle through the request surface and provider signals

mod common;

use common::{error_name, provider_path, return_value, Harness, MODEM, SERVICE_ID};
use pretty_assertions::assert_eq;
use serde_json::json;
use xwalk_telephony_core::provider::memory::{InMemoryProvider, ProviderOperation};
use xwalk_telephony_core::provider::{keys, HideCallerId, ProviderEvent};
use xwalk_telephony_core::{CallField, CallState, Notification};

#[tokio::test]
async fn test_dial_then_answered_becomes_active() {
    let mut h = Harness::new().await;

    let reply = h
        .request(json!({ "cmd": "dial", "promiseId": 1, "remoteParty": "12345" }))
        .await;
    let call = return_value(&reply).clone();
    assert_eq!(reply.cmd.as_deref(), Some("dial"));
    assert_eq!(call["callId"], "|phonesim|voicecall01");
    assert_eq!(call["serviceId"], SERVICE_ID);
    assert_eq!(call["state"], "dialing");
    assert_eq!(call["remoteParty"], "12345");
    assert_eq!(h.notification_names(), vec!["callAdded"]);
    assert_eq!(
        h.provider.operations()[0],
        ProviderOperation::Dial {
            modem: MODEM.to_string(),
            number: "12345".to_string(),
            hide_caller_id: HideCallerId::Default,
        }
    );

    // The signal for a call the backend already created changes nothing
    h.pump().await;
    assert!(h.notifications().is_empty());

    let call_id = "|phonesim|voicecall01";
    h.provider.set_call_property(&provider_path(call_id), keys::STATE, "alerting".into());
    h.pump().await;
    assert_eq!(h.notification_names(), vec!["callStateChanged", "activeCallChanged"]);
    assert_eq!(h.backend.active_call_id(), None);

    h.provider.set_call_property(&provider_path(call_id), keys::STATE, "active".into());
    h.pump().await;
    let notifications = h.notifications();
    assert_eq!(notifications.len(), 2);
    match &notifications[0] {
        Notification::CallStateChanged { call, changed_fields } => {
            assert_eq!(call.call_id, call_id);
            assert_eq!(call.state, CallState::Active);
            assert_eq!(changed_fields, &vec![CallField::State]);
        }
        other => panic!("unexpected notification {:?}", other),
    }
    match &notifications[1] {
        Notification::ActiveCallChanged { call: Some(call) } => assert_eq!(call.call_id, call_id),
        other => panic!("unexpected notification {:?}", other),
    }
    assert_eq!(h.backend.active_call_id(), Some(call_id));
}

#[tokio::test]
async fn test_dial_hide_caller_id_is_forwarded() {
    let mut h = Harness::new().await;

    h.request(json!({ "cmd": "dial", "promiseId": 1, "remoteParty": "+358401234", "hideCallerId": true }))
        .await;
    assert!(matches!(
        &h.provider.operations()[0],
        ProviderOperation::Dial { hide_caller_id: HideCallerId::Enabled, .. }
    ));
}

#[tokio::test]
async fn test_dial_invalid_number_rejected_locally() {
    let mut h = Harness::new().await;

    let reply = h.request(json!({ "cmd": "dial", "promiseId": 2, "remoteParty": "abc" })).await;
    assert!(reply.is_error);
    assert_eq!(error_name(&reply), Some("NoModificationAllowedError"));
    assert!(h.provider.operations().is_empty());
    assert!(h.notifications().is_empty());
}

#[tokio::test]
async fn test_dial_unknown_or_disabled_service_rejected() {
    let mut h = Harness::new().await;

    let reply = h
        .request(json!({ "cmd": "dial", "promiseId": 1, "serviceId": "|nope", "remoteParty": "12345" }))
        .await;
    assert_eq!(error_name(&reply), Some("NoModificationAllowedError"));

    h.request_and_pump(json!({ "cmd": "setServiceEnabled", "promiseId": 2, "serviceId": SERVICE_ID, "enabled": false }))
        .await;
    h.provider.clear_operations();

    let reply = h.request(json!({ "cmd": "dial", "promiseId": 3, "remoteParty": "12345" })).await;
    assert_eq!(error_name(&reply), Some("NoModificationAllowedError"));
    assert!(h.provider.operations().is_empty());
}

#[tokio::test]
async fn test_dial_falls_back_when_properties_unavailable() {
    let mut h = Harness::new().await;
    h.provider.fail_on("GetProperties");

    let reply = h.request(json!({ "cmd": "dial", "promiseId": 1, "remoteParty": "12345" })).await;
    let call = return_value(&reply);
    assert_eq!(call["state"], "dialing");
    assert_eq!(call["remoteParty"], "12345");
}

#[tokio::test]
async fn test_remote_hangup_reports_reason_and_removes_call() {
    let mut h = Harness::new().await;
    let call_id = h.network_call("active", "555").await;
    assert_eq!(h.backend.active_call_id(), Some(call_id.as_str()));

    let reply = h.request_and_pump(json!({ "cmd": "disconnect", "promiseId": 1, "callId": call_id })).await;
    assert!(!reply.is_error);
    assert_eq!(
        h.provider.operations(),
        vec![ProviderOperation::Hangup { call: provider_path(&call_id) }]
    );

    let notifications = h.notifications();
    let names: Vec<_> = notifications.iter().map(Notification::name).collect();
    assert_eq!(names, vec!["callChanged", "callStateChanged", "callRemoved", "activeCallChanged"]);

    match &notifications[0] {
        Notification::CallChanged { call, changed_fields } => {
            assert_eq!(call.state_reason, "local");
            assert_eq!(changed_fields, &vec![CallField::StateReason]);
        }
        other => panic!("unexpected notification {:?}", other),
    }
    match &notifications[1] {
        Notification::CallStateChanged { call, .. } => {
            assert_eq!(call.state, CallState::Disconnected);
            assert_eq!(call.duration, Some(0));
        }
        other => panic!("unexpected notification {:?}", other),
    }
    assert_eq!(notifications[3], Notification::ActiveCallChanged { call: None });

    assert!(h.backend.calls().is_empty());
    assert_eq!(h.backend.calls().retired_len(), 0);
}

#[tokio::test]
async fn test_hold_on_disconnected_call_rejected_without_provider_call() {
    let mut h = Harness::new().await;
    let call_id = h.network_call("active", "555").await;
    h.request_and_pump(json!({ "cmd": "disconnect", "promiseId": 1, "callId": call_id })).await;
    h.provider.clear_operations();

    let reply = h.request(json!({ "cmd": "hold", "promiseId": 2, "callId": call_id })).await;
    assert_eq!(error_name(&reply), Some("NoModificationAllowedError"));
    assert!(h.provider.operations().is_empty());
}

#[tokio::test]
async fn test_hold_requires_holdable_state() {
    let mut h = Harness::new().await;
    let call_id = h.network_call("dialing", "555").await;

    let reply = h.request(json!({ "cmd": "hold", "promiseId": 1, "callId": call_id })).await;
    assert!(reply.is_error);
    assert!(h.provider.operations().is_empty());
}

#[tokio::test]
async fn test_hold_and_resume_swap_calls() {
    let mut h = Harness::new().await;
    let held = h.network_call("held", "111").await;
    let active = h.network_call("active", "222").await;

    let reply = h.request_and_pump(json!({ "cmd": "hold", "promiseId": 1, "callId": active })).await;
    assert!(!reply.is_error);
    assert_eq!(h.provider.operations(), vec![ProviderOperation::SwapCalls { modem: MODEM.to_string() }]);
    assert_eq!(h.call(&active).state, CallState::Held);
    assert_eq!(h.call(&held).state, CallState::Active);
    assert_eq!(h.backend.active_call_id(), Some(held.as_str()));

    h.provider.clear_operations();
    let reply = h.request_and_pump(json!({ "cmd": "resume", "promiseId": 2, "callId": active })).await;
    assert!(!reply.is_error);
    assert_eq!(h.provider.operations(), vec![ProviderOperation::SwapCalls { modem: MODEM.to_string() }]);
    assert_eq!(h.call(&active).state, CallState::Active);

    h.provider.clear_operations();
    let reply = h.request(json!({ "cmd": "resume", "promiseId": 3, "callId": active })).await;
    assert!(reply.is_error);
    assert!(h.provider.operations().is_empty());
}

#[tokio::test]
async fn test_hold_with_waiting_call_answers_it() {
    let mut h = Harness::new().await;
    let active = h.network_call("active", "111").await;
    let waiting = h.network_call("waiting", "222").await;

    h.request_and_pump(json!({ "cmd": "hold", "promiseId": 1, "callId": active })).await;
    assert_eq!(
        h.provider.operations(),
        vec![ProviderOperation::HoldAndAnswer { modem: MODEM.to_string() }]
    );
    assert_eq!(h.call(&active).state, CallState::Held);
    assert_eq!(h.call(&waiting).state, CallState::Active);
    assert_eq!(h.backend.active_call_id(), Some(waiting.as_str()));
}

#[tokio::test]
async fn test_accept_incoming_and_waiting() {
    let mut h = Harness::new().await;
    let incoming = h.network_call("incoming", "111").await;

    h.request_and_pump(json!({ "cmd": "accept", "promiseId": 1, "callId": incoming })).await;
    assert_eq!(h.provider.operations(), vec![ProviderOperation::Answer { call: provider_path(&incoming) }]);
    assert_eq!(h.call(&incoming).state, CallState::Active);
    assert_eq!(h.backend.active_call_id(), Some(incoming.as_str()));

    let waiting = h.network_call("waiting", "222").await;
    h.provider.clear_operations();
    h.request_and_pump(json!({ "cmd": "accept", "promiseId": 2, "callId": waiting })).await;
    assert_eq!(
        h.provider.operations(),
        vec![ProviderOperation::HoldAndAnswer { modem: MODEM.to_string() }]
    );
    assert_eq!(h.backend.active_call_id(), Some(waiting.as_str()));

    h.provider.clear_operations();
    let reply = h.request(json!({ "cmd": "accept", "promiseId": 3, "callId": waiting })).await;
    assert!(reply.is_error);
    assert!(h.provider.operations().is_empty());
}

#[tokio::test]
async fn test_deflect_validates_number() {
    let mut h = Harness::new().await;
    let incoming = h.network_call("incoming", "111").await;

    let reply = h
        .request(json!({ "cmd": "deflect", "promiseId": 1, "callId": incoming, "remoteParty": "voicemail" }))
        .await;
    assert!(reply.is_error);
    assert!(h.provider.operations().is_empty());

    let reply = h
        .request_and_pump(json!({ "cmd": "deflect", "promiseId": 2, "callId": incoming, "remoteParty": "+3581234" }))
        .await;
    assert!(!reply.is_error);
    assert_eq!(
        h.provider.operations(),
        vec![ProviderOperation::Deflect {
            call: provider_path(&incoming),
            number: "+3581234".to_string(),
        }]
    );
    assert!(h.backend.calls().is_empty());
}

#[tokio::test]
async fn test_transfer_requires_connected_call() {
    let mut h = Harness::new().await;
    let incoming = h.network_call("incoming", "111").await;

    let reply = h.request(json!({ "cmd": "transfer", "promiseId": 1, "callId": incoming })).await;
    assert!(reply.is_error);
    assert!(h.provider.operations().is_empty());

    let mut h = Harness::new().await;
    h.network_call("held", "111").await;
    let active = h.network_call("active", "222").await;
    let reply = h.request_and_pump(json!({ "cmd": "transfer", "promiseId": 2, "callId": active })).await;
    assert!(!reply.is_error);
    assert_eq!(h.provider.operations(), vec![ProviderOperation::Transfer { modem: MODEM.to_string() }]);
    assert!(h.backend.calls().is_empty());
}

#[tokio::test]
async fn test_send_tones() {
    let mut h = Harness::new().await;

    let reply = h.request(json!({ "cmd": "sendTones", "promiseId": 1, "tones": "12#" })).await;
    assert!(!reply.is_error);
    assert_eq!(
        h.provider.operations(),
        vec![ProviderOperation::SendTones {
            modem: MODEM.to_string(),
            tones: "12#".to_string(),
        }]
    );

    h.provider.clear_operations();
    let reply = h.request(json!({ "cmd": "sendTones", "promiseId": 2, "tones": "xyz" })).await;
    assert!(reply.is_error);
    assert!(h.provider.operations().is_empty());
}

#[tokio::test]
async fn test_unsupported_commands_skip_provider() {
    let mut h = Harness::new().await;

    for cmd in ["startTone", "stopTone", "emergencyDial"] {
        let reply = h.request(json!({ "cmd": cmd, "promiseId": 1 })).await;
        assert_eq!(error_name(&reply), Some("NotSupportedError"), "{}", cmd);
        assert_eq!(reply.return_value.as_ref().unwrap()["code"], 9);
    }
    assert!(h.provider.operations().is_empty());
}

#[tokio::test]
async fn test_provider_failure_is_reported() {
    let mut h = Harness::new().await;
    let active = h.network_call("active", "111").await;
    h.provider.fail_on("SwapCalls");

    let reply = h.request(json!({ "cmd": "hold", "promiseId": 1, "callId": active })).await;
    assert_eq!(error_name(&reply), Some("NoModificationAllowedError"));
    assert_eq!(h.provider.operations(), vec![ProviderOperation::SwapCalls { modem: MODEM.to_string() }]);
    assert_eq!(h.call(&active).state, CallState::Active);

    // Nothing was rolled back or retried; a fresh request goes through
    h.provider.clear_failures();
    let reply = h.request_and_pump(json!({ "cmd": "hold", "promiseId": 2, "callId": active })).await;
    assert!(!reply.is_error);
    assert_eq!(h.call(&active).state, CallState::Held);
}

#[tokio::test]
async fn test_emergency_numbers() {
    let mut h = Harness::new().await;
    h.provider.set_emergency_numbers(&["112", "911"]);

    let reply = h.request(json!({ "cmd": "getEmergencyNumbers", "promiseId": 1 })).await;
    assert_eq!(return_value(&reply), &json!(["112", "911"]));

    h.backend
        .handle_event(ProviderEvent::CallManagerPropertyChanged {
            modem: MODEM.to_string(),
            key: keys::EMERGENCY_NUMBERS.to_string(),
            value: xwalk_telephony_core::provider::PropertyValue::StringList(vec!["112".to_string()]),
        })
        .await;
    assert_eq!(
        h.notifications(),
        vec![Notification::EmergencyNumbersChanged {
            numbers: vec!["112".to_string()],
        }]
    );
}

#[tokio::test]
async fn test_notifications_can_be_disabled() {
    let mut h = Harness::new().await;

    let reply = h.request(json!({ "cmd": "disableNotifications", "promiseId": 1 })).await;
    assert!(!reply.is_error);
    assert!(!h.backend.notifications_enabled());

    let call_id = h.network_call("incoming", "111").await;
    h.provider.set_call_property(&provider_path(&call_id), keys::NAME, "Alice".into());
    h.pump().await;
    assert!(h.notifications().is_empty());
    assert_eq!(h.call(&call_id).name, "Alice");

    h.request(json!({ "cmd": "enableNotifications", "promiseId": 2 })).await;
    h.provider.set_call_property(&provider_path(&call_id), keys::NAME, "Bob".into());
    h.pump().await;
    assert_eq!(h.notification_names(), vec!["callChanged"]);
}

#[tokio::test]
async fn test_get_calls_lists_live_calls() {
    let mut h = Harness::new().await;
    h.network_call("incoming", "111").await;
    h.network_call("held", "222").await;

    let reply = h.request(json!({ "cmd": "getCalls", "promiseId": 1 })).await;
    let calls = return_value(&reply).as_array().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0]["remoteParty"], "111");
    assert_eq!(calls[1]["state"], "held");
}

#[tokio::test]
async fn test_start_seeds_existing_calls() {
    let mut h = Harness::build(|provider| {
        provider.add_modem(MODEM, InMemoryProvider::modem_properties("phonesim"));
        provider.add_call(MODEM, "active", "111");
        provider.add_call(MODEM, "held", "222");
    })
    .await;

    assert_eq!(h.backend.calls().len(), 2);
    assert_eq!(h.backend.active_call_id(), Some("|phonesim|voicecall01"));
    assert_eq!(h.call("|phonesim|voicecall02").service_id.as_deref(), Some(SERVICE_ID));
    assert!(h.notifications().is_empty());
}

#[tokio::test]
async fn test_call_on_unknown_service_triggers_refresh() {
    let mut h = Harness::new().await;
    h.provider.add_modem("/ril_1", InMemoryProvider::modem_properties("ril_1"));

    h.backend
        .handle_event(ProviderEvent::CallAdded {
            path: "/ril_1/voicecall07".to_string(),
            properties: InMemoryProvider::call_properties("incoming", "333"),
        })
        .await;

    assert_eq!(h.provider.operations(), vec![ProviderOperation::GetModems]);
    assert!(h.backend.services().contains("|ril_1"));
    assert_eq!(h.call("|ril_1|voicecall07").service_id.as_deref(), Some("|ril_1"));
}
