use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use switchboard::callrecord::{CallDirection, CallRecord, HangupReason};
use switchboard::directory::ExtensionDirectory;
use switchboard::event::SignalingEvent;
use switchboard::orchestrator::{CallOrchestrator, SignalingTransport};
use switchboard::registry::{CallSessionRegistry, CallState};
use switchboard::routing::{RouteConditions, RouteRule, RouteTarget};
use switchboard::store::{
    MemoryRuleStore, MemorySubscriberStore, PhoneNumberAssignment, UserRecord, UserStatus,
};

#[derive(Default)]
struct RecordingTransport {
    ops: Mutex<Vec<String>>,
}

impl RecordingTransport {
    fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignalingTransport for RecordingTransport {
    async fn bridge(&self, extension: &str, vendor_call_id: &str) -> Result<()> {
        self.ops
            .lock()
            .unwrap()
            .push(format!("bridge {} {}", extension, vendor_call_id));
        Ok(())
    }

    async fn terminate(&self, vendor_call_id: &str) -> Result<()> {
        self.ops
            .lock()
            .unwrap()
            .push(format!("terminate {}", vendor_call_id));
        Ok(())
    }
}

struct TestHarness {
    orchestrator: CallOrchestrator,
    transport: Arc<RecordingTransport>,
    records: tokio::sync::mpsc::UnboundedReceiver<CallRecord>,
}

async fn harness() -> TestHarness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let subscribers = MemorySubscriberStore::new();
    subscribers
        .insert_user(
            "alice",
            UserRecord {
                extension: Some("1001".to_string()),
                status: UserStatus::Active,
            },
        )
        .await;
    subscribers
        .insert_user(
            "bob",
            UserRecord {
                extension: Some("1002".to_string()),
                status: UserStatus::Active,
            },
        )
        .await;
    subscribers
        .insert_phone_number(
            "pn-1",
            PhoneNumberAssignment::User {
                user_id: "alice".to_string(),
            },
        )
        .await;

    let rules = MemoryRuleStore::new(vec![RouteRule {
        name: "catch-all".to_string(),
        description: None,
        phone_number_id: "pn-1".to_string(),
        priority: 100,
        enabled: true,
        conditions: RouteConditions::default(),
        target: RouteTarget::User {
            user_id: "alice".to_string(),
        },
    }]);

    let directory = Arc::new(ExtensionDirectory::new());
    directory.register("alice", "1001");
    directory.register("bob", "1002");

    let transport = Arc::new(RecordingTransport::default());
    let (record_tx, record_rx) = tokio::sync::mpsc::unbounded_channel();

    let orchestrator = CallOrchestrator::new(
        Arc::new(CallSessionRegistry::new()),
        directory,
        Arc::new(rules),
        Arc::new(subscribers),
        transport.clone(),
    )
    .with_callrecord_sender(record_tx);

    TestHarness {
        orchestrator,
        transport,
        records: record_rx,
    }
}

#[tokio::test]
async fn test_inbound_call_is_routed_bridged_and_completed() {
    let mut h = harness().await;

    let session = h
        .orchestrator
        .handle_inbound_call("pn-1", "+15551234567", "CA001")
        .await
        .unwrap()
        .expect("expected a routed session");
    assert_eq!(session.state, CallState::Ringing);
    assert_eq!(h.transport.ops(), vec!["bridge 1001 CA001"]);

    let registry = h.orchestrator.registry();
    let by_vendor = registry.get_by_vendor_id("CA001").unwrap();
    assert_eq!(by_vendor.call_id, session.call_id);

    h.orchestrator
        .handle_event(SignalingEvent::Answered {
            call_id: session.call_id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(
        registry.get_by_id(&session.call_id).unwrap().state,
        CallState::Connected
    );

    h.orchestrator
        .handle_event(SignalingEvent::Completed {
            call_id: session.call_id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(registry.count(), 0);
    assert!(registry.get_by_vendor_id("CA001").is_none());

    let record = h.records.try_recv().unwrap();
    assert_eq!(record.call_id, session.call_id);
    assert_eq!(record.direction, CallDirection::Inbound);
    assert_eq!(record.caller, "+15551234567");
    assert_eq!(record.callee, "alice");
    assert_eq!(record.hangup_reason, HangupReason::ByCaller);
    assert!(record.answer_time.is_some());
}

#[tokio::test]
async fn test_inbound_call_without_route_is_not_bridged() {
    let h = harness().await;

    let outcome = h
        .orchestrator
        .handle_inbound_call("pn-unknown", "+15551234567", "CA002")
        .await
        .unwrap();
    assert!(outcome.is_none());
    assert!(h.transport.ops().is_empty());
    assert_eq!(h.orchestrator.registry().count(), 0);
}

#[tokio::test]
async fn test_duplicate_vendor_call_id_is_rejected() {
    let h = harness().await;

    h.orchestrator
        .handle_inbound_call("pn-1", "+15551234567", "CA003")
        .await
        .unwrap()
        .unwrap();
    let err = h
        .orchestrator
        .handle_inbound_call("pn-1", "+15559876543", "CA003")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Vendor call id"));

    // the original session survives the rejected duplicate
    let survivor = h.orchestrator.registry().get_by_vendor_id("CA003").unwrap();
    assert_eq!(survivor.state, CallState::Ringing);
}

#[tokio::test]
async fn test_rejected_inbound_call_terminates_vendor_leg() {
    let mut h = harness().await;

    let session = h
        .orchestrator
        .handle_inbound_call("pn-1", "+15551234567", "CA004")
        .await
        .unwrap()
        .unwrap();

    h.orchestrator
        .handle_event(SignalingEvent::Rejected {
            call_id: session.call_id.clone(),
        })
        .await
        .unwrap();

    assert_eq!(h.orchestrator.registry().count(), 0);
    assert_eq!(
        h.transport.ops(),
        vec!["bridge 1001 CA004", "terminate CA004"]
    );
    let record = h.records.try_recv().unwrap();
    assert_eq!(record.hangup_reason, HangupReason::Rejected);
    assert!(record.answer_time.is_none());
}

#[tokio::test]
async fn test_late_events_for_finished_call_are_noops() {
    let h = harness().await;

    let session = h
        .orchestrator
        .handle_inbound_call("pn-1", "+15551234567", "CA005")
        .await
        .unwrap()
        .unwrap();

    h.orchestrator
        .handle_event(SignalingEvent::Completed {
            call_id: session.call_id.clone(),
        })
        .await
        .unwrap();

    // redelivered and racing events must not error or resurrect the call
    h.orchestrator
        .handle_event(SignalingEvent::Completed {
            call_id: session.call_id.clone(),
        })
        .await
        .unwrap();
    h.orchestrator
        .handle_event(SignalingEvent::Answered {
            call_id: session.call_id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(h.orchestrator.registry().count(), 0);
}

#[tokio::test]
async fn test_internal_dial_and_busy_destination() {
    let h = harness().await;

    let session = h
        .orchestrator
        .dial_internal("alice", "1002")
        .await
        .unwrap()
        .expect("bob should be reachable");
    assert_eq!(session.state, CallState::Ringing);
    assert!(h.orchestrator.registry().is_party_in_call("bob"));

    // bob is now busy
    let second = h.orchestrator.dial_internal("alice", "1002").await.unwrap();
    assert!(second.is_none());

    // unknown extension
    let third = h.orchestrator.dial_internal("alice", "9999").await.unwrap();
    assert!(third.is_none());
}

#[tokio::test]
async fn test_vendor_status_callbacks_drive_state() {
    let mut h = harness().await;

    let session = h
        .orchestrator
        .handle_inbound_call("pn-1", "+15551234567", "CA006")
        .await
        .unwrap()
        .unwrap();
    let registry = h.orchestrator.registry().clone();

    h.orchestrator
        .handle_event(SignalingEvent::StatusChanged {
            call_id: session.call_id.clone(),
            status: "connecting".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(
        registry.get_by_id(&session.call_id).unwrap().state,
        CallState::Connecting
    );

    h.orchestrator
        .handle_event(SignalingEvent::StatusChanged {
            call_id: session.call_id.clone(),
            status: "in-progress".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(
        registry.get_by_id(&session.call_id).unwrap().state,
        CallState::Connected
    );

    h.orchestrator
        .handle_event(SignalingEvent::StatusChanged {
            call_id: session.call_id.clone(),
            status: "completed".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(registry.count(), 0);
    let record = h.records.try_recv().unwrap();
    assert_eq!(record.hangup_reason, HangupReason::ByCallee);
}

#[tokio::test]
async fn test_party_disconnect_abandons_active_call() {
    let mut h = harness().await;

    h.orchestrator
        .handle_inbound_call("pn-1", "+15551234567", "CA007")
        .await
        .unwrap()
        .unwrap();

    h.orchestrator
        .handle_event(SignalingEvent::PartyDisconnected {
            party: "alice".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(h.orchestrator.registry().count(), 0);
    assert!(h
        .orchestrator
        .directory()
        .lookup_extension_by_party("alice")
        .is_none());
    assert!(h.transport.ops().contains(&"terminate CA007".to_string()));
    let record = h.records.try_recv().unwrap();
    assert_eq!(record.hangup_reason, HangupReason::BySystem);
}

#[tokio::test]
async fn test_serve_loop_processes_events() {
    let h = harness().await;
    let registry = h.orchestrator.registry().clone();
    let directory = h.orchestrator.directory().clone();

    let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
    event_tx
        .send(SignalingEvent::PartyConnected {
            party: "carol".to_string(),
            extension: "1003".to_string(),
        })
        .unwrap();
    event_tx
        .send(SignalingEvent::InboundCall {
            phone_number_id: "pn-1".to_string(),
            caller_number: "+15551234567".to_string(),
            vendor_call_id: "CA008".to_string(),
        })
        .unwrap();
    drop(event_tx);

    // channel closure drains the queue and exits the loop
    h.orchestrator.serve(event_rx).await;

    assert_eq!(
        directory.lookup_party_by_extension("1003"),
        Some("carol".to_string())
    );
    assert!(registry.get_by_vendor_id("CA008").is_some());
}

#[tokio::test]
async fn test_hangup_is_idempotent() {
    let mut h = harness().await;

    let session = h
        .orchestrator
        .handle_inbound_call("pn-1", "+15551234567", "CA009")
        .await
        .unwrap()
        .unwrap();

    h.orchestrator
        .hangup(&session.call_id, HangupReason::ByCallee)
        .await;
    h.orchestrator
        .hangup(&session.call_id, HangupReason::ByCallee)
        .await;

    assert_eq!(h.orchestrator.registry().count(), 0);
    assert!(h.records.try_recv().is_ok());
    assert!(h.records.try_recv().is_err());
}
