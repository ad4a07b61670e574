//! End-to-end recording flows through the gated service.

use std::sync::Arc;

use serde_json::{Value, json};
use shellbus_core::{ChannelRegistry, ContextReceiver, ExecutionContext, SessionSink};
use shellbus_gate::{Surface, classify_context};
use shellbus_recorder::{CapturedEvent, RecordedEventType, Recorder, storage::MemorySink};
use shellbus_transport::{
    ClientMessage, EVENT_CAPTURED_CHANNEL, ErrorKind, RecordingOp, RecordingService, Reply,
    STATE_CHANGED_CHANNEL, ServerMessage, ServiceError,
};
use tokio_test::{assert_err, assert_ok};

struct Harness {
    service: RecordingService,
    sink: Arc<MemorySink>,
}

impl Harness {
    fn new() -> Self {
        let sink = Arc::new(MemorySink::new());
        let service = RecordingService::new(
            Arc::new(ChannelRegistry::new()),
            Arc::new(Recorder::default()),
            Arc::clone(&sink) as Arc<dyn SessionSink>,
        );
        Self { service, sink }
    }

    async fn call(&self, ctx: &ExecutionContext, op: RecordingOp) -> Result<Reply, ServiceError> {
        self.service.call(ctx, op).await
    }
}

fn drain(rx: &mut ContextReceiver) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    while let Ok(delivery) = rx.try_recv() {
        out.push((delivery.channel, delivery.payload));
    }
    out
}

#[tokio::test]
async fn test_each_ui_context_sees_toggle_once() {
    let h = Harness::new();
    let (main, mut main_rx) = ExecutionContext::from_location("shell-internal://main-ui");
    let (popup, mut popup_rx) = ExecutionContext::from_location("shell-internal://popup-ui");

    for (ctx, id) in [(&main, "main"), (&popup, "popup")] {
        assert_ok!(
            h.call(ctx, RecordingOp::OnRecordingStateChanged { listener_id: id.into() })
                .await
        );
    }

    let reply = assert_ok!(h.call(&main, RecordingOp::ToggleRecording).await);
    assert_eq!(reply, Reply::Recording(true));

    let expected = vec![(STATE_CHANGED_CHANNEL.to_string(), json!(true))];
    assert_eq!(drain(&mut main_rx), expected);
    assert_eq!(drain(&mut popup_rx), expected);
}

#[tokio::test]
async fn test_page_can_capture_but_not_export() {
    let h = Harness::new();
    let (ui, _ui_rx) = ExecutionContext::from_location("shell-internal://main-ui");
    let (page, _page_rx) = ExecutionContext::from_location("https://example.com/login");
    assert_eq!(classify_context(&page), Surface::Web);

    assert_ok!(h.call(&ui, RecordingOp::ToggleRecording).await);
    let event = CapturedEvent::new(RecordedEventType::Click, 3, "https://example.com/login")
        .with_element("#submit", "BUTTON");
    assert_ok!(h.call(&page, RecordingOp::CaptureEvent { event }).await);
    assert_eq!(h.service.recorder().event_count(), 1);

    let err = assert_err!(
        h.call(&page, RecordingOp::ExportRecording { session_data: None })
            .await
    );
    let ServiceError::PermissionDenied(denied) = err else {
        panic!("expected permission denial");
    };
    assert_eq!(denied.operation, "exportRecording");
    assert_eq!(denied.surface, Surface::Web);
    assert!(h.sink.exports().unwrap().is_empty());
}

#[tokio::test]
async fn test_every_surface_against_every_operation() {
    let h = Harness::new();
    let cases = [
        ("shell-internal://main-ui", true),
        ("shell-internal://popup-ui", true),
        ("shell-internal://omnibox", true),
        ("shell://new-tab", true),
        ("shell://omnibox", true),
        ("shell-internal://settings", false),
        ("shell://extensions", false),
        ("shell://history", false),
        ("https://example.com", false),
        ("file:///etc/passwd", false),
    ];
    for (location, browser_ui) in cases {
        let (ctx, _rx) = ExecutionContext::from_location(location);
        for name in RecordingOp::NAMES {
            let allowed = browser_ui || name == "captureEvent";
            assert_eq!(h.service.permits(&ctx, name), allowed, "{location} {name}");
        }
    }
}

#[tokio::test]
async fn test_record_then_export() {
    let h = Harness::new();
    let (ui, mut ui_rx) = ExecutionContext::from_location("shell-internal://main-ui");
    let (page, _page_rx) = ExecutionContext::from_location("https://shop.test/cart");

    assert_ok!(
        h.call(&ui, RecordingOp::OnEventCaptured { listener_id: "feed".into() })
            .await
    );
    assert_ok!(
        h.call(&ui, RecordingOp::SetRecordingState { is_recording: true })
            .await
    );

    let click = CapturedEvent::new(RecordedEventType::Click, 1, "https://shop.test/cart")
        .with_element("button.checkout", "BUTTON")
        .with_inner_text("  Proceed to checkout  ");
    let navigate = CapturedEvent::new(RecordedEventType::Navigate, 1, "https://shop.test/pay")
        .with_title("Payment");
    assert_ok!(h.call(&page, RecordingOp::CaptureEvent { event: click }).await);
    assert_ok!(h.call(&ui, RecordingOp::CaptureEvent { event: navigate }).await);

    let feed = drain(&mut ui_rx);
    assert_eq!(feed.len(), 2);
    assert!(feed.iter().all(|(channel, _)| channel == EVENT_CAPTURED_CHANNEL));
    assert_eq!(feed[0].1["type"], "click");
    assert_eq!(feed[1].1["type"], "navigate");

    assert_eq!(
        assert_ok!(h.call(&ui, RecordingOp::ToggleRecording).await),
        Reply::Recording(false)
    );

    let reply = assert_ok!(
        h.call(&ui, RecordingOp::ExportRecording { session_data: None })
            .await
    );
    assert_eq!(reply, Reply::Exported("memory://0".into()));

    let exports = h.sink.exports().unwrap();
    let session: Value = serde_json::from_str(&exports[0]).unwrap();
    let events = session["events"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["selector"], "button.checkout");
    assert_eq!(events[0]["innerText"], "Proceed to checkout");
    assert_eq!(events[1]["title"], "Payment");
    assert!(events[0]["timestamp"].as_u64() <= events[1]["timestamp"].as_u64());
    assert!(session["startTime"].as_u64() <= session["endTime"].as_u64());
    assert_eq!(session["metadata"]["appVersion"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_capture_while_idle_is_dropped() {
    let h = Harness::new();
    let (ui, mut ui_rx) = ExecutionContext::from_location("shell-internal://main-ui");
    assert_ok!(
        h.call(&ui, RecordingOp::OnEventCaptured { listener_id: "feed".into() })
            .await
    );

    let event = CapturedEvent::new(RecordedEventType::Scroll, 0, "https://a.test").with_scroll(0, 200);
    assert_eq!(
        assert_ok!(h.call(&ui, RecordingOp::CaptureEvent { event }).await),
        Reply::Done
    );
    assert_eq!(h.service.recorder().event_count(), 0);
    assert!(drain(&mut ui_rx).is_empty());
}

#[tokio::test]
async fn test_export_errors() {
    let h = Harness::new();
    let (ui, _rx) = ExecutionContext::from_location("shell://new-tab");

    let err = assert_err!(
        h.call(&ui, RecordingOp::ExportRecording { session_data: None })
            .await
    );
    assert_eq!(err.kind(), ErrorKind::NoActiveSession);

    assert_ok!(h.call(&ui, RecordingOp::ToggleRecording).await);
    h.sink.set_failing(true);
    let err = assert_err!(
        h.call(&ui, RecordingOp::ExportRecording { session_data: None })
            .await
    );
    assert_eq!(err.kind(), ErrorKind::ExportWriteFailed);

    // The session survives a failed export.
    h.sink.set_failing(false);
    assert_ok!(
        h.call(&ui, RecordingOp::ExportRecording { session_data: None })
            .await
    );
}

#[tokio::test]
async fn test_clear_keeps_session_running() {
    let h = Harness::new();
    let (ui, _rx) = ExecutionContext::from_location("shell-internal://main-ui");
    assert_ok!(h.call(&ui, RecordingOp::ToggleRecording).await);
    let session_id = h.service.recorder().session_id();

    let event = CapturedEvent::new(RecordedEventType::Input, 2, "https://a.test").with_value("abc");
    assert_ok!(h.call(&ui, RecordingOp::CaptureEvent { event }).await);
    assert_ok!(h.call(&ui, RecordingOp::ClearRecording).await);

    assert_eq!(h.service.recorder().event_count(), 0);
    assert!(h.service.recorder().is_recording());
    assert_eq!(h.service.recorder().session_id(), session_id);
}

#[tokio::test]
async fn test_destroyed_context_is_forgotten() {
    let h = Harness::new();
    let (ui, _ui_rx) = ExecutionContext::from_location("shell-internal://main-ui");
    let (popup, mut popup_rx) = ExecutionContext::from_location("shell-internal://popup-ui");

    for (ctx, id) in [(&ui, "a"), (&popup, "b")] {
        assert_ok!(
            h.call(ctx, RecordingOp::OnRecordingStateChanged { listener_id: id.into() })
                .await
        );
        assert_ok!(
            h.call(ctx, RecordingOp::OnEventCaptured { listener_id: id.into() })
                .await
        );
    }
    let registry = h.service.registry();
    assert_eq!(registry.registration_count(), 4);

    ui.destroy();
    assert!(!registry.is_tracking(ui.id()));
    assert_eq!(registry.registrations_for(ui.id()), 0);
    assert_eq!(registry.registration_count(), 2);

    assert_ok!(h.call(&popup, RecordingOp::ToggleRecording).await);
    assert_eq!(
        drain(&mut popup_rx),
        vec![(STATE_CHANGED_CHANNEL.to_string(), json!(true))]
    );
}

#[tokio::test]
async fn test_wire_dispatch() {
    let h = Harness::new();
    let (ui, mut ui_rx) = ExecutionContext::from_location("shell-internal://main-ui");
    let (page, _page_rx) = ExecutionContext::from_location("https://a.test");

    let msg: ClientMessage = serde_json::from_value(json!({
        "type": "call",
        "id": 1,
        "operation": { "op": "onRecordingStateChanged", "listenerId": "l1" }
    }))
    .unwrap();
    assert_eq!(
        h.service.handle(&ui, msg).await,
        Some(ServerMessage::Response { id: 1, result: Reply::Done })
    );

    // Another context cannot remove the listener; the owner can.
    let remove = ClientMessage::RemoveListener {
        channel: STATE_CHANGED_CHANNEL.into(),
        listener_id: "l1".into(),
    };
    assert!(h.service.handle(&page, remove.clone()).await.is_none());
    assert!(h.service.registry().has_listeners(STATE_CHANGED_CHANNEL));
    assert!(h.service.handle(&ui, remove).await.is_none());
    assert!(!h.service.registry().has_listeners(STATE_CHANGED_CHANNEL));

    let toggle = ClientMessage::Call {
        id: None,
        operation: RecordingOp::ToggleRecording,
    };
    assert!(h.service.handle(&ui, toggle).await.is_none());
    assert!(h.service.recorder().is_recording());
    assert!(drain(&mut ui_rx).is_empty());

    let reply = h
        .service
        .handle(&page, ClientMessage::Call { id: Some(2), operation: RecordingOp::IsRecording })
        .await;
    assert!(matches!(
        reply,
        Some(ServerMessage::Error { id: Some(2), kind: ErrorKind::PermissionDenied, .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_toggles_publish_in_order() {
    let service = Arc::new(RecordingService::new(
        Arc::new(ChannelRegistry::new()),
        Arc::new(Recorder::default()),
        Arc::new(MemorySink::new()) as Arc<dyn SessionSink>,
    ));
    let (main, mut main_rx) = ExecutionContext::from_location("shell-internal://main-ui");
    let (popup, _popup_rx) = ExecutionContext::from_location("shell-internal://popup-ui");
    assert_ok!(
        service
            .call(&main, RecordingOp::OnRecordingStateChanged { listener_id: "main".into() })
            .await
    );

    for _ in 0..200 {
        let handles: Vec<_> = [main.clone(), popup.clone()]
            .into_iter()
            .map(|ctx| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.call(&ctx, RecordingOp::ToggleRecording).await })
            })
            .collect();
        let mut replies = Vec::new();
        for handle in handles {
            replies.push(assert_ok!(handle.await.unwrap()));
        }
        replies.sort_by_key(|reply| *reply == Reply::Recording(true));
        assert_eq!(replies, vec![Reply::Recording(false), Reply::Recording(true)]);

        let published: Vec<Value> = drain(&mut main_rx).into_iter().map(|(_, v)| v).collect();
        assert_eq!(published, vec![json!(true), json!(false)]);
        assert!(!service.recorder().is_recording());
    }
}
