use async_trait::async_trait;
use bridge_hub::{DeviceHub, HubError, InMemoryHub, Message};
use bridge_pipeline::{
    BridgeLoop, ErrorEventNotifier, ErrorWatermark, NodeReader, PipelineError, Stage,
    TwinReconciler,
};
use bridge_protocol::{ProtocolError, SimulatedDevice};
use domain::nodes::{DEVICE_ERROR, ERROR_NODES, PRODUCTION_RATE, TELEMETRY_NODES};
use domain::{MethodResult, NodeValue, PropertyPatch, ReadingSet, TwinState};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn setup() -> (Arc<SimulatedDevice>, Arc<InMemoryHub>, BridgeLoop) {
    let device = Arc::new(SimulatedDevice::with_default_nodes());
    let hub = Arc::new(InMemoryHub::new());
    let bridge = BridgeLoop::new(device.clone(), hub.clone(), Duration::from_millis(10));
    (device, hub, bridge)
}

/// 所有调用都不返回的通道。
struct StalledHub;

#[async_trait]
impl DeviceHub for StalledHub {
    async fn send_message(&self, _message: Message) -> Result<(), HubError> {
        std::future::pending().await
    }

    async fn get_twin(&self) -> Result<TwinState, HubError> {
        std::future::pending().await
    }

    async fn patch_reported(&self, _patch: PropertyPatch) -> Result<(), HubError> {
        std::future::pending().await
    }

    async fn send_method_response(
        &self,
        _request_id: &str,
        _result: &MethodResult,
    ) -> Result<(), HubError> {
        std::future::pending().await
    }
}

fn error_readings(device_error: i64) -> ReadingSet {
    [
        (DEVICE_ERROR, NodeValue::I64(device_error)),
        ("WorkorderId", NodeValue::from("wo-1")),
    ]
    .into_iter()
    .collect()
}

#[tokio::test]
async fn reader_returns_exactly_requested_nodes() {
    let device = Arc::new(SimulatedDevice::with_default_nodes());
    let reader = NodeReader::new(device.clone());

    let readings = reader.read(&TELEMETRY_NODES).await.expect("read");
    let mut names: Vec<&str> = readings.names().collect();
    names.sort_unstable();
    let mut expected = TELEMETRY_NODES.to_vec();
    expected.sort_unstable();
    assert_eq!(names, expected);

    device.remove("Temperature");
    let err = reader.read(&TELEMETRY_NODES).await.expect_err("lookup");
    assert!(matches!(
        err,
        PipelineError::Read(ProtocolError::NodeLookup { ref node }) if node == "Temperature"
    ));
}

#[tokio::test]
async fn notifier_emits_only_on_increase() {
    let hub = Arc::new(InMemoryHub::new());
    let watermark = Arc::new(ErrorWatermark::new());
    let notifier = ErrorEventNotifier::new(hub.clone(), watermark.clone());

    assert!(!notifier.notify(&error_readings(0)).await.expect("zero"));
    assert!(notifier.notify(&error_readings(2)).await.expect("rise"));
    assert_eq!(watermark.current().await, 2);
    assert!(!notifier.notify(&error_readings(2)).await.expect("repeat"));
    assert!(!notifier.notify(&error_readings(1)).await.expect("drop"));
    assert_eq!(watermark.current().await, 2);

    let events = hub.event_messages();
    assert_eq!(events.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&events[0].body).expect("json");
    assert_eq!(body, json!({"DeviceError": 2, "WorkorderId": "wo-1"}));

    let patches = hub.reported_patches();
    assert_eq!(patches.len(), 1);
    let date = patches[0]
        .get("LastErrorDate")
        .and_then(|value| value.as_str())
        .expect("LastErrorDate");
    assert_eq!(date.len(), "07/03/2024 09:05:02".len());
}

#[tokio::test]
async fn failed_event_send_keeps_watermark() {
    let hub = Arc::new(InMemoryHub::new());
    let watermark = Arc::new(ErrorWatermark::new());
    let notifier = ErrorEventNotifier::new(hub.clone(), watermark.clone());

    hub.fail_sends(true);
    let err = notifier.notify(&error_readings(4)).await.expect_err("send fails");
    assert!(matches!(err, PipelineError::Delivery(_)));
    assert_eq!(watermark.current().await, 0);
    assert!(hub.reported_patches().is_empty());

    hub.fail_sends(false);
    assert!(notifier.notify(&error_readings(4)).await.expect("retry"));
    assert_eq!(watermark.current().await, 4);
}

#[tokio::test]
async fn reconciler_skips_patch_when_in_sync() {
    let mut reported = PropertyPatch::new();
    reported.insert(PRODUCTION_RATE.to_string(), json!(100));
    reported.insert(DEVICE_ERROR.to_string(), json!(0));
    let twin = TwinState::new(PropertyPatch::new(), reported);
    let hub = Arc::new(InMemoryHub::with_twin(twin.clone()));
    let reconciler = TwinReconciler::new(hub.clone());

    let same: ReadingSet = [
        (PRODUCTION_RATE, NodeValue::I64(100)),
        (DEVICE_ERROR, NodeValue::I64(0)),
    ]
    .into_iter()
    .collect();
    assert!(reconciler.reconcile(&twin, &same).await.expect("sync").is_none());
    assert!(hub.reported_patches().is_empty());

    let changed: ReadingSet = [
        (PRODUCTION_RATE, NodeValue::I64(80)),
        (DEVICE_ERROR, NodeValue::I64(0)),
    ]
    .into_iter()
    .collect();
    let delta = reconciler
        .reconcile(&twin, &changed)
        .await
        .expect("patch")
        .expect("delta");
    assert_eq!(delta.len(), 1);
    assert_eq!(hub.reported_patches(), vec![delta]);
}

#[tokio::test]
async fn device_error_sequence_emits_two_events() {
    let (device, hub, bridge) = setup();
    let mut emitted = Vec::new();
    for device_error in [0, 0, 3, 3, 1, 5] {
        device.set(DEVICE_ERROR, NodeValue::I64(device_error));
        let report = bridge.run_iteration().await;
        assert!(report.failures.is_empty(), "{:?}", report.failures);
        emitted.push(report.error_event_sent);
    }

    assert_eq!(emitted, vec![false, false, true, false, false, true]);
    let events = hub.event_messages();
    assert_eq!(events.len(), 2);
    let values: Vec<i64> = events
        .iter()
        .map(|message| {
            let body: serde_json::Value = serde_json::from_slice(&message.body).expect("json");
            body[DEVICE_ERROR].as_i64().expect("DeviceError")
        })
        .collect();
    assert_eq!(values, vec![3, 5]);
    assert_eq!(bridge.watermark().current().await, 5);
    assert_eq!(hub.messages().len(), 6 + 2);
}

#[tokio::test]
async fn twin_is_patched_only_on_change() {
    let (device, hub, bridge) = setup();

    let first = bridge.run_iteration().await;
    let patch = first.twin_patch.expect("initial patch");
    assert_eq!(patch.get(PRODUCTION_RATE), Some(&json!(100)));
    assert_eq!(patch.get(DEVICE_ERROR), Some(&json!(0)));

    let second = bridge.run_iteration().await;
    assert!(!second.twin_patched());

    device.set(PRODUCTION_RATE, NodeValue::I64(70));
    let third = bridge.run_iteration().await;
    let patch = third.twin_patch.expect("rate patch");
    assert_eq!(patch.len(), 1);
    assert_eq!(hub.twin().reported_i64(PRODUCTION_RATE), Some(70));
}

#[tokio::test]
async fn stage_failures_do_not_block_later_stages() {
    let (device, hub, bridge) = setup();
    device.remove("GoodCount");
    hub.fail_twin(true);

    let report = bridge.run_iteration().await;
    assert!(report.failed(Stage::Telemetry));
    assert!(report.failed(Stage::Twin));
    assert!(!report.failed(Stage::ErrorEvent));
    assert!(!report.telemetry_sent);

    hub.fail_twin(false);
    device.set(DEVICE_ERROR, NodeValue::I64(8));
    let report = bridge.run_iteration().await;
    assert!(report.failed(Stage::Telemetry));
    assert!(report.error_event_sent);
    assert!(report.twin_patched());
}

#[tokio::test]
async fn error_stage_reads_its_own_group() {
    let device = Arc::new(SimulatedDevice::with_default_nodes());
    let reader = NodeReader::new(device.clone());
    device.remove("WorkorderId");
    assert!(reader.read(&ERROR_NODES).await.is_err());
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let (_device, hub, bridge) = setup();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let observed = hub.clone();
    let stop = async move {
        while observed.twin().reported_i64(DEVICE_ERROR).is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let _ = stop_tx.send(());
    };
    let run = bridge.run(async {
        let _ = stop_rx.await;
    });
    tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(run, stop) })
        .await
        .expect("loop stopped");

    assert!(!hub.messages().is_empty());
    let twin = hub.get_twin().await.expect("twin");
    assert_eq!(twin.reported_i64(DEVICE_ERROR), Some(0));
}

#[tokio::test]
async fn shutdown_interrupts_stalled_iteration() {
    let device = Arc::new(SimulatedDevice::with_default_nodes());
    let bridge = BridgeLoop::new(device, Arc::new(StalledHub), Duration::from_millis(10));
    tokio::time::timeout(
        Duration::from_secs(2),
        bridge.run(tokio::time::sleep(Duration::from_millis(50))),
    )
    .await
    .expect("run honors shutdown mid-iteration");
}

#[tokio::test]
async fn failed_error_date_patch_resends_event() {
    let hub = Arc::new(InMemoryHub::new());
    let watermark = Arc::new(ErrorWatermark::new());
    let notifier = ErrorEventNotifier::new(hub.clone(), watermark.clone());

    hub.fail_twin(true);
    let err = notifier.notify(&error_readings(6)).await.expect_err("patch fails");
    assert!(matches!(err, PipelineError::Twin(_)));
    assert_eq!(hub.event_messages().len(), 1);
    assert_eq!(watermark.current().await, 0);

    // 重复事件可以接受，漏报不行
    hub.fail_twin(false);
    assert!(notifier.notify(&error_readings(6)).await.expect("retry"));
    assert_eq!(hub.event_messages().len(), 2);
    assert_eq!(watermark.current().await, 6);
    assert_eq!(hub.reported_patches().len(), 1);
}

#[tokio::test]
async fn twin_stage_runs_when_sends_fail() {
    let (device, hub, bridge) = setup();
    hub.fail_sends(true);
    device.set(DEVICE_ERROR, NodeValue::I64(2));

    let report = bridge.run_iteration().await;
    assert!(report.failed(Stage::Telemetry));
    assert!(report.failed(Stage::ErrorEvent));
    assert!(!report.telemetry_sent);
    assert!(!report.error_event_sent);
    assert!(report.twin_patched());
    assert_eq!(hub.twin().reported_i64(DEVICE_ERROR), Some(2));
    assert!(hub.messages().is_empty());
    assert_eq!(bridge.watermark().current().await, 0);
}
