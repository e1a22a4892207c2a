use bridge_protocol::{FieldDevice, ProtocolError, SimulatedDevice};
use domain::NodeValue;
use domain::nodes::{DEVICE_ERROR, PRODUCTION_RATE, PRODUCTION_STATUS, TELEMETRY_NODES};

#[tokio::test]
async fn read_children_returns_every_requested_node() {
    let device = SimulatedDevice::with_default_nodes();
    let readings = device.read_children(&TELEMETRY_NODES).await.expect("read");
    assert_eq!(readings.len(), TELEMETRY_NODES.len());
    assert!(readings.missing(&TELEMETRY_NODES).is_empty());
}

#[tokio::test]
async fn read_children_is_all_or_nothing() {
    let device = SimulatedDevice::with_default_nodes();
    device.remove("BadCount");
    let err = device
        .read_children(&TELEMETRY_NODES)
        .await
        .expect_err("missing node");
    assert!(matches!(err, ProtocolError::NodeLookup { ref node } if node == "BadCount"));
    assert!(err.is_read_skippable());
}

#[tokio::test]
async fn emergency_stop_sets_error_bit_and_stops_production() {
    let device = SimulatedDevice::with_default_nodes();
    device.set(DEVICE_ERROR, NodeValue::I64(4));
    device.call_method("EmergencyStop").await.expect("call");
    assert_eq!(device.get(PRODUCTION_STATUS), Some(NodeValue::I64(0)));
    assert_eq!(device.get(DEVICE_ERROR), Some(NodeValue::I64(5)));

    device.call_method("ResetErrorStatus").await.expect("reset");
    assert_eq!(device.get(DEVICE_ERROR), Some(NodeValue::I64(0)));
    assert_eq!(device.calls(), vec!["EmergencyStop", "ResetErrorStatus"]);
}

#[tokio::test]
async fn unknown_method_and_injected_failure_error() {
    let device = SimulatedDevice::with_default_nodes();
    assert!(device.call_method("SelfDestruct").await.is_err());
    device.fail_method("EmergencyStop");
    let err = device.call_method("EmergencyStop").await.expect_err("fail");
    assert!(matches!(err, ProtocolError::Method(_)));
    assert!(device.calls().is_empty());
}

#[tokio::test]
async fn write_requires_existing_node() {
    let device = SimulatedDevice::with_default_nodes();
    device
        .write_child(PRODUCTION_RATE, NodeValue::I64(70))
        .await
        .expect("write");
    assert_eq!(device.get(PRODUCTION_RATE), Some(NodeValue::I64(70)));
    assert!(device.write_child("Missing", NodeValue::I64(1)).await.is_err());
}
