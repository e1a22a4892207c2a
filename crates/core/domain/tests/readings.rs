use chrono::TimeZone;
use domain::nodes::{DEVICE_ERROR, TELEMETRY_NODES, WORKORDER_ID, describe_device_error};
use domain::{MethodName, MethodResult, NodeValue, ReadingSet, TwinState, format_twin_timestamp};

#[test]
fn reading_set_serializes_flat_in_read_order() {
    let mut readings = ReadingSet::new();
    readings.insert("ProductionStatus", NodeValue::I64(1));
    readings.insert(WORKORDER_ID, NodeValue::from("a1b2"));
    readings.insert("Temperature", NodeValue::F64(61.5));

    let json = String::from_utf8(readings.to_json_bytes().expect("json")).expect("utf8");
    assert_eq!(
        json,
        r#"{"ProductionStatus":1,"WorkorderId":"a1b2","Temperature":61.5}"#
    );
}

#[test]
fn reading_set_insert_overwrites_same_name() {
    let mut readings = ReadingSet::new();
    readings.insert(DEVICE_ERROR, NodeValue::I64(1));
    readings.insert(DEVICE_ERROR, NodeValue::I64(4));
    assert_eq!(readings.len(), 1);
    assert_eq!(readings.get_i64(DEVICE_ERROR), Some(4));
}

#[test]
fn reading_set_reports_missing_names() {
    let readings: ReadingSet = [("ProductionStatus", NodeValue::I64(1))].into_iter().collect();
    let missing = readings.missing(&TELEMETRY_NODES);
    assert_eq!(missing.len(), 4);
    assert!(!missing.contains(&"ProductionStatus"));
}

#[test]
fn node_value_matches_json_numerically() {
    assert!(NodeValue::I64(3).matches_json(&serde_json::json!(3)));
    assert!(NodeValue::I64(3).matches_json(&serde_json::json!(3.0)));
    assert!(!NodeValue::I64(3).matches_json(&serde_json::json!("3")));
    assert!(!NodeValue::I64(3).matches_json(&serde_json::Value::Null));
}

#[test]
fn method_names_parse() {
    assert_eq!(MethodName::parse("EmergencyStop"), MethodName::EmergencyStop);
    assert_eq!(
        MethodName::parse("Foo"),
        MethodName::Unknown("Foo".to_string())
    );
    assert_eq!(MethodResult::not_found().status, 404);
    assert_eq!(
        MethodResult::failed().payload,
        serde_json::json!({ "succeed": false })
    );
}

#[test]
fn twin_state_reads_reported_integers() {
    let twin: TwinState = serde_json::from_value(serde_json::json!({
        "desired": { "ProductionRate": 80, "$version": 3 },
        "reported": { "ProductionRate": 90, "DeviceError": 0 }
    }))
    .expect("twin");
    assert_eq!(twin.reported_i64("ProductionRate"), Some(90));
    assert_eq!(twin.desired_i64("ProductionRate"), Some(80));
    assert_eq!(twin.reported_i64("LastErrorDate"), None);
}

#[test]
fn twin_timestamp_uses_day_month_year() {
    let at = chrono::Utc
        .with_ymd_and_hms(2024, 3, 7, 9, 5, 2)
        .single()
        .expect("time");
    assert_eq!(format_twin_timestamp(&at), "07/03/2024 09:05:02");
}

#[test]
fn device_error_flags_decode() {
    assert_eq!(describe_device_error(0), Vec::<&str>::new());
    assert_eq!(
        describe_device_error(5),
        vec!["Emergency stop", "Sensor failure"]
    );
}
