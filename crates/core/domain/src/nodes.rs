//! 现场设备节点目录与 DeviceError 位标志。

pub const PRODUCTION_STATUS: &str = "ProductionStatus";
pub const WORKORDER_ID: &str = "WorkorderId";
pub const GOOD_COUNT: &str = "GoodCount";
pub const BAD_COUNT: &str = "BadCount";
pub const TEMPERATURE: &str = "Temperature";
pub const PRODUCTION_RATE: &str = "ProductionRate";
pub const DEVICE_ERROR: &str = "DeviceError";

pub const EMERGENCY_STOP: &str = "EmergencyStop";
pub const RESET_ERROR_STATUS: &str = "ResetErrorStatus";

/// 孪生 reported 属性中的时间戳键。
pub const LAST_ERROR_DATE: &str = "LastErrorDate";
pub const LAST_MAINTENANCE_DATE: &str = "LastMaintenanceDate";

/// 设备暴露的全部数据节点。
pub const ALL_NODES: [&str; 7] = [
    PRODUCTION_STATUS,
    WORKORDER_ID,
    GOOD_COUNT,
    BAD_COUNT,
    TEMPERATURE,
    PRODUCTION_RATE,
    DEVICE_ERROR,
];

/// 遥测节点组。
pub const TELEMETRY_NODES: [&str; 5] =
    [PRODUCTION_STATUS, WORKORDER_ID, GOOD_COUNT, BAD_COUNT, TEMPERATURE];

/// 错误事件节点组。
pub const ERROR_NODES: [&str; 2] = [DEVICE_ERROR, WORKORDER_ID];

/// 孪生配置节点组。
pub const TWIN_NODES: [&str; 2] = [PRODUCTION_RATE, DEVICE_ERROR];

/// DeviceError 位标志。
pub const ERROR_FLAGS: [(i64, &str); 4] = [
    (1, "Emergency stop"),
    (2, "Power failure"),
    (4, "Sensor failure"),
    (8, "Unknown"),
];

/// 把 DeviceError 解码为可读标志名（日志用）。
pub fn describe_device_error(value: i64) -> Vec<&'static str> {
    ERROR_FLAGS
        .iter()
        .filter(|(bit, _)| value & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}
