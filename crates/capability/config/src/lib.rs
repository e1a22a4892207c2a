//! 桥接进程与质量闸门函数的运行配置加载。

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
    #[error("You did not specify a device")]
    DeviceNotSpecified,
    #[error("Connection string for this device not found")]
    CredentialNotFound(String),
}

pub const DEFAULT_OPCUA_URL: &str = "opc.tcp://localhost:4840/";
pub const DEFAULT_FUNCTION_NAME: &str = "KpiServiceBusQueueTrigger";

/// 桥接进程运行配置。
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub device_id: String,
    /// IoT Hub 设备连接串（`HostName=...;DeviceId=...;SharedAccessKey=...`）。
    pub device_connection_string: String,
    pub opcua_url: String,
    /// 设备父节点 ID 的命名空间。
    pub opcua_namespace: u16,
    /// 子节点浏览名的命名空间。
    pub opcua_browse_namespace: u16,
    pub device_node_prefix: String,
    pub opcua_pki_dir: String,
    pub poll_interval_seconds: u64,
    pub read_timeout_ms: u64,
    pub hub_request_timeout_ms: u64,
    pub sas_ttl_seconds: u64,
}

impl BridgeConfig {
    /// 从环境变量读取配置；设备连接串存放在以设备 ID 命名的变量中。
    pub fn from_env(device_id: Option<&str>) -> Result<Self, ConfigError> {
        let device_id = match device_id.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(ConfigError::DeviceNotSpecified),
        };
        let device_connection_string = read_optional(&device_id)
            .ok_or_else(|| ConfigError::CredentialNotFound(device_id.clone()))?;
        let opcua_url = read_optional("URL_UA").unwrap_or_else(|| DEFAULT_OPCUA_URL.to_string());
        let opcua_namespace = read_u16_with_default("BRIDGE_OPCUA_NAMESPACE", 2)?;
        let opcua_browse_namespace = read_u16_with_default("BRIDGE_OPCUA_BROWSE_NAMESPACE", 0)?;
        let device_node_prefix =
            env::var("BRIDGE_DEVICE_NODE_PREFIX").unwrap_or_else(|_| "Device ".to_string());
        let opcua_pki_dir = read_optional("BRIDGE_OPCUA_PKI_DIR").unwrap_or_else(|| "pki".to_string());
        let poll_interval_seconds = read_u64_with_default("BRIDGE_POLL_INTERVAL_SECONDS", 5)?;
        let read_timeout_ms = read_u64_with_default("BRIDGE_READ_TIMEOUT_MS", 3000)?;
        let hub_request_timeout_ms = read_u64_with_default("BRIDGE_HUB_REQUEST_TIMEOUT_MS", 10_000)?;
        let sas_ttl_seconds = read_u64_with_default("BRIDGE_SAS_TTL_SECONDS", 86_400)?;
        if poll_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "BRIDGE_POLL_INTERVAL_SECONDS".to_string(),
                "0".to_string(),
            ));
        }

        Ok(Self {
            device_id,
            device_connection_string,
            opcua_url,
            opcua_namespace,
            opcua_browse_namespace,
            device_node_prefix,
            opcua_pki_dir,
            poll_interval_seconds,
            read_timeout_ms,
            hub_request_timeout_ms,
            sas_ttl_seconds,
        })
    }

    /// 设备父节点的 OPC-UA 节点 ID（如 `ns=2;s=Device 1`）。
    pub fn device_node_id(&self) -> String {
        format!(
            "ns={};s={}{}",
            self.opcua_namespace, self.device_node_prefix, self.device_id
        )
    }
}

/// 质量闸门函数运行配置。
#[derive(Debug, Clone)]
pub struct QualityGateConfig {
    /// IoT Hub 注册表连接串（`HostName=...;SharedAccessKeyName=...;SharedAccessKey=...`）。
    pub registry_connection_string: String,
    pub threshold: f64,
    pub listen_addr: String,
    pub function_name: String,
    pub request_timeout_ms: u64,
    pub sas_ttl_seconds: u64,
}

impl QualityGateConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let registry_connection_string =
            read_optional("CONN_STRING").ok_or_else(|| ConfigError::Missing("CONN_STRING".to_string()))?;
        let threshold = read_f64_with_default("QUALITY_GATE_THRESHOLD", 0.9)?;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(
                "QUALITY_GATE_THRESHOLD".to_string(),
                threshold.to_string(),
            ));
        }
        let port = read_u16_with_default("FUNCTIONS_CUSTOMHANDLER_PORT", 7071)?;
        let function_name = read_optional("QUALITY_GATE_FUNCTION_NAME")
            .unwrap_or_else(|| DEFAULT_FUNCTION_NAME.to_string());
        let request_timeout_ms = read_u64_with_default("QUALITY_GATE_REQUEST_TIMEOUT_MS", 10_000)?;
        let sas_ttl_seconds = read_u64_with_default("QUALITY_GATE_SAS_TTL_SECONDS", 3600)?;

        Ok(Self {
            registry_connection_string,
            threshold,
            listen_addr: format!("127.0.0.1:{}", port),
            function_name,
            request_timeout_ms,
            sas_ttl_seconds,
        })
    }
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_f64_with_default(key: &str, default: f64) -> Result<f64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<f64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}
