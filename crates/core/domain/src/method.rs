//! 远程方法调用与响应。

use serde_json::json;

/// 已知的远程方法。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodName {
    EmergencyStop,
    ResetErrorStatus,
    MaintenanceDone,
    Unknown(String),
}

impl MethodName {
    pub fn parse(name: &str) -> Self {
        match name {
            "EmergencyStop" => MethodName::EmergencyStop,
            "ResetErrorStatus" => MethodName::ResetErrorStatus,
            "MaintenanceDone" => MethodName::MaintenanceDone,
            other => MethodName::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MethodName::EmergencyStop => "EmergencyStop",
            MethodName::ResetErrorStatus => "ResetErrorStatus",
            MethodName::MaintenanceDone => "MaintenanceDone",
            MethodName::Unknown(name) => name,
        }
    }
}

/// 云端下发的一次方法调用。
#[derive(Debug, Clone)]
pub struct MethodInvocation {
    /// 云端请求 ID（响应时原样带回）。
    pub request_id: String,
    pub name: String,
    pub payload: Option<serde_json::Value>,
}

impl MethodInvocation {
    pub fn new(request_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            name: name.into(),
            payload: None,
        }
    }

    pub fn method(&self) -> MethodName {
        MethodName::parse(&self.name)
    }
}

/// 方法执行结果：状态码 + JSON 负载。
#[derive(Debug, Clone, PartialEq)]
pub struct MethodResult {
    pub status: u16,
    pub payload: serde_json::Value,
}

impl MethodResult {
    pub const OK: u16 = 200;
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_FOUND: u16 = 404;

    /// 200 `{"succeed": true}`
    pub fn succeeded() -> Self {
        Self {
            status: Self::OK,
            payload: json!({ "succeed": true }),
        }
    }

    /// 400 `{"succeed": false}`
    pub fn failed() -> Self {
        Self {
            status: Self::BAD_REQUEST,
            payload: json!({ "succeed": false }),
        }
    }

    /// 404 `{"MethodNotFound": true}`
    pub fn not_found() -> Self {
        Self {
            status: Self::NOT_FOUND,
            payload: json!({ "MethodNotFound": true }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Self::OK
    }
}
