//! IoT Hub 设备侧 MQTT 主题的构造与解析。

pub const TWIN_RESPONSE_FILTER: &str = "$iothub/twin/res/#";
pub const DESIRED_PATCH_FILTER: &str = "$iothub/twin/PATCH/properties/desired/#";
pub const METHOD_REQUEST_FILTER: &str = "$iothub/methods/POST/#";

pub fn telemetry_topic(device_id: &str, property_bag: &str) -> String {
    format!("devices/{}/messages/events/{}", device_id, property_bag)
}

pub fn twin_get_topic(request_id: u64) -> String {
    format!("$iothub/twin/GET/?$rid={}", request_id)
}

pub fn reported_patch_topic(request_id: u64) -> String {
    format!("$iothub/twin/PATCH/properties/reported/?$rid={}", request_id)
}

pub fn method_response_topic(status: u16, request_id: &str) -> String {
    format!("$iothub/methods/res/{}/?$rid={}", status, request_id)
}

/// 设备 MQTT 用户名。
pub fn device_username(host_name: &str, device_id: &str, api_version: &str) -> String {
    format!("{}/{}/?api-version={}", host_name, device_id, api_version)
}

/// 孪生请求响应：`$iothub/twin/res/{status}/?$rid={rid}`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwinResponseTopic {
    pub status: u16,
    pub request_id: u64,
}

/// 直接方法请求：`$iothub/methods/POST/{name}/?$rid={rid}`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRequestTopic {
    pub method_name: String,
    pub request_id: String,
}

/// 主题分类结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundTopic {
    TwinResponse(TwinResponseTopic),
    DesiredPatch { version: Option<u64> },
    MethodRequest(MethodRequestTopic),
}

pub fn parse_inbound(topic: &str) -> Option<InboundTopic> {
    if let Some(rest) = topic.strip_prefix("$iothub/twin/res/") {
        let (status, query) = rest.split_once("/?")?;
        let status = status.parse().ok()?;
        let request_id = query_param(query, "$rid")?.parse().ok()?;
        return Some(InboundTopic::TwinResponse(TwinResponseTopic { status, request_id }));
    }
    if let Some(rest) = topic.strip_prefix("$iothub/twin/PATCH/properties/desired/") {
        let query = rest.strip_prefix('?').unwrap_or(rest);
        let version = query_param(query, "$version").and_then(|v| v.parse().ok());
        return Some(InboundTopic::DesiredPatch { version });
    }
    if let Some(rest) = topic.strip_prefix("$iothub/methods/POST/") {
        let (method_name, query) = rest.split_once("/?")?;
        if method_name.is_empty() {
            return None;
        }
        let request_id = query_param(query, "$rid")?;
        return Some(InboundTopic::MethodRequest(MethodRequestTopic {
            method_name: method_name.to_string(),
            request_id: request_id.to_string(),
        }));
    }
    None
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty())
}
