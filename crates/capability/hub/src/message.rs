//! 上行设备消息。

use crate::error::HubError;
use domain::ReadingSet;

pub const CONTENT_ENCODING_UTF8: &str = "utf-8";
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// 发往云端的一条设备消息（JSON 正文 + 系统/自定义属性）。
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub body: Vec<u8>,
    pub message_id: String,
    pub content_encoding: String,
    pub content_type: String,
    pub custom_properties: Vec<(String, String)>,
}

impl Message {
    /// 以读数集合的 JSON 序列化作为正文，分配新的消息 ID。
    pub fn json(readings: &ReadingSet) -> Result<Self, HubError> {
        let body = readings
            .to_json_bytes()
            .map_err(|err| HubError::Payload(err.to_string()))?;
        Ok(Self {
            body,
            message_id: bridge_telemetry::new_message_id(),
            content_encoding: CONTENT_ENCODING_UTF8.to_string(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            custom_properties: Vec::new(),
        })
    }

    /// 追加自定义属性（同名覆盖）。
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.custom_properties.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => self.custom_properties.push((key, value)),
        }
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.custom_properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// 是否带 `event=true` 标记。
    pub fn is_event(&self) -> bool {
        self.property("event") == Some("true")
    }

    /// MQTT 主题中的属性包：`$.mid=..&$.ce=..&$.ct=..&k=v`，键值均做 URL 编码。
    pub fn property_bag(&self) -> String {
        let mut pairs = vec![
            ("$.mid".to_string(), self.message_id.clone()),
            ("$.ce".to_string(), self.content_encoding.clone()),
            ("$.ct".to_string(), self.content_type.clone()),
        ];
        pairs.extend(self.custom_properties.iter().cloned());
        pairs
            .iter()
            .map(|(key, value)| {
                format!("{}={}", encode_bag_key(key), urlencoding::encode(value))
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn encode_bag_key(key: &str) -> String {
    // 系统属性前缀 `$.` 原样保留
    match key.strip_prefix("$.") {
        Some(rest) => format!("$.{}", urlencoding::encode(rest)),
        None => urlencoding::encode(key).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::NodeValue;

    fn sample() -> Message {
        let readings: ReadingSet = [("DeviceError", NodeValue::I64(3))].into_iter().collect();
        Message::json(&readings).expect("message")
    }

    #[test]
    fn json_message_carries_system_properties() {
        let message = sample();
        assert_eq!(message.body, br#"{"DeviceError":3}"#.to_vec());
        assert_eq!(message.content_type, "application/json");
        assert_eq!(message.content_encoding, "utf-8");
        assert!(!message.message_id.is_empty());
        assert!(!message.is_event());
    }

    #[test]
    fn property_bag_encodes_values() {
        let mut message = sample().with_property("event", "true");
        message.message_id = "m1".to_string();
        assert!(message.is_event());
        assert_eq!(
            message.property_bag(),
            "$.mid=m1&$.ce=utf-8&$.ct=application%2Fjson&event=true"
        );
    }

    #[test]
    fn with_property_overwrites() {
        let message = sample().with_property("event", "false").with_property("event", "true");
        assert_eq!(message.custom_properties.len(), 1);
        assert_eq!(message.property("event"), Some("true"));
    }
}
