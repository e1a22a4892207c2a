//! 质量闸门
//!
//! 由队列消息触发，每条消息独立处理、无状态：良品率低于阈值时，
//! 读取该设备 reported 的 `ProductionRate` 并以同值写入 desired。
//! 重复投递只会写入相同补丁。

use bridge_hub::{HubError, TwinRegistry};
use bridge_telemetry::record_quality_correction;
use domain::nodes::PRODUCTION_RATE;
use domain::single_patch;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_THRESHOLD: f64 = 0.9;

/// 质量闸门错误。
#[derive(Debug, thiserror::Error)]
pub enum QualityError {
    #[error("payload error: {0}")]
    Payload(String),
    #[error("reported ProductionRate missing for device {device_id}")]
    MissingReported { device_id: String },
    #[error("registry error: {0}")]
    Registry(#[from] HubError),
}

/// 队列消息（流分析作业输出）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMessage {
    #[serde(rename = "Good Count percentage")]
    pub good_count_percentage: f64,
    #[serde(rename = "ConnectionDeviceId", default)]
    pub connection_device_id: Option<String>,
}

impl QualityMessage {
    pub fn from_slice(payload: &[u8]) -> Result<Self, QualityError> {
        serde_json::from_slice(payload).map_err(|err| QualityError::Payload(err.to_string()))
    }

    /// 接受 JSON 对象或 JSON 编码的字符串。
    pub fn from_value(value: serde_json::Value) -> Result<Self, QualityError> {
        match value {
            serde_json::Value::String(text) => Self::from_slice(text.as_bytes()),
            other => {
                serde_json::from_value(other).map_err(|err| QualityError::Payload(err.to_string()))
            }
        }
    }
}

/// 单条消息的处理结果。
#[derive(Debug, Clone, PartialEq)]
pub enum QualityOutcome {
    /// 不低于阈值，无动作。
    AboveThreshold,
    /// 已写入 desired。
    Corrected {
        device_id: String,
        production_rate: i64,
    },
}

#[derive(Clone)]
pub struct QualityGate {
    registry: Arc<dyn TwinRegistry>,
    threshold: f64,
}

impl QualityGate {
    pub fn new(registry: Arc<dyn TwinRegistry>, threshold: f64) -> Self {
        Self {
            registry,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub async fn handle_bytes(&self, payload: &[u8]) -> Result<QualityOutcome, QualityError> {
        let message = QualityMessage::from_slice(payload)?;
        self.handle(&message).await
    }

    pub async fn handle(&self, message: &QualityMessage) -> Result<QualityOutcome, QualityError> {
        if message.good_count_percentage >= self.threshold {
            debug!(
                target: "bridge.quality",
                good_count_percentage = message.good_count_percentage,
                "quality_above_threshold"
            );
            return Ok(QualityOutcome::AboveThreshold);
        }
        let device_id = message
            .connection_device_id
            .clone()
            .ok_or_else(|| QualityError::Payload("ConnectionDeviceId missing".to_string()))?;

        let twin = self.registry.get_twin(&device_id).await?;
        // 写回 reported 的同值；修正策略待定
        let production_rate =
            twin.reported_i64(PRODUCTION_RATE)
                .ok_or_else(|| QualityError::MissingReported {
                    device_id: device_id.clone(),
                })?;
        self.registry
            .update_desired(&device_id, single_patch(PRODUCTION_RATE, production_rate))
            .await?;

        record_quality_correction();
        info!(
            target: "bridge.quality",
            device_id = %device_id,
            good_count_percentage = message.good_count_percentage,
            threshold = self.threshold,
            production_rate,
            "quality_correction_applied"
        );
        Ok(QualityOutcome::Corrected {
            device_id,
            production_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_parses_object_or_string() {
        let from_object = QualityMessage::from_value(json!({
            "Good Count percentage": 0.8,
            "ConnectionDeviceId": "dev1",
            "WindowEndTime": "2024-01-01T00:05:00Z"
        }))
        .expect("object");
        let from_string = QualityMessage::from_value(json!(
            r#"{"Good Count percentage":0.8,"ConnectionDeviceId":"dev1"}"#
        ))
        .expect("string");
        assert_eq!(from_object, from_string);
        assert_eq!(from_object.connection_device_id.as_deref(), Some("dev1"));
    }

    #[test]
    fn message_requires_percentage() {
        assert!(QualityMessage::from_value(json!({"ConnectionDeviceId": "dev1"})).is_err());
        assert!(QualityMessage::from_slice(b"not json").is_err());
    }
}
