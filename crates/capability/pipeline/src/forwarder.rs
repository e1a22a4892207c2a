use crate::error::PipelineError;
use bridge_hub::{DeviceHub, Message};
use bridge_telemetry::{record_delivery_failure, record_telemetry_sent};
use domain::ReadingSet;
use std::sync::Arc;
use tracing::{info, warn};

/// 将读数集合序列化为 JSON 消息并上送（不重试）。
#[derive(Clone)]
pub struct TelemetryForwarder {
    hub: Arc<dyn DeviceHub>,
}

impl TelemetryForwarder {
    pub fn new(hub: Arc<dyn DeviceHub>) -> Self {
        Self { hub }
    }

    /// 普通遥测；返回消息 ID。
    pub async fn forward(&self, readings: &ReadingSet) -> Result<String, PipelineError> {
        let message = Message::json(readings).map_err(PipelineError::Delivery)?;
        let message_id = self.send(message).await?;
        record_telemetry_sent();
        info!(
            target: "bridge.pipeline",
            message_id = %message_id,
            fields = readings.len(),
            "telemetry_sent"
        );
        Ok(message_id)
    }

    /// 带 `event=true` 标记的事件消息；返回消息 ID。
    pub async fn forward_event(&self, readings: &ReadingSet) -> Result<String, PipelineError> {
        let message = Message::json(readings)
            .map_err(PipelineError::Delivery)?
            .with_property("event", "true");
        self.send(message).await
    }

    async fn send(&self, message: Message) -> Result<String, PipelineError> {
        let message_id = message.message_id.clone();
        if let Err(err) = self.hub.send_message(message).await {
            record_delivery_failure();
            warn!(
                target: "bridge.pipeline",
                message_id = %message_id,
                error = %err,
                "message_delivery_failed"
            );
            return Err(PipelineError::Delivery(err));
        }
        Ok(message_id)
    }
}
