use crate::error::PipelineError;
use crate::forwarder::TelemetryForwarder;
use bridge_hub::DeviceHub;
use bridge_telemetry::{record_error_event, record_reported_patch};
use domain::nodes::{DEVICE_ERROR, LAST_ERROR_DATE, describe_device_error};
use domain::{ReadingSet, single_patch, twin_timestamp_now};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// 进程内见过的最大 DeviceError，启动时为 0，只增不减。
#[derive(Debug, Default)]
pub struct ErrorWatermark {
    value: Mutex<i64>,
}

impl ErrorWatermark {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self) -> i64 {
        *self.value.lock().await
    }
}

/// DeviceError 上升沿检测：发送事件消息、更新 LastErrorDate，最后推进水位。
#[derive(Clone)]
pub struct ErrorEventNotifier {
    forwarder: TelemetryForwarder,
    hub: Arc<dyn DeviceHub>,
    watermark: Arc<ErrorWatermark>,
}

impl ErrorEventNotifier {
    pub fn new(hub: Arc<dyn DeviceHub>, watermark: Arc<ErrorWatermark>) -> Self {
        Self {
            forwarder: TelemetryForwarder::new(hub.clone()),
            hub,
            watermark,
        }
    }

    pub fn watermark(&self) -> &Arc<ErrorWatermark> {
        &self.watermark
    }

    /// 返回是否发出了事件。发送或孪生更新失败时水位保持不变，下一轮重新触发。
    pub async fn notify(&self, readings: &ReadingSet) -> Result<bool, PipelineError> {
        let device_error =
            readings
                .get_i64(DEVICE_ERROR)
                .ok_or_else(|| PipelineError::Incomplete {
                    missing: vec![DEVICE_ERROR.to_string()],
                })?;

        // 持锁贯穿整个检测-发送-推进过程
        let mut watermark = self.watermark.value.lock().await;
        if device_error <= *watermark {
            debug!(
                target: "bridge.pipeline",
                device_error,
                watermark = *watermark,
                "error_event_skipped"
            );
            return Ok(false);
        }

        let message_id = self.forwarder.forward_event(readings).await?;
        self.hub
            .patch_reported(single_patch(LAST_ERROR_DATE, twin_timestamp_now()))
            .await
            .map_err(PipelineError::Twin)?;
        record_reported_patch();

        let previous = *watermark;
        *watermark = device_error;
        record_error_event();
        info!(
            target: "bridge.pipeline",
            message_id = %message_id,
            device_error,
            previous_watermark = previous,
            flags = ?describe_device_error(device_error),
            "error_event_sent"
        );
        Ok(true)
    }
}
