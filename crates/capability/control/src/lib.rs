use bridge_hub::{DeviceHub, HubEvent};
use bridge_protocol::FieldDevice;
use bridge_telemetry::{
    record_desired_applied, record_desired_failed, record_method_failed, record_method_handled,
    record_method_not_found, record_reported_patch,
};
use domain::nodes::{EMERGENCY_STOP, LAST_MAINTENANCE_DATE, PRODUCTION_RATE, RESET_ERROR_STATUS};
use domain::{
    MethodInvocation, MethodName, MethodResult, NodeValue, PropertyPatch, single_patch,
    twin_timestamp_now,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// 控制链路错误。
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("method execution error: {0}")]
    MethodExecution(String),
    #[error("patch apply error: {0}")]
    PatchApply(String),
    #[error("method response error: {0}")]
    Response(String),
}

/// 远程方法分发表。
///
/// | 方法 | 动作 |
/// |---|---|
/// | EmergencyStop | 调用设备 `EmergencyStop` |
/// | ResetErrorStatus | 调用设备 `ResetErrorStatus` |
/// | MaintenanceDone | reported 写入 `LastMaintenanceDate` |
/// | 其他 | 404 `{"MethodNotFound": true}` |
#[derive(Clone)]
pub struct MethodDispatcher {
    device: Arc<dyn FieldDevice>,
    hub: Arc<dyn DeviceHub>,
}

impl MethodDispatcher {
    pub fn new(device: Arc<dyn FieldDevice>, hub: Arc<dyn DeviceHub>) -> Self {
        Self { device, hub }
    }

    /// 执行方法并给出结果；执行失败转换为 400，不向上传播。
    pub async fn dispatch(&self, invocation: &MethodInvocation) -> MethodResult {
        let outcome = match invocation.method() {
            MethodName::EmergencyStop => self.call_device(EMERGENCY_STOP).await,
            MethodName::ResetErrorStatus => self.call_device(RESET_ERROR_STATUS).await,
            MethodName::MaintenanceDone => self.maintenance_done().await,
            MethodName::Unknown(name) => {
                record_method_not_found();
                warn!(
                    target: "bridge.control",
                    request_id = %invocation.request_id,
                    method = %name,
                    "method_not_found"
                );
                return MethodResult::not_found();
            }
        };
        match outcome {
            Ok(()) => {
                record_method_handled();
                info!(
                    target: "bridge.control",
                    request_id = %invocation.request_id,
                    method = %invocation.name,
                    "method_executed"
                );
                MethodResult::succeeded()
            }
            Err(err) => {
                record_method_failed();
                warn!(
                    target: "bridge.control",
                    request_id = %invocation.request_id,
                    method = %invocation.name,
                    error = %err,
                    "method_failed"
                );
                MethodResult::failed()
            }
        }
    }

    /// 分发并回复，每次调用恰好发送一次响应。
    pub async fn handle(&self, invocation: &MethodInvocation) -> Result<MethodResult, ControlError> {
        let result = self.dispatch(invocation).await;
        self.hub
            .send_method_response(&invocation.request_id, &result)
            .await
            .map_err(|err| ControlError::Response(err.to_string()))?;
        Ok(result)
    }

    async fn call_device(&self, method: &str) -> Result<(), ControlError> {
        self.device
            .call_method(method)
            .await
            .map_err(|err| ControlError::MethodExecution(err.to_string()))
    }

    async fn maintenance_done(&self) -> Result<(), ControlError> {
        self.hub
            .patch_reported(single_patch(LAST_MAINTENANCE_DATE, twin_timestamp_now()))
            .await
            .map_err(|err| ControlError::MethodExecution(err.to_string()))?;
        record_reported_patch();
        Ok(())
    }
}

/// desired 属性补丁处理：把 `ProductionRate` 写入设备节点。
#[derive(Clone)]
pub struct DesiredPatchHandler {
    device: Arc<dyn FieldDevice>,
}

impl DesiredPatchHandler {
    pub fn new(device: Arc<dyn FieldDevice>) -> Self {
        Self { device }
    }

    /// 写入并返回写入的速率；字段缺失或非整数返回 `PatchApply`。不做范围校验。
    pub async fn apply(&self, patch: &PropertyPatch) -> Result<i64, ControlError> {
        let rate = production_rate_from_patch(patch)?;
        self.device
            .write_child(PRODUCTION_RATE, NodeValue::I64(rate))
            .await
            .map_err(|err| ControlError::PatchApply(err.to_string()))?;
        Ok(rate)
    }

    /// 应用补丁并记录结果，不重试。
    pub async fn handle(&self, patch: &PropertyPatch) {
        match self.apply(patch).await {
            Ok(rate) => {
                record_desired_applied();
                info!(target: "bridge.control", production_rate = rate, "desired_applied");
            }
            Err(err) => {
                record_desired_failed();
                warn!(target: "bridge.control", error = %err, "desired_patch_failed");
            }
        }
    }
}

fn production_rate_from_patch(patch: &PropertyPatch) -> Result<i64, ControlError> {
    let value = patch
        .get(PRODUCTION_RATE)
        .ok_or_else(|| ControlError::PatchApply(format!("{} missing", PRODUCTION_RATE)))?;
    value.as_i64().ok_or_else(|| {
        ControlError::PatchApply(format!("{} is not an integer: {}", PRODUCTION_RATE, value))
    })
}

/// 启动下行事件监听任务：方法请求交给分发器，desired 补丁交给写回处理。
///
/// 与轮询循环独立运行，事件通道关闭时退出。
pub fn spawn_event_listener(
    mut events: mpsc::Receiver<HubEvent>,
    dispatcher: Arc<MethodDispatcher>,
    patch_handler: Arc<DesiredPatchHandler>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                HubEvent::MethodRequest(invocation) => {
                    if let Err(err) = dispatcher.handle(&invocation).await {
                        warn!(
                            target: "bridge.control",
                            request_id = %invocation.request_id,
                            error = %err,
                            "method_response_failed"
                        );
                    }
                }
                HubEvent::DesiredPatch(patch) => patch_handler.handle(&patch).await,
            }
        }
        info!(target: "bridge.control", "event_listener_stopped");
    })
}
