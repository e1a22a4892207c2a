//! 设备侧云端通道抽象。

use crate::error::HubError;
use crate::message::Message;
use async_trait::async_trait;
use domain::{MethodInvocation, MethodResult, PropertyPatch, TwinState};

/// 设备到云端的通道（遥测、孪生、方法响应）。
#[async_trait]
pub trait DeviceHub: Send + Sync {
    /// 发送一条上行消息。
    async fn send_message(&self, message: Message) -> Result<(), HubError>;

    /// 拉取完整孪生。
    async fn get_twin(&self) -> Result<TwinState, HubError>;

    /// 更新 reported 属性（仅补丁中的键）。
    async fn patch_reported(&self, patch: PropertyPatch) -> Result<(), HubError>;

    /// 回复一次方法调用。
    async fn send_method_response(
        &self,
        request_id: &str,
        result: &MethodResult,
    ) -> Result<(), HubError>;
}

/// 云端下行事件。
#[derive(Debug, Clone)]
pub enum HubEvent {
    MethodRequest(MethodInvocation),
    DesiredPatch(PropertyPatch),
}
