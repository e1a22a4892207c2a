//! 内存实现（用于测试与本地联调）。

use crate::client::DeviceHub;
use crate::error::HubError;
use crate::message::Message;
use crate::registry::TwinRegistry;
use async_trait::async_trait;
use domain::{MethodResult, PropertyPatch, TwinState};
use std::collections::HashMap;
use std::sync::RwLock;

fn lock_failed() -> HubError {
    HubError::Request("lock failed".to_string())
}

#[derive(Default)]
struct HubState {
    twin: TwinState,
    messages: Vec<Message>,
    reported_patches: Vec<PropertyPatch>,
    method_responses: Vec<(String, MethodResult)>,
    fail_sends: bool,
    fail_twin: bool,
}

/// 记录所有上行交互的设备通道；reported 补丁合并进本地孪生。
#[derive(Default)]
pub struct InMemoryHub {
    state: RwLock<HubState>,
}

impl InMemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_twin(twin: TwinState) -> Self {
        let hub = Self::new();
        hub.set_twin(twin);
        hub
    }

    pub fn set_twin(&self, twin: TwinState) {
        if let Ok(mut state) = self.state.write() {
            state.twin = twin;
        }
    }

    pub fn twin(&self) -> TwinState {
        self.state
            .read()
            .map(|state| state.twin.clone())
            .unwrap_or_default()
    }

    /// 让后续 `send_message` 失败。
    pub fn fail_sends(&self, fail: bool) {
        if let Ok(mut state) = self.state.write() {
            state.fail_sends = fail;
        }
    }

    /// 让后续孪生读写失败。
    pub fn fail_twin(&self, fail: bool) {
        if let Ok(mut state) = self.state.write() {
            state.fail_twin = fail;
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state
            .read()
            .map(|state| state.messages.clone())
            .unwrap_or_default()
    }

    pub fn event_messages(&self) -> Vec<Message> {
        self.messages().into_iter().filter(Message::is_event).collect()
    }

    pub fn reported_patches(&self) -> Vec<PropertyPatch> {
        self.state
            .read()
            .map(|state| state.reported_patches.clone())
            .unwrap_or_default()
    }

    pub fn method_responses(&self) -> Vec<(String, MethodResult)> {
        self.state
            .read()
            .map(|state| state.method_responses.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DeviceHub for InMemoryHub {
    async fn send_message(&self, message: Message) -> Result<(), HubError> {
        let mut state = self.state.write().map_err(|_| lock_failed())?;
        if state.fail_sends {
            return Err(HubError::Delivery("send disabled".to_string()));
        }
        state.messages.push(message);
        Ok(())
    }

    async fn get_twin(&self) -> Result<TwinState, HubError> {
        let state = self.state.read().map_err(|_| lock_failed())?;
        if state.fail_twin {
            return Err(HubError::Timeout("twin GET".to_string()));
        }
        Ok(state.twin.clone())
    }

    async fn patch_reported(&self, patch: PropertyPatch) -> Result<(), HubError> {
        let mut state = self.state.write().map_err(|_| lock_failed())?;
        if state.fail_twin {
            return Err(HubError::Timeout("twin PATCH".to_string()));
        }
        for (key, value) in &patch {
            state.twin.reported.insert(key.clone(), value.clone());
        }
        state.reported_patches.push(patch);
        Ok(())
    }

    async fn send_method_response(
        &self,
        request_id: &str,
        result: &MethodResult,
    ) -> Result<(), HubError> {
        let mut state = self.state.write().map_err(|_| lock_failed())?;
        state
            .method_responses
            .push((request_id.to_string(), result.clone()));
        Ok(())
    }
}

#[derive(Default)]
struct RegistryState {
    twins: HashMap<String, TwinState>,
    desired_updates: Vec<(String, PropertyPatch)>,
}

/// 多设备孪生注册表。
#[derive(Default)]
pub struct InMemoryRegistry {
    state: RwLock<RegistryState>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_twin(&self, device_id: &str, twin: TwinState) {
        if let Ok(mut state) = self.state.write() {
            state.twins.insert(device_id.to_string(), twin);
        }
    }

    pub fn twin(&self, device_id: &str) -> Option<TwinState> {
        self.state
            .read()
            .ok()
            .and_then(|state| state.twins.get(device_id).cloned())
    }

    pub fn desired_updates(&self) -> Vec<(String, PropertyPatch)> {
        self.state
            .read()
            .map(|state| state.desired_updates.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TwinRegistry for InMemoryRegistry {
    async fn get_twin(&self, device_id: &str) -> Result<TwinState, HubError> {
        let state = self.state.read().map_err(|_| lock_failed())?;
        state
            .twins
            .get(device_id)
            .cloned()
            .ok_or_else(|| HubError::Status {
                status: 404,
                body: format!("device {} not found", device_id),
            })
    }

    async fn update_desired(&self, device_id: &str, patch: PropertyPatch) -> Result<(), HubError> {
        let mut state = self.state.write().map_err(|_| lock_failed())?;
        let twin = state
            .twins
            .get_mut(device_id)
            .ok_or_else(|| HubError::Status {
                status: 404,
                body: format!("device {} not found", device_id),
            })?;
        for (key, value) in &patch {
            twin.desired.insert(key.clone(), value.clone());
        }
        state.desired_updates.push((device_id.to_string(), patch));
        Ok(())
    }
}
