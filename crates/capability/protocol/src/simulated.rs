//! 模拟现场设备（用于测试与本地联调）。

use crate::error::ProtocolError;
use crate::types::FieldDevice;
use async_trait::async_trait;
use domain::NodeValue;
use domain::nodes::{
    BAD_COUNT, DEVICE_ERROR, EMERGENCY_STOP, GOOD_COUNT, PRODUCTION_RATE, PRODUCTION_STATUS,
    RESET_ERROR_STATUS, TEMPERATURE, WORKORDER_ID,
};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

struct State {
    nodes: HashMap<String, NodeValue>,
    failing_methods: HashSet<String>,
    calls: Vec<String>,
    writes: Vec<(String, NodeValue)>,
}

/// 内存中的设备节点表。
///
/// `EmergencyStop` 置 ProductionStatus=0 并设置 DeviceError 的急停位，
/// `ResetErrorStatus` 清零 DeviceError。
pub struct SimulatedDevice {
    state: RwLock<State>,
}

impl SimulatedDevice {
    /// 空节点表。
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                nodes: HashMap::new(),
                failing_methods: HashSet::new(),
                calls: Vec::new(),
                writes: Vec::new(),
            }),
        }
    }

    /// 以生产中状态初始化全部设备节点。
    pub fn with_default_nodes() -> Self {
        let device = Self::new();
        device.set(PRODUCTION_STATUS, NodeValue::I64(1));
        device.set(WORKORDER_ID, NodeValue::from("00000000-0000-0000-0000-000000000001"));
        device.set(GOOD_COUNT, NodeValue::I64(0));
        device.set(BAD_COUNT, NodeValue::I64(0));
        device.set(TEMPERATURE, NodeValue::F64(25.0));
        device.set(PRODUCTION_RATE, NodeValue::I64(100));
        device.set(DEVICE_ERROR, NodeValue::I64(0));
        device
    }

    pub fn set(&self, name: &str, value: NodeValue) {
        if let Ok(mut state) = self.state.write() {
            state.nodes.insert(name.to_string(), value);
        }
    }

    pub fn get(&self, name: &str) -> Option<NodeValue> {
        self.state
            .read()
            .ok()
            .and_then(|state| state.nodes.get(name).cloned())
    }

    pub fn remove(&self, name: &str) {
        if let Ok(mut state) = self.state.write() {
            state.nodes.remove(name);
        }
    }

    /// 让指定方法在调用时失败。
    pub fn fail_method(&self, name: &str) {
        if let Ok(mut state) = self.state.write() {
            state.failing_methods.insert(name.to_string());
        }
    }

    /// 已调用的方法（按调用顺序）。
    pub fn calls(&self) -> Vec<String> {
        self.state
            .read()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    /// 已写入的节点值（按写入顺序）。
    pub fn writes(&self) -> Vec<(String, NodeValue)> {
        self.state
            .read()
            .map(|state| state.writes.clone())
            .unwrap_or_default()
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_failed() -> ProtocolError {
    ProtocolError::Read("lock failed".to_string())
}

#[async_trait]
impl FieldDevice for SimulatedDevice {
    async fn read_child(&self, name: &str) -> Result<NodeValue, ProtocolError> {
        let state = self.state.read().map_err(|_| lock_failed())?;
        state
            .nodes
            .get(name)
            .cloned()
            .ok_or_else(|| ProtocolError::NodeLookup {
                node: name.to_string(),
            })
    }

    async fn write_child(&self, name: &str, value: NodeValue) -> Result<(), ProtocolError> {
        let mut state = self.state.write().map_err(|_| lock_failed())?;
        if !state.nodes.contains_key(name) {
            return Err(ProtocolError::NodeLookup {
                node: name.to_string(),
            });
        }
        state.nodes.insert(name.to_string(), value.clone());
        state.writes.push((name.to_string(), value));
        Ok(())
    }

    async fn call_method(&self, name: &str) -> Result<(), ProtocolError> {
        let mut state = self.state.write().map_err(|_| lock_failed())?;
        if state.failing_methods.contains(name) {
            return Err(ProtocolError::Method(format!("{}: BadInternalError", name)));
        }
        match name {
            EMERGENCY_STOP => {
                let error = state
                    .nodes
                    .get(DEVICE_ERROR)
                    .and_then(NodeValue::as_i64)
                    .unwrap_or(0);
                state
                    .nodes
                    .insert(PRODUCTION_STATUS.to_string(), NodeValue::I64(0));
                state
                    .nodes
                    .insert(DEVICE_ERROR.to_string(), NodeValue::I64(error | 1));
            }
            RESET_ERROR_STATUS => {
                state
                    .nodes
                    .insert(DEVICE_ERROR.to_string(), NodeValue::I64(0));
            }
            _ => {
                return Err(ProtocolError::NodeLookup {
                    node: name.to_string(),
                });
            }
        }
        state.calls.push(name.to_string());
        Ok(())
    }
}
