//! 设备孪生（desired / reported）。

use serde::{Deserialize, Serialize};

/// 孪生属性补丁：扁平的键值对象。
pub type PropertyPatch = serde_json::Map<String, serde_json::Value>;

/// 云端持有的设备孪生快照（桥接侧只保留每次迭代的临时副本）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TwinState {
    #[serde(default)]
    pub desired: PropertyPatch,
    #[serde(default)]
    pub reported: PropertyPatch,
}

impl TwinState {
    pub fn new(desired: PropertyPatch, reported: PropertyPatch) -> Self {
        Self { desired, reported }
    }

    pub fn reported_i64(&self, key: &str) -> Option<i64> {
        self.reported.get(key).and_then(serde_json::Value::as_i64)
    }

    pub fn desired_i64(&self, key: &str) -> Option<i64> {
        self.desired.get(key).and_then(serde_json::Value::as_i64)
    }
}

/// 从单个键值构造补丁。
pub fn single_patch(key: &str, value: impl Into<serde_json::Value>) -> PropertyPatch {
    let mut patch = PropertyPatch::new();
    patch.insert(key.to_string(), value.into());
    patch
}
