use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// 节点值（现场设备上报的标量）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeValue {
    I64(i64),
    F64(f64),
    Bool(bool),
    String(String),
}

impl NodeValue {
    /// 整数视图（浮点仅在无小数部分时接受）。
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            NodeValue::I64(value) => Some(*value),
            NodeValue::F64(value) if value.fract() == 0.0 => Some(*value as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            NodeValue::I64(value) => Some(*value as f64),
            NodeValue::F64(value) => Some(*value),
            _ => None,
        }
    }

    /// 转换为 JSON 值（用于孪生属性比较与补丁）。
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            NodeValue::I64(value) => serde_json::Value::from(*value),
            NodeValue::F64(value) => serde_json::Value::from(*value),
            NodeValue::Bool(value) => serde_json::Value::Bool(*value),
            NodeValue::String(value) => serde_json::Value::String(value.clone()),
        }
    }

    /// 与 JSON 值按数值语义比较（`3` 与 `3.0` 视为相等）。
    pub fn matches_json(&self, other: &serde_json::Value) -> bool {
        match (self, other) {
            (NodeValue::Bool(left), serde_json::Value::Bool(right)) => left == right,
            (NodeValue::String(left), serde_json::Value::String(right)) => left == right,
            (value, serde_json::Value::Number(number)) => match (value.as_f64(), number.as_f64()) {
                (Some(left), Some(right)) => left == right,
                _ => false,
            },
            _ => false,
        }
    }
}

impl fmt::Display for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeValue::I64(value) => write!(f, "{}", value),
            NodeValue::F64(value) => write!(f, "{}", value),
            NodeValue::Bool(value) => write!(f, "{}", value),
            NodeValue::String(value) => f.write_str(value),
        }
    }
}

impl From<i64> for NodeValue {
    fn from(value: i64) -> Self {
        NodeValue::I64(value)
    }
}

impl From<i32> for NodeValue {
    fn from(value: i32) -> Self {
        NodeValue::I64(value as i64)
    }
}

impl From<f64> for NodeValue {
    fn from(value: f64) -> Self {
        NodeValue::F64(value)
    }
}

impl From<bool> for NodeValue {
    fn from(value: bool) -> Self {
        NodeValue::Bool(value)
    }
}

impl From<&str> for NodeValue {
    fn from(value: &str) -> Self {
        NodeValue::String(value.to_string())
    }
}

impl From<String> for NodeValue {
    fn from(value: String) -> Self {
        NodeValue::String(value)
    }
}

/// 一次轮询读取到的节点值集合。
///
/// 保持读取顺序；同名节点后写覆盖先写。序列化为扁平 JSON 对象。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingSet {
    entries: Vec<(String, NodeValue)>,
}

impl ReadingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: NodeValue) {
        let name = name.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&NodeValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(NodeValue::as_i64)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NodeValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 返回请求列表中缺失的节点名。
    pub fn missing<'a>(&self, requested: &[&'a str]) -> Vec<&'a str> {
        requested
            .iter()
            .copied()
            .filter(|name| !self.contains(name))
            .collect()
    }

    /// 序列化为 JSON 字节（遥测消息体）。
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl Serialize for ReadingSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<K: Into<String>> FromIterator<(K, NodeValue)> for ReadingSet {
    fn from_iter<I: IntoIterator<Item = (K, NodeValue)>>(iter: I) -> Self {
        let mut readings = ReadingSet::new();
        for (name, value) in iter {
            readings.insert(name, value);
        }
        readings
    }
}
