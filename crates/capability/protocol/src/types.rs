//! 协议相关类型定义

use crate::error::ProtocolError;
use async_trait::async_trait;
use domain::{NodeValue, ReadingSet};

/// 现场设备抽象。
///
/// 一个实例绑定设备在地址空间中的父节点；节点名是父节点下的子节点浏览名。
#[async_trait]
pub trait FieldDevice: Send + Sync {
    /// 读取单个子节点的当前值。
    async fn read_child(&self, name: &str) -> Result<NodeValue, ProtocolError>;

    /// 依次读取一组子节点；任一失败则整体失败，不返回部分结果。
    async fn read_children(&self, names: &[&str]) -> Result<ReadingSet, ProtocolError> {
        let mut readings = ReadingSet::new();
        for name in names {
            let value = self.read_child(name).await?;
            readings.insert(*name, value);
        }
        Ok(readings)
    }

    /// 写入子节点值。
    async fn write_child(&self, name: &str, value: NodeValue) -> Result<(), ProtocolError>;

    /// 在父节点上调用无参方法。
    async fn call_method(&self, name: &str) -> Result<(), ProtocolError>;
}

