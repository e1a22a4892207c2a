//! 协议错误类型定义

/// 现场设备通信错误
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 连接错误（启动阶段致命）
    #[error("connection error: {0}")]
    Connection(String),

    /// 子节点不存在
    #[error("node lookup failed: {node}")]
    NodeLookup { node: String },

    /// 传输层未在超时内响应
    #[error("read timeout: {node}")]
    ReadTimeout { node: String },

    /// 读取失败（状态码非 Good 或值类型不支持）
    #[error("read error: {0}")]
    Read(String),

    /// 写入失败
    #[error("write error: {0}")]
    Write(String),

    /// 方法调用失败
    #[error("method error: {0}")]
    Method(String),

    /// 节点 ID 解析失败
    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    /// 会话工作线程已退出
    #[error("channel closed")]
    ChannelClosed,
}

impl ProtocolError {
    /// 是否为单次读取可跳过的错误（查找失败或超时）。
    pub fn is_read_skippable(&self) -> bool {
        matches!(
            self,
            ProtocolError::NodeLookup { .. } | ProtocolError::ReadTimeout { .. } | ProtocolError::Read(_)
        )
    }
}
