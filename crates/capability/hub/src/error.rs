//! 云端通道错误类型定义

/// IoT Hub 交互错误
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// 连接失败或被拒绝（启动阶段致命）
    #[error("connection error: {0}")]
    Connection(String),

    /// 上行消息投递失败
    #[error("delivery error: {0}")]
    Delivery(String),

    /// 请求发送失败
    #[error("request error: {0}")]
    Request(String),

    /// 请求未在超时内得到响应
    #[error("timeout: {0}")]
    Timeout(String),

    /// 服务端返回非成功状态
    #[error("hub returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// 负载编解码失败
    #[error("payload error: {0}")]
    Payload(String),

    /// 连接串或签名无效
    #[error("credential error: {0}")]
    Credential(String),

    /// 事件循环已退出
    #[error("channel closed")]
    ChannelClosed,
}
