use bridge_hub::HubError;
use bridge_protocol::ProtocolError;

/// 轮询链路单个阶段的错误（记录后跳过，不终止循环）。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("read error: {0}")]
    Read(#[from] ProtocolError),
    #[error("delivery error: {0}")]
    Delivery(HubError),
    #[error("twin error: {0}")]
    Twin(HubError),
    #[error("incomplete reading set, missing: {missing:?}")]
    Incomplete { missing: Vec<String> },
}
