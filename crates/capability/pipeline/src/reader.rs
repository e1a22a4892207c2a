use crate::error::PipelineError;
use bridge_protocol::FieldDevice;
use bridge_telemetry::record_node_read_failure;
use domain::ReadingSet;
use std::sync::Arc;
use tracing::warn;

/// 按节点组读取设备父节点下的子节点。
///
/// 每次调用要么返回恰好包含所请求节点的集合，要么失败；不返回部分结果。
#[derive(Clone)]
pub struct NodeReader {
    device: Arc<dyn FieldDevice>,
}

impl NodeReader {
    pub fn new(device: Arc<dyn FieldDevice>) -> Self {
        Self { device }
    }

    pub async fn read(&self, names: &[&str]) -> Result<ReadingSet, PipelineError> {
        let readings = match self.device.read_children(names).await {
            Ok(readings) => readings,
            Err(err) => {
                record_node_read_failure();
                warn!(target: "bridge.pipeline", nodes = ?names, error = %err, "node_read_failed");
                return Err(err.into());
            }
        };
        let missing = readings.missing(names);
        if !missing.is_empty() {
            record_node_read_failure();
            return Err(PipelineError::Incomplete {
                missing: missing.into_iter().map(str::to_string).collect(),
            });
        }
        Ok(readings)
    }
}
