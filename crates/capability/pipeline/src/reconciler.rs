use crate::error::PipelineError;
use bridge_hub::DeviceHub;
use bridge_telemetry::record_reported_patch;
use domain::{PropertyPatch, ReadingSet, TwinState};
use std::sync::Arc;
use tracing::{debug, info};

/// 计算与 reported 不一致的字段；reported 中缺失的键视为不一致。
pub fn diff_reported(reported: &PropertyPatch, readings: &ReadingSet) -> PropertyPatch {
    readings
        .iter()
        .filter(|(name, value)| {
            reported
                .get(*name)
                .map(|current| !value.matches_json(current))
                .unwrap_or(true)
        })
        .map(|(name, value)| (name.to_string(), value.to_json()))
        .collect()
}

/// 只把差异部分写入 reported；无差异时不发起网络调用。
#[derive(Clone)]
pub struct TwinReconciler {
    hub: Arc<dyn DeviceHub>,
}

impl TwinReconciler {
    pub fn new(hub: Arc<dyn DeviceHub>) -> Self {
        Self { hub }
    }

    pub async fn reconcile(
        &self,
        twin: &TwinState,
        readings: &ReadingSet,
    ) -> Result<Option<PropertyPatch>, PipelineError> {
        let delta = diff_reported(&twin.reported, readings);
        if delta.is_empty() {
            debug!(target: "bridge.pipeline", "twin_in_sync");
            return Ok(None);
        }
        self.hub
            .patch_reported(delta.clone())
            .await
            .map_err(PipelineError::Twin)?;
        record_reported_patch();
        info!(
            target: "bridge.pipeline",
            fields = ?delta.keys().collect::<Vec<_>>(),
            "twin_reported_patched"
        );
        Ok(Some(delta))
    }
}
