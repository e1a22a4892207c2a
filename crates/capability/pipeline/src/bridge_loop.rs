use crate::error::PipelineError;
use crate::forwarder::TelemetryForwarder;
use crate::notifier::{ErrorEventNotifier, ErrorWatermark};
use crate::reader::NodeReader;
use crate::reconciler::TwinReconciler;
use bridge_hub::DeviceHub;
use bridge_protocol::FieldDevice;
use bridge_telemetry::{metrics, record_loop_iteration};
use domain::PropertyPatch;
use domain::nodes::{ERROR_NODES, TELEMETRY_NODES, TWIN_NODES};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// 单轮迭代的阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Telemetry,
    ErrorEvent,
    Twin,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Telemetry => "telemetry",
            Stage::ErrorEvent => "error_event",
            Stage::Twin => "twin",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: PipelineError,
}

/// 单轮迭代结果。
#[derive(Debug, Default)]
pub struct IterationReport {
    pub telemetry_sent: bool,
    pub error_event_sent: bool,
    pub twin_patch: Option<PropertyPatch>,
    pub failures: Vec<StageFailure>,
}

impl IterationReport {
    pub fn twin_patched(&self) -> bool {
        self.twin_patch.is_some()
    }

    pub fn failed(&self, stage: Stage) -> bool {
        self.failures.iter().any(|failure| failure.stage == stage)
    }

    fn record(&mut self, stage: Stage, error: PipelineError) {
        warn!(target: "bridge.pipeline", stage = %stage, error = %error, "stage_failed");
        self.failures.push(StageFailure { stage, error });
    }
}

/// 桥接主循环：读取遥测 → 上送 → 错误事件 → 拉取孪生 → 对账 → 等待。
pub struct BridgeLoop {
    hub: Arc<dyn DeviceHub>,
    reader: NodeReader,
    forwarder: TelemetryForwarder,
    notifier: ErrorEventNotifier,
    reconciler: TwinReconciler,
    poll_interval: Duration,
}

impl BridgeLoop {
    pub fn new(device: Arc<dyn FieldDevice>, hub: Arc<dyn DeviceHub>, poll_interval: Duration) -> Self {
        let watermark = Arc::new(ErrorWatermark::new());
        Self {
            reader: NodeReader::new(device),
            forwarder: TelemetryForwarder::new(hub.clone()),
            notifier: ErrorEventNotifier::new(hub.clone(), watermark),
            reconciler: TwinReconciler::new(hub.clone()),
            hub,
            poll_interval,
        }
    }

    pub fn watermark(&self) -> Arc<ErrorWatermark> {
        self.notifier.watermark().clone()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// 执行一轮；各阶段独立，失败只记录不中断后续阶段。
    pub async fn run_iteration(&self) -> IterationReport {
        record_loop_iteration();
        let mut report = IterationReport::default();

        match self.reader.read(&TELEMETRY_NODES).await {
            Ok(readings) => match self.forwarder.forward(&readings).await {
                Ok(_) => report.telemetry_sent = true,
                Err(err) => report.record(Stage::Telemetry, err),
            },
            Err(err) => report.record(Stage::Telemetry, err),
        }

        match self.reader.read(&ERROR_NODES).await {
            Ok(readings) => match self.notifier.notify(&readings).await {
                Ok(sent) => report.error_event_sent = sent,
                Err(err) => report.record(Stage::ErrorEvent, err),
            },
            Err(err) => report.record(Stage::ErrorEvent, err),
        }

        if let Err(err) = self.reconcile_twin(&mut report).await {
            report.record(Stage::Twin, err);
        }

        report
    }

    async fn reconcile_twin(&self, report: &mut IterationReport) -> Result<(), PipelineError> {
        let twin = self.hub.get_twin().await.map_err(PipelineError::Twin)?;
        let readings = self.reader.read(&TWIN_NODES).await?;
        report.twin_patch = self.reconciler.reconcile(&twin, &readings).await?;
        Ok(())
    }

    /// 循环执行直到 `shutdown` 完成；迭代之间的等待不阻塞运行时。
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            target: "bridge.pipeline",
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "bridge_loop_started"
        );
        loop {
            // 迭代中途也响应关停
            let report = tokio::select! {
                report = self.run_iteration() => report,
                _ = &mut shutdown => break,
            };
            debug!(
                target: "bridge.pipeline",
                telemetry_sent = report.telemetry_sent,
                error_event_sent = report.error_event_sent,
                twin_patched = report.twin_patched(),
                failures = report.failures.len(),
                metrics = ?metrics().snapshot(),
                "bridge_iteration_finished"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = &mut shutdown => break,
            }
        }
        info!(target: "bridge.pipeline", "bridge_loop_stopped");
    }
}
