//! 轮询链路
//!
//! 每轮按固定顺序执行：遥测节点读取与上送、错误事件检测、孪生对账。
//! 各阶段相互独立，单阶段失败只影响本轮该阶段。

pub mod bridge_loop;
pub mod error;
pub mod forwarder;
pub mod notifier;
pub mod reader;
pub mod reconciler;

pub use bridge_loop::{BridgeLoop, DEFAULT_POLL_INTERVAL, IterationReport, Stage, StageFailure};
pub use error::PipelineError;
pub use forwarder::TelemetryForwarder;
pub use notifier::{ErrorEventNotifier, ErrorWatermark};
pub use reader::NodeReader;
pub use reconciler::{TwinReconciler, diff_reported};
