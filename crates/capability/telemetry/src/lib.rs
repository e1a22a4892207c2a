//! 追踪初始化、进程内指标与消息 ID 生成。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 基础指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub loop_iterations: u64,
    pub node_read_failures: u64,
    pub telemetry_sent: u64,
    pub delivery_failures: u64,
    pub error_events: u64,
    pub reported_patches: u64,
    pub methods_handled: u64,
    pub methods_failed: u64,
    pub methods_not_found: u64,
    pub desired_applied: u64,
    pub desired_failed: u64,
    pub quality_corrections: u64,
}

/// 进程内基础指标。
pub struct TelemetryMetrics {
    loop_iterations: AtomicU64,
    node_read_failures: AtomicU64,
    telemetry_sent: AtomicU64,
    delivery_failures: AtomicU64,
    error_events: AtomicU64,
    reported_patches: AtomicU64,
    methods_handled: AtomicU64,
    methods_failed: AtomicU64,
    methods_not_found: AtomicU64,
    desired_applied: AtomicU64,
    desired_failed: AtomicU64,
    quality_corrections: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            loop_iterations: AtomicU64::new(0),
            node_read_failures: AtomicU64::new(0),
            telemetry_sent: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            error_events: AtomicU64::new(0),
            reported_patches: AtomicU64::new(0),
            methods_handled: AtomicU64::new(0),
            methods_failed: AtomicU64::new(0),
            methods_not_found: AtomicU64::new(0),
            desired_applied: AtomicU64::new(0),
            desired_failed: AtomicU64::new(0),
            quality_corrections: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            loop_iterations: self.loop_iterations.load(Ordering::Relaxed),
            node_read_failures: self.node_read_failures.load(Ordering::Relaxed),
            telemetry_sent: self.telemetry_sent.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            error_events: self.error_events.load(Ordering::Relaxed),
            reported_patches: self.reported_patches.load(Ordering::Relaxed),
            methods_handled: self.methods_handled.load(Ordering::Relaxed),
            methods_failed: self.methods_failed.load(Ordering::Relaxed),
            methods_not_found: self.methods_not_found.load(Ordering::Relaxed),
            desired_applied: self.desired_applied.load(Ordering::Relaxed),
            desired_failed: self.desired_failed.load(Ordering::Relaxed),
            quality_corrections: self.quality_corrections.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成遥测消息 ID。
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 记录轮询迭代次数。
pub fn record_loop_iteration() {
    metrics().loop_iterations.fetch_add(1, Ordering::Relaxed);
}

/// 记录节点读取失败次数（查找失败或超时）。
pub fn record_node_read_failure() {
    metrics().node_read_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录遥测发送成功次数。
pub fn record_telemetry_sent() {
    metrics().telemetry_sent.fetch_add(1, Ordering::Relaxed);
}

/// 记录上行投递失败次数。
pub fn record_delivery_failure() {
    metrics().delivery_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录错误事件发送次数。
pub fn record_error_event() {
    metrics().error_events.fetch_add(1, Ordering::Relaxed);
}

/// 记录 reported 孪生补丁次数。
pub fn record_reported_patch() {
    metrics().reported_patches.fetch_add(1, Ordering::Relaxed);
}

/// 记录远程方法成功执行次数。
pub fn record_method_handled() {
    metrics().methods_handled.fetch_add(1, Ordering::Relaxed);
}

/// 记录远程方法执行失败次数（400）。
pub fn record_method_failed() {
    metrics().methods_failed.fetch_add(1, Ordering::Relaxed);
}

/// 记录未知远程方法次数（404）。
pub fn record_method_not_found() {
    metrics().methods_not_found.fetch_add(1, Ordering::Relaxed);
}

/// 记录 desired 补丁写回成功次数。
pub fn record_desired_applied() {
    metrics().desired_applied.fetch_add(1, Ordering::Relaxed);
}

/// 记录 desired 补丁写回失败次数。
pub fn record_desired_failed() {
    metrics().desired_failed.fetch_add(1, Ordering::Relaxed);
}

/// 记录质量闸门修正次数。
pub fn record_quality_correction() {
    metrics().quality_corrections.fetch_add(1, Ordering::Relaxed);
}
