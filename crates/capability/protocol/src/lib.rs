//! # 现场设备协议能力模块
//!
//! 提供对现场设备地址空间的访问：
//! - **OPC-UA**：连接设备服务端，按浏览名读取/写入父节点下的子节点并调用方法
//! - **Simulated**：内存节点表，用于测试与本地联调
//!
//! ## 架构设计
//!
//! ```text
//! BridgeLoop / MethodDispatcher / DesiredPatchHandler
//!       │
//!       ▼
//! FieldDevice (trait)
//!       │
//!       ├── OpcUaDevice ── 工作线程 ── opcua Session
//!       └── SimulatedDevice
//! ```
//!
//! ## 地址约定
//!
//! 设备父节点为 `ns=2;s=Device <id>`，子节点浏览名为
//! `ProductionStatus, WorkorderId, GoodCount, BadCount, Temperature, ProductionRate, DeviceError`，
//! 方法为 `EmergencyStop`、`ResetErrorStatus`（无参数、无返回值）。

mod error;
mod opcua_device;
mod simulated;
mod types;

pub use error::ProtocolError;
pub use opcua_device::{OpcUaConfig, OpcUaDevice};
pub use simulated::SimulatedDevice;
pub use types::*;
