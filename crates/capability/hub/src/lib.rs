//! 云端设备管理通道
//!
//! - 设备侧：`DeviceHub`（遥测、孪生 reported、方法响应）+ `HubEvent` 下行事件
//! - 服务侧：`TwinRegistry`（按设备 ID 读写孪生 desired）
//! - 凭据：连接串解析与 SAS token

pub mod client;
pub mod credentials;
pub mod error;
pub mod in_memory;
pub mod message;
pub mod mqtt;
pub mod registry;
pub mod topics;

pub use client::{DeviceHub, HubEvent};
pub use credentials::{DeviceConnectionString, RegistryConnectionString, generate_sas_token};
pub use error::HubError;
pub use in_memory::{InMemoryHub, InMemoryRegistry};
pub use message::Message;
pub use mqtt::{HubConfig, MqttDeviceHub};
pub use registry::{RestTwinRegistry, TwinRegistry};
