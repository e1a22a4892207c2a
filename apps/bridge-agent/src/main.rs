//! 设备桥接进程：OPC-UA 现场设备 ↔ IoT Hub。

use bridge_config::BridgeConfig;
use bridge_control::{DesiredPatchHandler, MethodDispatcher, spawn_event_listener};
use bridge_hub::{DeviceConnectionString, HubConfig, MqttDeviceHub};
use bridge_pipeline::BridgeLoop;
use bridge_protocol::{OpcUaConfig, OpcUaDevice};
use bridge_telemetry::init_tracing;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "bridge-agent", version, about = "OPC-UA 设备到 IoT Hub 的轮询桥接")]
struct Cli {
    /// 设备 ID；同名环境变量保存该设备的 IoT Hub 连接串
    device_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 先加载 settings.env，再加载本地 .env（均为可选）
    dotenvy::from_filename("settings.env").ok();
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = match BridgeConfig::from_env(cli.device_id.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };
    let connection = DeviceConnectionString::parse(&config.device_connection_string)?;

    // 现场设备会话（启动失败即退出）
    let mut opcua = OpcUaConfig::new(&config.opcua_url, config.device_node_id());
    opcua.browse_namespace = config.opcua_browse_namespace;
    opcua.pki_dir = config.opcua_pki_dir.clone();
    opcua.request_timeout_ms = config.read_timeout_ms;
    let device = Arc::new(OpcUaDevice::connect(opcua).await?);

    // 云端设备通道（启动失败即退出）
    let mut hub_config = HubConfig::new(connection);
    hub_config.sas_ttl_seconds = config.sas_ttl_seconds;
    hub_config.request_timeout_ms = config.hub_request_timeout_ms;
    let (hub, events, hub_task) = MqttDeviceHub::connect(hub_config).await?;
    let hub = Arc::new(hub);
    info!(
        device_id = %config.device_id,
        opcua_url = %config.opcua_url,
        device_node = %config.device_node_id(),
        "bridge_connected"
    );

    // 方法与 desired 补丁只注册一次，独立于轮询节奏
    let dispatcher = Arc::new(MethodDispatcher::new(device.clone(), hub.clone()));
    let patch_handler = Arc::new(DesiredPatchHandler::new(device.clone()));
    let listener = spawn_event_listener(events, dispatcher, patch_handler);

    let bridge = BridgeLoop::new(
        device.clone(),
        hub.clone(),
        Duration::from_secs(config.poll_interval_seconds),
    );
    bridge.run(shutdown_signal()).await;

    listener.abort();
    hub_task.abort();
    device.disconnect().await;
    info!(device_id = %config.device_id, "bridge_stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("ctrl-c handler unavailable: {}", err);
        std::future::pending::<()>().await;
    }
}
