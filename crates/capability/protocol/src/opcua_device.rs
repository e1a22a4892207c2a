//! OPC-UA 现场设备客户端
//!
//! `opcua` 客户端的会话调用是阻塞式的，因此会话固定运行在独立的工作线程上，
//! 异步侧通过命令通道提交请求、通过 oneshot 接收结果，并以超时包裹每次请求。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let config = OpcUaConfig::new("opc.tcp://localhost:4840/", "ns=2;s=Device 1");
//! let device = OpcUaDevice::connect(config).await?;
//! let readings = device.read_children(&TELEMETRY_NODES).await?;
//! ```

use crate::error::ProtocolError;
use crate::types::FieldDevice;
use async_trait::async_trait;
use domain::{NodeValue, ReadingSet};
use opcua::client::prelude::*;
use opcua::sync::RwLock;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info};

/// OPC-UA 连接配置
#[derive(Debug, Clone)]
pub struct OpcUaConfig {
    /// 服务端点（如 `opc.tcp://localhost:4840/`）
    pub endpoint_url: String,
    /// 设备父节点 ID（如 `ns=2;s=Device 1`）
    pub device_node_id: String,
    /// 子节点浏览名所在命名空间（与父节点 ID 的命名空间无关）
    pub browse_namespace: u16,
    /// 客户端证书目录
    pub pki_dir: String,
    /// 单次请求超时（毫秒）
    pub request_timeout_ms: u64,
    pub application_name: String,
}

impl OpcUaConfig {
    pub fn new(endpoint_url: impl Into<String>, device_node_id: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            device_node_id: device_node_id.into(),
            browse_namespace: 0,
            pki_dir: "pki".to_string(),
            request_timeout_ms: 3000,
            application_name: "opcua-hub-bridge".to_string(),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, ProtocolError>>;

enum Command {
    Read {
        names: Vec<String>,
        reply: Reply<ReadingSet>,
    },
    Write {
        name: String,
        value: NodeValue,
        reply: Reply<()>,
    },
    Call {
        name: String,
        reply: Reply<()>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// OPC-UA 现场设备
pub struct OpcUaDevice {
    commands: mpsc::Sender<Command>,
    request_timeout: Duration,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl OpcUaDevice {
    /// 建立会话；失败时返回 `ProtocolError::Connection`。
    pub async fn connect(config: OpcUaConfig) -> Result<Self, ProtocolError> {
        let request_timeout = Duration::from_millis(config.request_timeout_ms);
        let (commands, receiver) = mpsc::channel(32);
        let (ready_tx, ready_rx) = oneshot::channel();
        let worker = std::thread::Builder::new()
            .name("opcua-session".to_string())
            .spawn(move || run_worker(config, receiver, ready_tx))
            .map_err(|err| ProtocolError::Connection(err.to_string()))?;

        ready_rx.await.map_err(|_| ProtocolError::ChannelClosed)??;
        Ok(Self {
            commands,
            request_timeout,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// 在工作线程上关闭会话并等待线程退出。
    pub async fn disconnect(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Disconnect { reply }).await.is_ok() {
            let _ = done.await;
        }
        if let Some(worker) = self.worker.lock().await.take() {
            let _ = tokio::task::spawn_blocking(move || worker.join()).await;
        }
    }

    async fn request<T>(
        &self,
        node: &str,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, ProtocolError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ProtocolError::ChannelClosed)?;
        match tokio::time::timeout(self.request_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProtocolError::ChannelClosed),
            Err(_) => Err(ProtocolError::ReadTimeout {
                node: node.to_string(),
            }),
        }
    }
}

#[async_trait]
impl FieldDevice for OpcUaDevice {
    async fn read_child(&self, name: &str) -> Result<NodeValue, ProtocolError> {
        let readings = self.read_children(&[name]).await?;
        readings
            .get(name)
            .cloned()
            .ok_or_else(|| ProtocolError::NodeLookup {
                node: name.to_string(),
            })
    }

    async fn read_children(&self, names: &[&str]) -> Result<ReadingSet, ProtocolError> {
        let names: Vec<String> = names.iter().map(|name| name.to_string()).collect();
        let label = names.join(",");
        self.request(&label, |reply| Command::Read { names, reply })
            .await
    }

    async fn write_child(&self, name: &str, value: NodeValue) -> Result<(), ProtocolError> {
        let owned = name.to_string();
        self.request(name, |reply| Command::Write {
            name: owned,
            value,
            reply,
        })
        .await
    }

    async fn call_method(&self, name: &str) -> Result<(), ProtocolError> {
        let owned = name.to_string();
        self.request(name, |reply| Command::Call { name: owned, reply })
            .await
    }
}

fn run_worker(
    config: OpcUaConfig,
    mut receiver: mpsc::Receiver<Command>,
    ready: oneshot::Sender<Result<(), ProtocolError>>,
) {
    let mut worker = match SessionWorker::connect(&config) {
        Ok(worker) => {
            info!(
                target: "bridge.protocol",
                endpoint = %config.endpoint_url,
                device_node = %config.device_node_id,
                "opcua_session_connected"
            );
            let _ = ready.send(Ok(()));
            worker
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    while let Some(command) = receiver.blocking_recv() {
        match command {
            Command::Read { names, reply } => {
                let _ = reply.send(worker.read(&names));
            }
            Command::Write { name, value, reply } => {
                let _ = reply.send(worker.write(&name, value));
            }
            Command::Call { name, reply } => {
                let _ = reply.send(worker.call(&name));
            }
            Command::Disconnect { reply } => {
                worker.disconnect();
                let _ = reply.send(());
                return;
            }
        }
    }
    worker.disconnect();
}

struct SessionWorker {
    _client: Client,
    session: Arc<RwLock<Session>>,
    parent: NodeId,
    browse_namespace: u16,
    children: HashMap<String, NodeId>,
}

impl SessionWorker {
    fn connect(config: &OpcUaConfig) -> Result<Self, ProtocolError> {
        let parent = NodeId::from_str(&config.device_node_id)
            .map_err(|_| ProtocolError::InvalidNodeId(config.device_node_id.clone()))?;
        let mut client = ClientBuilder::new()
            .application_name(config.application_name.clone())
            .application_uri(format!("urn:{}", config.application_name))
            .product_uri(format!("urn:{}", config.application_name))
            .pki_dir(config.pki_dir.clone())
            .create_sample_keypair(true)
            .trust_server_certs(true)
            .session_retry_limit(3)
            .client()
            .ok_or_else(|| ProtocolError::Connection("invalid opcua client configuration".to_string()))?;
        let session = client
            .connect_to_endpoint(
                (
                    config.endpoint_url.as_str(),
                    SecurityPolicy::None.to_str(),
                    MessageSecurityMode::None,
                    UserTokenPolicy::anonymous(),
                ),
                IdentityToken::Anonymous,
            )
            .map_err(|status| {
                ProtocolError::Connection(format!("{}: {}", config.endpoint_url, status))
            })?;
        Ok(Self {
            _client: client,
            session,
            parent,
            browse_namespace: config.browse_namespace,
            children: HashMap::new(),
        })
    }

    /// 通过浏览路径 `<parent>/<ns>:<name>` 解析子节点，结果按名称缓存。
    fn resolve(&mut self, name: &str) -> Result<NodeId, ProtocolError> {
        if let Some(node_id) = self.children.get(name) {
            return Ok(node_id.clone());
        }
        let path = child_browse_path(&self.parent, self.browse_namespace, name);
        let results = self
            .session
            .read()
            .translate_browse_paths_to_node_ids(&[path])
            .map_err(|status| ProtocolError::Read(format!("browse {}: {}", name, status)))?;
        let node_id = results
            .into_iter()
            .next()
            .filter(|result| result.status_code.is_good())
            .and_then(|result| result.targets)
            .and_then(|targets| targets.into_iter().next())
            .map(|target| target.target_id.node_id)
            .ok_or_else(|| ProtocolError::NodeLookup {
                node: name.to_string(),
            })?;
        debug!(target: "bridge.protocol", node = %name, node_id = %node_id, "opcua_child_resolved");
        self.children.insert(name.to_string(), node_id.clone());
        Ok(node_id)
    }

    fn read(&mut self, names: &[String]) -> Result<ReadingSet, ProtocolError> {
        let mut nodes_to_read = Vec::with_capacity(names.len());
        for name in names {
            nodes_to_read.push(ReadValueId {
                node_id: self.resolve(name)?,
                attribute_id: AttributeId::Value as u32,
                index_range: UAString::null(),
                data_encoding: QualifiedName::null(),
            });
        }
        let values = self
            .session
            .read()
            .read(&nodes_to_read, TimestampsToReturn::Neither, 0.0)
            .map_err(|status| ProtocolError::Read(status.to_string()))?;
        if values.len() != names.len() {
            return Err(ProtocolError::Read(format!(
                "expected {} values, got {}",
                names.len(),
                values.len()
            )));
        }

        let mut readings = ReadingSet::new();
        for (name, data_value) in names.iter().zip(values) {
            if let Some(status) = data_value.status {
                if !status.is_good() {
                    return Err(ProtocolError::Read(format!("{}: {}", name, status)));
                }
            }
            let variant = data_value
                .value
                .ok_or_else(|| ProtocolError::Read(format!("{}: empty value", name)))?;
            readings.insert(name.as_str(), variant_to_value(name, variant)?);
        }
        Ok(readings)
    }

    fn write(&mut self, name: &str, value: NodeValue) -> Result<(), ProtocolError> {
        let node_id = self.resolve(name)?;
        let write = write_value(node_id, value_to_variant(name, value)?);
        let results = self
            .session
            .read()
            .write(&[write])
            .map_err(|status| ProtocolError::Write(format!("{}: {}", name, status)))?;
        match results.first() {
            Some(status) if status.is_good() => Ok(()),
            Some(status) => Err(ProtocolError::Write(format!("{}: {}", name, status))),
            None => Err(ProtocolError::Write(format!("{}: no result", name))),
        }
    }

    fn call(&mut self, name: &str) -> Result<(), ProtocolError> {
        let method_id = self.resolve(name)?;
        let request = CallMethodRequest {
            object_id: self.parent.clone(),
            method_id,
            input_arguments: None,
        };
        let result = self
            .session
            .read()
            .call(request)
            .map_err(|status| ProtocolError::Method(format!("{}: {}", name, status)))?;
        if result.status_code.is_good() {
            Ok(())
        } else {
            Err(ProtocolError::Method(format!("{}: {}", name, result.status_code)))
        }
    }

    fn disconnect(&mut self) {
        self.session.write().disconnect();
        info!(target: "bridge.protocol", "opcua_session_closed");
    }
}

/// `<parent>/<ns>:<name>`，经层级引用向下一级。
fn child_browse_path(parent: &NodeId, browse_namespace: u16, name: &str) -> BrowsePath {
    BrowsePath {
        starting_node: parent.clone(),
        relative_path: RelativePath {
            elements: Some(vec![RelativePathElement {
                reference_type_id: ReferenceTypeId::HierarchicalReferences.into(),
                is_inverse: false,
                include_subtypes: true,
                target_name: QualifiedName::new(browse_namespace, name),
            }]),
        },
    }
}

/// 只写值，不带状态码与时间戳。
fn write_value(node_id: NodeId, variant: Variant) -> WriteValue {
    WriteValue {
        node_id,
        attribute_id: AttributeId::Value as u32,
        index_range: UAString::null(),
        value: DataValue::value_only(variant),
    }
}

fn variant_to_value(name: &str, variant: Variant) -> Result<NodeValue, ProtocolError> {
    let value = match variant {
        Variant::Boolean(value) => NodeValue::Bool(value),
        Variant::SByte(value) => NodeValue::I64(value as i64),
        Variant::Byte(value) => NodeValue::I64(value as i64),
        Variant::Int16(value) => NodeValue::I64(value as i64),
        Variant::UInt16(value) => NodeValue::I64(value as i64),
        Variant::Int32(value) => NodeValue::I64(value as i64),
        Variant::UInt32(value) => NodeValue::I64(value as i64),
        Variant::Int64(value) => NodeValue::I64(value),
        Variant::UInt64(value) => NodeValue::I64(
            i64::try_from(value)
                .map_err(|_| ProtocolError::Read(format!("{}: value out of range", name)))?,
        ),
        Variant::Float(value) => NodeValue::F64(value as f64),
        Variant::Double(value) => NodeValue::F64(value),
        Variant::String(value) => NodeValue::String(value.as_ref().to_string()),
        Variant::Guid(value) => NodeValue::String(value.to_string()),
        other => {
            return Err(ProtocolError::Read(format!(
                "{}: unsupported variant {:?}",
                name, other
            )));
        }
    };
    Ok(value)
}

/// 整数按 Int32 写入（设备节点的数据类型）。
fn value_to_variant(name: &str, value: NodeValue) -> Result<Variant, ProtocolError> {
    let variant = match value {
        NodeValue::I64(value) => Variant::Int32(
            i32::try_from(value)
                .map_err(|_| ProtocolError::Write(format!("{}: {} exceeds Int32", name, value)))?,
        ),
        NodeValue::F64(value) => Variant::Double(value),
        NodeValue::Bool(value) => Variant::Boolean(value),
        NodeValue::String(value) => Variant::String(UAString::from(value)),
    };
    Ok(variant)
}
