//! IoT Hub 设备 MQTT 通道。
//!
//! 单一连接承载遥测、孪生请求/响应、desired 推送与直接方法；
//! 孪生请求按 `$rid` 与响应关联，下行推送经 mpsc 交给监听任务。
//! 所有上行发布只入队不等待；断线或队列满时立即返回投递错误。

use crate::client::{DeviceHub, HubEvent};
use crate::credentials::{DeviceConnectionString, expiry_from_now};
use crate::error::HubError;
use crate::message::Message;
use crate::topics::{
    self, DESIRED_PATCH_FILTER, InboundTopic, METHOD_REQUEST_FILTER, TWIN_RESPONSE_FILTER,
};
use async_trait::async_trait;
use domain::{MethodInvocation, MethodResult, PropertyPatch, TwinState};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, Publish, QoS, Transport,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub const DEFAULT_MQTT_PORT: u16 = 8883;
pub const API_VERSION: &str = "2021-04-12";
const MAX_PACKET_SIZE: usize = 256 * 1024;
const EVENT_CHANNEL_CAPACITY: usize = 64;
const REQUEST_QUEUE_CAPACITY: usize = 10;

/// MQTT 通道配置。
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub connection: DeviceConnectionString,
    pub port: u16,
    pub sas_ttl_seconds: u64,
    pub request_timeout_ms: u64,
}

impl HubConfig {
    pub fn new(connection: DeviceConnectionString) -> Self {
        Self {
            connection,
            port: DEFAULT_MQTT_PORT,
            sas_ttl_seconds: 86_400,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug)]
struct TwinResponse {
    status: u16,
    body: Vec<u8>,
}

type PendingRequests = Arc<Mutex<HashMap<u64, oneshot::Sender<TwinResponse>>>>;

/// 基于 rumqttc 的设备通道。
#[derive(Clone)]
pub struct MqttDeviceHub {
    client: AsyncClient,
    device_id: String,
    pending: PendingRequests,
    next_request_id: Arc<AtomicU64>,
    request_timeout: Duration,
    connected: Arc<AtomicBool>,
}

impl MqttDeviceHub {
    /// 建立连接并等待 CONNACK；返回通道、下行事件接收端与事件循环任务。
    pub async fn connect(
        config: HubConfig,
    ) -> Result<(Self, mpsc::Receiver<HubEvent>, tokio::task::JoinHandle<()>), HubError> {
        let connection = &config.connection;
        let mut options = MqttOptions::new(
            connection.device_id.clone(),
            connection.host_name.clone(),
            config.port,
        );
        options.set_keep_alive(Duration::from_secs(30));
        options.set_transport(Transport::tls_with_default_config());
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        refresh_credentials(&mut options, connection, config.sas_ttl_seconds)?;
        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);
        let request_timeout = Duration::from_millis(config.request_timeout_ms);

        tokio::time::timeout(request_timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| HubError::Connection("timed out waiting for CONNACK".to_string()))??;
        subscribe_all(&client)?;
        info!(
            target: "bridge.hub",
            device_id = %connection.device_id,
            host = %connection.host_name,
            "hub_connected"
        );

        let hub = Self::from_client(
            client,
            connection.device_id.clone(),
            request_timeout,
            Arc::new(AtomicBool::new(true)),
        );
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let handle = spawn_event_loop(
            eventloop,
            hub.clone(),
            config.connection.clone(),
            config.sas_ttl_seconds,
            events_tx,
        );
        Ok((hub, events_rx, handle))
    }

    fn from_client(
        client: AsyncClient,
        device_id: String,
        request_timeout: Duration,
        connected: Arc<AtomicBool>,
    ) -> Self {
        Self {
            client,
            device_id,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_request_id: Arc::new(AtomicU64::new(1)),
            request_timeout,
            connected,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// 非阻塞入队；断线或请求队列已满时返回投递错误。
    fn enqueue(&self, topic: String, qos: QoS, payload: Vec<u8>) -> Result<(), HubError> {
        if !self.is_connected() {
            return Err(HubError::Delivery(format!("hub disconnected: {}", topic)));
        }
        self.client
            .try_publish(topic.clone(), qos, false, payload)
            .map_err(|err| HubError::Delivery(format!("{}: {}", topic, err)))
    }

    /// 发布孪生请求并等待同 `$rid` 的响应。
    async fn twin_request(
        &self,
        topic_for: fn(u64) -> String,
        payload: Vec<u8>,
    ) -> Result<TwinResponse, HubError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| HubError::Request("lock failed".to_string()))?
            .insert(request_id, tx);

        let topic = topic_for(request_id);
        if let Err(err) = self.enqueue(topic.clone(), QoS::AtMostOnce, payload) {
            self.forget(request_id);
            return Err(err);
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(HubError::ChannelClosed),
            Err(_) => {
                self.forget(request_id);
                return Err(HubError::Timeout(topic));
            }
        };
        if !(200..300).contains(&response.status) {
            return Err(HubError::Status {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }
        Ok(response)
    }

    fn forget(&self, request_id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&request_id);
        }
    }
}

#[async_trait]
impl DeviceHub for MqttDeviceHub {
    async fn send_message(&self, message: Message) -> Result<(), HubError> {
        let topic = topics::telemetry_topic(&self.device_id, &message.property_bag());
        debug!(
            target: "bridge.hub",
            message_id = %message.message_id,
            payload_size = message.body.len(),
            event = message.is_event(),
            "message_publish"
        );
        self.enqueue(topic, QoS::AtLeastOnce, message.body)
    }

    async fn get_twin(&self) -> Result<TwinState, HubError> {
        let response = self.twin_request(topics::twin_get_topic, Vec::new()).await?;
        serde_json::from_slice(&response.body).map_err(|err| HubError::Payload(err.to_string()))
    }

    async fn patch_reported(&self, patch: PropertyPatch) -> Result<(), HubError> {
        let payload =
            serde_json::to_vec(&patch).map_err(|err| HubError::Payload(err.to_string()))?;
        self.twin_request(topics::reported_patch_topic, payload).await?;
        Ok(())
    }

    async fn send_method_response(
        &self,
        request_id: &str,
        result: &MethodResult,
    ) -> Result<(), HubError> {
        let payload = serde_json::to_vec(&result.payload)
            .map_err(|err| HubError::Payload(err.to_string()))?;
        self.enqueue(
            topics::method_response_topic(result.status, request_id),
            QoS::AtMostOnce,
            payload,
        )
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), HubError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(HubError::Connection(format!("connection refused: {:?}", code))),
                };
            }
            Ok(_) => {}
            Err(err) => return Err(HubError::Connection(err.to_string())),
        }
    }
}

/// 以新的过期时间重签 SAS 令牌并写入连接参数，返回令牌过期时刻。
fn refresh_credentials(
    options: &mut MqttOptions,
    connection: &DeviceConnectionString,
    ttl_seconds: u64,
) -> Result<u64, HubError> {
    let expiry = expiry_from_now(ttl_seconds);
    let token = connection.sas_token(expiry)?;
    options.set_credentials(
        topics::device_username(&connection.host_name, &connection.device_id, API_VERSION),
        token,
    );
    Ok(expiry)
}

fn subscribe_all(client: &AsyncClient) -> Result<(), HubError> {
    for filter in [TWIN_RESPONSE_FILTER, DESIRED_PATCH_FILTER, METHOD_REQUEST_FILTER] {
        client
            .try_subscribe(filter, QoS::AtMostOnce)
            .map_err(|err| HubError::Connection(format!("subscribe {}: {}", filter, err)))?;
    }
    Ok(())
}

fn spawn_event_loop(
    mut eventloop: EventLoop,
    hub: MqttDeviceHub,
    connection: DeviceConnectionString,
    sas_ttl_seconds: u64,
    events: mpsc::Sender<HubEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    route_publish(publish, &hub.pending, &events);
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    hub.connected.store(true, Ordering::Release);
                    // 重连后会话不保留订阅
                    info!(target: "bridge.hub", "hub_reconnected");
                    if let Err(err) = subscribe_all(&hub.client) {
                        warn!(target: "bridge.hub", "resubscribe failed: {}", err);
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    hub.connected.store(false, Ordering::Release);
                    warn!(target: "bridge.hub", "mqtt eventloop error: {}", err);
                    // 每次重连都使用新令牌，避免过期后被拒
                    match refresh_credentials(
                        &mut eventloop.mqtt_options,
                        &connection,
                        sas_ttl_seconds,
                    ) {
                        Ok(expiry) => debug!(target: "bridge.hub", expiry, "sas_token_refreshed"),
                        Err(err) => warn!(target: "bridge.hub", "sas refresh failed: {}", err),
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    })
}

fn route_publish(
    publish: Publish,
    pending: &PendingRequests,
    events: &mpsc::Sender<HubEvent>,
) {
    let Some(inbound) = topics::parse_inbound(&publish.topic) else {
        debug!(target: "bridge.hub", topic = %publish.topic, "topic_skipped");
        return;
    };
    match inbound {
        InboundTopic::TwinResponse(response) => {
            let waiter = pending
                .lock()
                .ok()
                .and_then(|mut pending| pending.remove(&response.request_id));
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(TwinResponse {
                        status: response.status,
                        body: publish.payload.to_vec(),
                    });
                }
                None => {
                    debug!(
                        target: "bridge.hub",
                        request_id = response.request_id,
                        "twin_response_unmatched"
                    );
                }
            }
        }
        InboundTopic::DesiredPatch { version } => match parse_desired_patch(&publish.payload) {
            Ok(patch) => {
                debug!(target: "bridge.hub", version = ?version, "desired_patch_received");
                forward(events, HubEvent::DesiredPatch(patch));
            }
            Err(err) => warn!(target: "bridge.hub", "desired patch invalid: {}", err),
        },
        InboundTopic::MethodRequest(request) => {
            let mut invocation = MethodInvocation::new(request.request_id, request.method_name);
            invocation.payload = parse_method_payload(&publish.payload);
            forward(events, HubEvent::MethodRequest(invocation));
        }
    }
}

/// 事件循环不能等待监听任务，通道满时丢弃并告警。
fn forward(events: &mpsc::Sender<HubEvent>, event: HubEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            warn!(target: "bridge.hub", event = ?event, "hub_event_dropped");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!(target: "bridge.hub", "hub event receiver dropped");
        }
    }
}

/// 解析 desired 推送正文，去掉 `$version` 元数据。
pub fn parse_desired_patch(payload: &[u8]) -> Result<PropertyPatch, HubError> {
    let mut patch: PropertyPatch =
        serde_json::from_slice(payload).map_err(|err| HubError::Payload(err.to_string()))?;
    patch.remove("$version");
    Ok(patch)
}

fn parse_method_payload(payload: &[u8]) -> Option<serde_json::Value> {
    if payload.is_empty() {
        return None;
    }
    serde_json::from_slice::<serde_json::Value>(payload)
        .ok()
        .filter(|value| !value.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::ReadingSet;

    #[test]
    fn desired_patch_drops_version() {
        let patch = parse_desired_patch(br#"{"ProductionRate":80,"$version":9}"#).expect("patch");
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.get("ProductionRate"), Some(&serde_json::json!(80)));
        assert!(parse_desired_patch(b"[1,2]").is_err());
    }

    #[test]
    fn method_payload_is_optional() {
        assert_eq!(parse_method_payload(b""), None);
        assert_eq!(parse_method_payload(b"null"), None);
        assert_eq!(parse_method_payload(b"not json"), None);
        assert_eq!(
            parse_method_payload(br#"{"a":1}"#),
            Some(serde_json::json!({"a": 1}))
        );
    }

    fn unreachable_hub(connected: bool) -> (MqttDeviceHub, EventLoop) {
        let mut options = MqttOptions::new("dev1", "127.0.0.1", 1);
        options.set_keep_alive(Duration::from_secs(30));
        let (client, eventloop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);
        let hub = MqttDeviceHub::from_client(
            client,
            "dev1".to_string(),
            Duration::from_millis(300),
            Arc::new(AtomicBool::new(connected)),
        );
        (hub, eventloop)
    }

    fn connection() -> DeviceConnectionString {
        DeviceConnectionString::parse(
            "HostName=hub.example.net;DeviceId=dev1;SharedAccessKey=c2VjcmV0LWtleQ==",
        )
        .expect("connection string")
    }

    #[tokio::test]
    async fn disconnected_hub_fails_fast() {
        let (hub, _eventloop) = unreachable_hub(false);
        for _ in 0..15 {
            let result = tokio::time::timeout(
                Duration::from_secs(1),
                hub.send_message(Message::json(&ReadingSet::new()).expect("message")),
            )
            .await
            .expect("send must not block");
            assert!(matches!(result, Err(HubError::Delivery(_))));
        }

        let twin = tokio::time::timeout(Duration::from_secs(1), hub.get_twin())
            .await
            .expect("get_twin must not block");
        assert!(twin.is_err());
        assert!(hub.pending.lock().expect("lock").is_empty());

        let response = MethodResult::succeeded();
        assert!(matches!(
            hub.send_method_response("1", &response).await,
            Err(HubError::Delivery(_))
        ));
    }

    #[tokio::test]
    async fn full_request_queue_is_a_delivery_error() {
        // 事件循环不运行，队列不会被消费
        let (hub, _eventloop) = unreachable_hub(true);
        let mut results = Vec::new();
        for _ in 0..15 {
            let result = tokio::time::timeout(
                Duration::from_secs(1),
                hub.send_message(Message::json(&ReadingSet::new()).expect("message")),
            )
            .await
            .expect("send must not block");
            results.push(result);
        }
        assert!(results[..REQUEST_QUEUE_CAPACITY].iter().all(Result::is_ok));
        assert!(
            results[REQUEST_QUEUE_CAPACITY..]
                .iter()
                .all(|result| matches!(result, Err(HubError::Delivery(_))))
        );

        let twin = tokio::time::timeout(Duration::from_secs(2), hub.get_twin())
            .await
            .expect("get_twin must not block");
        assert!(matches!(twin, Err(HubError::Delivery(_))));
    }

    #[tokio::test]
    async fn twin_request_times_out_without_response() {
        let (hub, _eventloop) = unreachable_hub(true);
        let twin = tokio::time::timeout(Duration::from_secs(2), hub.get_twin())
            .await
            .expect("get_twin must not block");
        assert!(matches!(twin, Err(HubError::Timeout(_))));
        assert!(hub.pending.lock().expect("lock").is_empty());
    }

    #[test]
    fn credentials_are_refreshed_with_new_expiry() {
        let connection = connection();
        let mut options = MqttOptions::new("dev1", "hub.example.net", DEFAULT_MQTT_PORT);

        let short = refresh_credentials(&mut options, &connection, 1).expect("short");
        let (username, first) = options.credentials().expect("credentials");
        assert_eq!(username, "hub.example.net/dev1/?api-version=2021-04-12");
        assert!(first.contains(&format!("se={}", short)));

        let long = refresh_credentials(&mut options, &connection, 3_600).expect("long");
        let (_, second) = options.credentials().expect("credentials");
        assert!(long > short);
        assert!(second.contains(&format!("se={}", long)));
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn full_event_channel_does_not_block_routing() {
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let (events_tx, mut events_rx) = mpsc::channel(1);
        events_tx
            .try_send(HubEvent::DesiredPatch(PropertyPatch::new()))
            .expect("fill");

        let publish = Publish::new(
            "$iothub/methods/POST/EmergencyStop/?$rid=7",
            QoS::AtMostOnce,
            Vec::new(),
        );
        route_publish(publish, &pending, &events_tx);

        assert!(matches!(events_rx.try_recv(), Ok(HubEvent::DesiredPatch(_))));
        assert!(events_rx.try_recv().is_err());

        drop(events_rx);
        let publish = Publish::new(
            "$iothub/twin/PATCH/properties/desired/?$version=3",
            QoS::AtMostOnce,
            b"{}".to_vec(),
        );
        route_publish(publish, &pending, &events_tx);
    }

    #[tokio::test]
    async fn twin_response_is_routed_to_waiter() {
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = oneshot::channel();
        pending.lock().expect("lock").insert(5, tx);
        let (events_tx, _events_rx) = mpsc::channel(1);

        let publish = Publish::new("$iothub/twin/res/204/?$rid=5", QoS::AtMostOnce, Vec::new());
        route_publish(publish, &pending, &events_tx);

        let response = rx.await.expect("response");
        assert_eq!(response.status, 204);
        assert!(pending.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn method_request_becomes_event() {
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let (events_tx, mut events_rx) = mpsc::channel(1);

        let publish = Publish::new(
            "$iothub/methods/POST/EmergencyStop/?$rid=42",
            QoS::AtMostOnce,
            b"null".to_vec(),
        );
        route_publish(publish, &pending, &events_tx);

        match events_rx.recv().await {
            Some(HubEvent::MethodRequest(invocation)) => {
                assert_eq!(invocation.request_id, "42");
                assert_eq!(invocation.name, "EmergencyStop");
                assert!(invocation.payload.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
