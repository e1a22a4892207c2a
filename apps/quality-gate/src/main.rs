//! 质量闸门函数宿主（队列触发函数的 HTTP custom handler）。
//!
//! 函数宿主把每条队列消息以 `POST /<函数名>` 转发过来：
//! `{"Data": {"msg": <消息>}, "Metadata": {...}}`，
//! 应答 `{"Outputs": {}, "Logs": [...], "ReturnValue": null}`。

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bridge_config::QualityGateConfig;
use bridge_hub::{RegistryConnectionString, RestTwinRegistry};
use bridge_quality::{QualityError, QualityGate, QualityMessage, QualityOutcome};
use bridge_telemetry::init_tracing;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// 队列触发器绑定名。
const MESSAGE_BINDING: &str = "msg";

#[derive(Clone)]
struct AppState {
    gate: Arc<QualityGate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InvokeRequest {
    #[serde(default)]
    data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    #[allow(dead_code)]
    metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct InvokeResponse {
    outputs: serde_json::Map<String, serde_json::Value>,
    logs: Vec<String>,
    return_value: Option<serde_json::Value>,
}

impl InvokeResponse {
    fn with_log(log: String) -> Self {
        Self {
            outputs: serde_json::Map::new(),
            logs: vec![log],
            return_value: None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 先加载 settings.env，再加载本地 .env（均为可选）
    dotenvy::from_filename("settings.env").ok();
    dotenvy::dotenv().ok();
    init_tracing();

    let config = QualityGateConfig::from_env()?;
    let connection = RegistryConnectionString::parse(&config.registry_connection_string)?;
    let registry = Arc::new(RestTwinRegistry::new(
        connection,
        config.request_timeout_ms,
        config.sas_ttl_seconds,
    )?);
    let state = AppState {
        gate: Arc::new(QualityGate::new(registry, config.threshold)),
    };
    let app = router(state, &config.function_name);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(
        listen_addr = %config.listen_addr,
        function = %config.function_name,
        threshold = config.threshold,
        "quality_gate_listening"
    );
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: AppState, function_name: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(&format!("/{}", function_name), post(invoke))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

async fn invoke(State(state): State<AppState>, Json(request): Json<InvokeRequest>) -> Response {
    let Some(payload) = request.data.get(MESSAGE_BINDING).cloned() else {
        return reply(
            StatusCode::BAD_REQUEST,
            format!("binding Data.{} missing", MESSAGE_BINDING),
        );
    };
    let message = match QualityMessage::from_value(payload) {
        Ok(message) => message,
        Err(err) => return failure(err),
    };
    match state.gate.handle(&message).await {
        Ok(QualityOutcome::AboveThreshold) => reply(
            StatusCode::OK,
            format!(
                "good count percentage {} not below threshold {}",
                message.good_count_percentage,
                state.gate.threshold()
            ),
        ),
        Ok(QualityOutcome::Corrected {
            device_id,
            production_rate,
        }) => reply(
            StatusCode::OK,
            format!(
                "desired ProductionRate set to {} for {}",
                production_rate, device_id
            ),
        ),
        Err(err) => failure(err),
    }
}

fn failure(err: QualityError) -> Response {
    let status = match err {
        QualityError::Payload(_) => StatusCode::BAD_REQUEST,
        QualityError::MissingReported { .. } | QualityError::Registry(_) => StatusCode::BAD_GATEWAY,
    };
    warn!(target: "bridge.quality", status = status.as_u16(), error = %err, "quality_gate_failed");
    reply(status, err.to_string())
}

fn reply(status: StatusCode, log: String) -> Response {
    (status, Json(InvokeResponse::with_log(log))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_hub::InMemoryRegistry;
    use domain::{PropertyPatch, TwinState, single_patch};
    use serde_json::json;

    fn build_state(registry: Arc<InMemoryRegistry>) -> AppState {
        AppState {
            gate: Arc::new(QualityGate::new(registry, 0.9)),
        }
    }

    fn request(msg: serde_json::Value) -> InvokeRequest {
        let mut data = serde_json::Map::new();
        data.insert("msg".to_string(), msg);
        InvokeRequest {
            data,
            metadata: json!({}),
        }
    }

    fn registry_with_dev1() -> Arc<InMemoryRegistry> {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.insert_twin(
            "dev1",
            TwinState::new(PropertyPatch::new(), single_patch("ProductionRate", 88)),
        );
        registry
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[tokio::test]
    async fn low_quality_message_corrects_device() {
        let registry = registry_with_dev1();
        let response = invoke(
            State(build_state(registry.clone())),
            Json(request(json!({
                "Good Count percentage": 0.8,
                "ConnectionDeviceId": "dev1"
            }))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(registry.desired_updates().len(), 1);

        let body = body_json(response).await;
        assert_eq!(body["Outputs"], json!({}));
        assert_eq!(body["ReturnValue"], serde_json::Value::Null);
        assert_eq!(body["Logs"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn string_encoded_message_is_accepted() {
        let registry = registry_with_dev1();
        let response = invoke(
            State(build_state(registry.clone())),
            Json(request(json!(
                r#"{"Good Count percentage": 0.95, "ConnectionDeviceId": "dev1"}"#
            ))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(registry.desired_updates().is_empty());
    }

    #[tokio::test]
    async fn malformed_message_is_bad_request() {
        let registry = registry_with_dev1();
        let response = invoke(
            State(build_state(registry.clone())),
            Json(request(json!({"ConnectionDeviceId": "dev1"}))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = invoke(State(build_state(registry)), Json(InvokeRequest::default())).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_device_is_bad_gateway() {
        let response = invoke(
            State(build_state(Arc::new(InMemoryRegistry::new()))),
            Json(request(json!({
                "Good Count percentage": 0.5,
                "ConnectionDeviceId": "ghost"
            }))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn invoke_request_reads_host_envelope() {
        let request: InvokeRequest = serde_json::from_value(json!({
            "Data": {"msg": "{}"},
            "Metadata": {"DeliveryCount": 1}
        }))
        .expect("request");
        assert_eq!(request.data.get("msg"), Some(&json!("{}")));
    }
}
