//! 服务端孪生注册表（REST）。

use crate::credentials::{RegistryConnectionString, expiry_from_now};
use crate::error::HubError;
use async_trait::async_trait;
use domain::{PropertyPatch, TwinState};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

pub const REGISTRY_API_VERSION: &str = "2021-04-12";

/// 按设备 ID 读写孪生的服务端接口。
#[async_trait]
pub trait TwinRegistry: Send + Sync {
    async fn get_twin(&self, device_id: &str) -> Result<TwinState, HubError>;

    /// 合并更新 desired 属性。
    async fn update_desired(&self, device_id: &str, patch: PropertyPatch) -> Result<(), HubError>;
}

#[derive(Debug, Deserialize)]
struct TwinDocument {
    #[serde(default)]
    properties: TwinState,
}

/// reqwest 实现。
#[derive(Clone)]
pub struct RestTwinRegistry {
    http: reqwest::Client,
    connection: RegistryConnectionString,
    sas_ttl_seconds: u64,
}

impl RestTwinRegistry {
    pub fn new(
        connection: RegistryConnectionString,
        request_timeout_ms: u64,
        sas_ttl_seconds: u64,
    ) -> Result<Self, HubError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(request_timeout_ms))
            .build()
            .map_err(|err| HubError::Connection(err.to_string()))?;
        Ok(Self {
            http,
            connection,
            sas_ttl_seconds,
        })
    }

    pub fn host_name(&self) -> &str {
        &self.connection.host_name
    }

    fn twin_url(&self, device_id: &str) -> String {
        twin_url(&self.connection.host_name, device_id)
    }

    fn authorization(&self) -> Result<String, HubError> {
        self.connection
            .sas_token(expiry_from_now(self.sas_ttl_seconds))
    }
}

pub fn twin_url(host_name: &str, device_id: &str) -> String {
    format!(
        "https://{}/twins/{}?api-version={}",
        host_name,
        urlencoding::encode(device_id),
        REGISTRY_API_VERSION
    )
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, HubError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(HubError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl TwinRegistry for RestTwinRegistry {
    async fn get_twin(&self, device_id: &str) -> Result<TwinState, HubError> {
        let response = self
            .http
            .get(self.twin_url(device_id))
            .header(reqwest::header::AUTHORIZATION, self.authorization()?)
            .send()
            .await
            .map_err(|err| HubError::Request(err.to_string()))?;
        let document: TwinDocument = check_status(response)
            .await?
            .json()
            .await
            .map_err(|err| HubError::Payload(err.to_string()))?;
        Ok(document.properties)
    }

    async fn update_desired(&self, device_id: &str, patch: PropertyPatch) -> Result<(), HubError> {
        let body = serde_json::json!({ "properties": { "desired": patch } });
        let response = self
            .http
            .patch(self.twin_url(device_id))
            .header(reqwest::header::AUTHORIZATION, self.authorization()?)
            .json(&body)
            .send()
            .await
            .map_err(|err| HubError::Request(err.to_string()))?;
        check_status(response).await?;
        info!(target: "bridge.hub", device_id = %device_id, "desired_updated");
        Ok(())
    }
}
