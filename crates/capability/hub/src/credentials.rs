//! 连接串解析与 SAS token 生成。

use crate::error::HubError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;

/// 设备连接串（`HostName=...;DeviceId=...;SharedAccessKey=...`）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConnectionString {
    pub host_name: String,
    pub device_id: String,
    pub shared_access_key: String,
}

impl DeviceConnectionString {
    pub fn parse(value: &str) -> Result<Self, HubError> {
        let mut fields = parse_fields(value)?;
        Ok(Self {
            host_name: take_field(&mut fields, "HostName")?,
            device_id: take_field(&mut fields, "DeviceId")?,
            shared_access_key: take_field(&mut fields, "SharedAccessKey")?,
        })
    }

    /// 设备级 SAS 资源 URI。
    pub fn resource_uri(&self) -> String {
        format!("{}/devices/{}", self.host_name, self.device_id)
    }

    pub fn sas_token(&self, expiry_epoch_s: u64) -> Result<String, HubError> {
        generate_sas_token(&self.resource_uri(), &self.shared_access_key, None, expiry_epoch_s)
    }
}

/// 注册表（服务端）连接串（`HostName=...;SharedAccessKeyName=...;SharedAccessKey=...`）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConnectionString {
    pub host_name: String,
    pub shared_access_key_name: String,
    pub shared_access_key: String,
}

impl RegistryConnectionString {
    pub fn parse(value: &str) -> Result<Self, HubError> {
        let mut fields = parse_fields(value)?;
        Ok(Self {
            host_name: take_field(&mut fields, "HostName")?,
            shared_access_key_name: take_field(&mut fields, "SharedAccessKeyName")?,
            shared_access_key: take_field(&mut fields, "SharedAccessKey")?,
        })
    }

    pub fn sas_token(&self, expiry_epoch_s: u64) -> Result<String, HubError> {
        generate_sas_token(
            &self.host_name,
            &self.shared_access_key,
            Some(&self.shared_access_key_name),
            expiry_epoch_s,
        )
    }
}

/// 生成 SAS token：对 `urlencode(resource)\n<expiry>` 做 HMAC-SHA256（密钥为 base64 解码后的共享密钥）。
pub fn generate_sas_token(
    resource_uri: &str,
    key: &str,
    policy_name: Option<&str>,
    expiry_epoch_s: u64,
) -> Result<String, HubError> {
    let encoded_uri = urlencoding::encode(resource_uri);
    let to_sign = format!("{}\n{}", encoded_uri, expiry_epoch_s);
    let key_bytes = STANDARD
        .decode(key)
        .map_err(|err| HubError::Credential(format!("shared access key is not base64: {}", err)))?;
    let mut mac = Hmac::<Sha256>::new_from_slice(&key_bytes)
        .map_err(|err| HubError::Credential(err.to_string()))?;
    mac.update(to_sign.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    let mut token = format!(
        "SharedAccessSignature sr={}&sig={}&se={}",
        encoded_uri,
        urlencoding::encode(&signature),
        expiry_epoch_s
    );
    if let Some(policy_name) = policy_name {
        token.push_str("&skn=");
        token.push_str(policy_name);
    }
    Ok(token)
}

/// 当前时间加上有效期后的过期时间（秒）。
pub fn expiry_from_now(ttl_seconds: u64) -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .saturating_add(ttl_seconds)
}

fn parse_fields(value: &str) -> Result<HashMap<String, String>, HubError> {
    let mut fields = HashMap::new();
    for segment in value.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (key, field) = segment
            .split_once('=')
            .ok_or_else(|| HubError::Credential(format!("malformed segment: {}", segment)))?;
        fields.insert(key.trim().to_string(), field.trim().to_string());
    }
    Ok(fields)
}

fn take_field(fields: &mut HashMap<String, String>, key: &str) -> Result<String, HubError> {
    fields
        .remove(key)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| HubError::Credential(format!("missing {}", key)))
}
