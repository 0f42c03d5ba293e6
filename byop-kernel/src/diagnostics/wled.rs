//! Client for the controllers' JSON API (`/json/info`, `/json/cfg`).
//!
//! Documents are parsed leniently: every field the kernel does not need is
//! ignored and missing ones take their zero value.

use super::classify::{DmxMode, RemoteStatus};
use super::DiagnosticsError;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WledInfo {
    #[serde(default)]
    pub live: bool,
    #[serde(default)]
    pub leds: LedsInfo,
    #[serde(default)]
    pub wifi: WifiInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedsInfo {
    #[serde(default)]
    pub count: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WifiInfo {
    #[serde(default)]
    pub signal: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WledCfg {
    #[serde(rename = "if", default)]
    pub interfaces: InterfacesCfg,
    #[serde(default)]
    pub hw: HardwareCfg,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterfacesCfg {
    #[serde(default)]
    pub live: LiveCfg,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LiveCfg {
    #[serde(default)]
    pub en: bool,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub dmx: DmxCfg,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DmxCfg {
    #[serde(default)]
    pub mode: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HardwareCfg {
    #[serde(default)]
    pub led: LedCfg,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedCfg {
    #[serde(default)]
    pub ins: Vec<LedInput>,
}

/// Une sortie physique. `pin` est renvoyé tel quel lors d'une correction.
#[derive(Debug, Clone, Deserialize)]
pub struct LedInput {
    #[serde(default)]
    pub pin: Value,
    #[serde(default)]
    pub len: u32,
}

#[derive(Debug, Deserialize)]
struct PostResponse {
    #[serde(default)]
    success: bool,
}

pub fn remote_status(info: &WledInfo, cfg: &WledCfg) -> RemoteStatus {
    let live = &cfg.interfaces.live;
    RemoteStatus {
        live: info.live,
        led_count: info.leds.count,
        wifi_signal: info.wifi.signal,
        receive_enabled: live.en,
        receive_port: live.port,
        dmx_mode: DmxMode::from_wled(live.dmx.mode),
    }
}

#[derive(Clone)]
pub struct WledClient {
    http: reqwest::Client,
}

impl WledClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("byop-kernel")
            .no_proxy()
            .build()?;
        Ok(Self { http })
    }

    fn url(host: &str, path: &str) -> String {
        format!("http://{host}{path}")
    }

    pub async fn info(&self, host: &str) -> Result<WledInfo, DiagnosticsError> {
        self.get_json(host, "/json/info").await
    }

    pub async fn cfg(&self, host: &str) -> Result<WledCfg, DiagnosticsError> {
        self.get_json(host, "/json/cfg").await
    }

    /// Both documents, fetched concurrently.
    pub async fn status(&self, host: &str) -> Result<RemoteStatus, DiagnosticsError> {
        let (info, cfg) = tokio::join!(self.info(host), self.cfg(host));
        Ok(remote_status(&info?, &cfg?))
    }

    /// POST a partial config. The device answers `{"success": bool}`.
    pub async fn post_cfg(&self, host: &str, body: &Value) -> Result<(), DiagnosticsError> {
        let response = self
            .http
            .post(Self::url(host, "/json/cfg"))
            .json(body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| unreachable(host, e))?;
        let reply: PostResponse = response.json().await.map_err(|e| unreachable(host, e))?;
        if reply.success {
            Ok(())
        } else {
            Err(DiagnosticsError::Rejected(host.to_string()))
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, host: &str, path: &str) -> Result<T, DiagnosticsError> {
        let response = self
            .http
            .get(Self::url(host, path))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| unreachable(host, e))?;
        response.json().await.map_err(|e| unreachable(host, e))
    }
}

fn unreachable(host: &str, e: reqwest::Error) -> DiagnosticsError {
    DiagnosticsError::Unreachable { host: host.to_string(), reason: e.to_string() }
}
