use crate::geometry::Bounds;
use crate::registry::FieldMode;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct KernelConfig {
    pub http: HttpConf,
    pub render: RenderConf,
    pub grid: GridConf,
    pub field: FieldConf,
    pub diagnostics: DiagnosticsConf,
    pub store: StoreConf,
    pub mqtt: Option<MqttConf>,
    pub demo_devices: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HttpConf {
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rainbow,
    Grid,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderConf {
    pub fps: u32,
    pub source: SourceKind,
}

/// Grille E1.31 entrante (source `grid`).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GridConf {
    pub rows: usize,
    pub cols: usize,
    pub universe: u16,
    pub listen: SocketAddr,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum FieldConf {
    Dynamic,
    Static { min_x: f64, max_x: f64, min_y: f64, max_y: f64 },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DiagnosticsConf {
    pub interval_secs: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StoreConf {
    pub path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MqttConf {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_discovery_topic")]
    pub topic: String,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_discovery_topic() -> String {
    "byop/discovery@v1".into()
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            http: HttpConf::default(),
            render: RenderConf::default(),
            grid: GridConf::default(),
            field: FieldConf::default(),
            diagnostics: DiagnosticsConf::default(),
            store: StoreConf::default(),
            mqtt: None,
            demo_devices: true,
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl Default for RenderConf {
    fn default() -> Self {
        Self { fps: 15, source: SourceKind::Rainbow }
    }
}

impl Default for GridConf {
    fn default() -> Self {
        Self {
            rows: 13,
            cols: 13,
            universe: 1,
            listen: SocketAddr::from(([0, 0, 0, 0], crate::e131::E131_PORT)),
        }
    }
}

impl Default for FieldConf {
    fn default() -> Self {
        FieldConf::Dynamic
    }
}

impl Default for DiagnosticsConf {
    fn default() -> Self {
        Self { interval_secs: 30, timeout_ms: 2000 }
    }
}

impl Default for StoreConf {
    fn default() -> Self {
        Self { path: PathBuf::from("./data/devices.json") }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl KernelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.render.fps == 0 {
            return Err(ConfigError::Invalid("render.fps must be > 0".into()));
        }
        if self.grid.rows == 0 || self.grid.cols == 0 {
            return Err(ConfigError::Invalid("grid.rows and grid.cols must be > 0".into()));
        }
        if let FieldMode::Static(b) = self.field_mode() {
            if !b.is_valid() {
                return Err(ConfigError::Invalid(format!("static field bounds are inverted: {b:?}")));
            }
        }
        Ok(())
    }

    pub fn field_mode(&self) -> FieldMode {
        match self.field {
            FieldConf::Dynamic => FieldMode::Dynamic,
            FieldConf::Static { min_x, max_x, min_y, max_y } => {
                FieldMode::Static(Bounds { min_x, max_x, min_y, max_y })
            }
        }
    }

    pub fn diagnostics_interval(&self) -> Duration {
        Duration::from_secs(self.diagnostics.interval_secs.max(1))
    }

    pub fn diagnostics_timeout(&self) -> Duration {
        Duration::from_millis(self.diagnostics.timeout_ms)
    }
}

/// Empty text gives the defaults.
pub fn parse_config(txt: &str) -> Result<KernelConfig, ConfigError> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    let cfg: KernelConfig = serde_yaml::from_str(txt)?;
    cfg.validate()?;
    Ok(cfg)
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("BYOP_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    if !Path::new(&path).exists() {
        info!("no {path}, using default config");
        return KernelConfig::default();
    }
    let txt = match fs::read_to_string(&path).await {
        Ok(txt) => txt,
        Err(e) => {
            warn!("could not read {path}: {e}, using default config");
            return KernelConfig::default();
        }
    };
    parse_config(&txt).unwrap_or_else(|e| {
        warn!("{path}: {e}, using default config");
        KernelConfig::default()
    })
}
