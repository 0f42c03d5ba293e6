/*!
Faux contrôleur WLED pour les tests d'intégration

Sert `GET /json/info`, `GET /json/cfg` et `POST /json/cfg` sur un port
éphémère de 127.0.0.1. Les POST sont fusionnés dans la config et
enregistrés pour les assertions. Les pannes sont simulées via `FailureMode`.
*/

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    #[default]
    None,
    /// Toutes les routes répondent 500.
    ServerError,
    /// POST /json/cfg répond `{"success": false}`.
    RejectConfig,
}

struct DeviceState {
    info: Value,
    cfg: Value,
    posts: Vec<Value>,
    failure: FailureMode,
}

type SharedDevice = Arc<Mutex<DeviceState>>;

pub struct FakeWled {
    addr: SocketAddr,
    state: SharedDevice,
    shutdown: Option<oneshot::Sender<()>>,
}

impl FakeWled {
    /// Démarre un contrôleur sain : `leds` LEDs sur une sortie, réception
    /// E1.31 activée sur 5568 dans le mode DMX qui correspond.
    pub async fn start(leds: u32) -> Result<Self> {
        env_logger::builder().is_test(true).try_init().ok();

        let dmx_mode = if leds == 1 { 1 } else { 4 };
        let state = Arc::new(Mutex::new(DeviceState {
            info: json!({"live": true, "leds": {"count": leds}, "wifi": {"signal": 80}}),
            cfg: json!({
                "if": {"live": {"en": true, "port": 5568, "dmx": {"mode": dmx_mode}}},
                "hw": {"led": {"ins": [{"pin": [2], "len": leds}]}}
            }),
            posts: Vec::new(),
            failure: FailureMode::None,
        }));

        let app = Router::new()
            .route("/json/info", get(get_info))
            .route("/json/cfg", get(get_cfg).post(post_cfg))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                rx.await.ok();
            });
            if let Err(e) = server.await {
                log::warn!("fake WLED on {addr} stopped: {e}");
            }
        });
        log::info!("fake WLED with {leds} LEDs on {addr}");

        Ok(Self { addr, state, shutdown: Some(tx) })
    }

    /// `host:port`, tel qu'on l'enregistre dans le kernel.
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn set_info(&self, info: Value) {
        self.state.lock().info = info;
    }

    pub fn info(&self) -> Value {
        self.state.lock().info.clone()
    }

    pub fn set_cfg(&self, cfg: Value) {
        self.state.lock().cfg = cfg;
    }

    pub fn cfg(&self) -> Value {
        self.state.lock().cfg.clone()
    }

    /// Corps des POST /json/cfg reçus, dans l'ordre.
    pub fn posts(&self) -> Vec<Value> {
        self.state.lock().posts.clone()
    }

    pub fn set_failure(&self, failure: FailureMode) {
        self.state.lock().failure = failure;
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
    }
}

impl Drop for FakeWled {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn get_info(State(state): State<SharedDevice>) -> Response {
    let device = state.lock();
    if device.failure == FailureMode::ServerError {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(device.info.clone()).into_response()
}

async fn get_cfg(State(state): State<SharedDevice>) -> Response {
    let device = state.lock();
    if device.failure == FailureMode::ServerError {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(device.cfg.clone()).into_response()
}

async fn post_cfg(State(state): State<SharedDevice>, Json(body): Json<Value>) -> Response {
    let mut device = state.lock();
    device.posts.push(body.clone());
    match device.failure {
        FailureMode::ServerError => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        FailureMode::RejectConfig => return Json(json!({"success": false})).into_response(),
        FailureMode::None => {}
    }

    merge(&mut device.cfg, body);
    // le vrai firmware recompte ses LEDs après reconfiguration
    let count: u64 = device.cfg["hw"]["led"]["ins"]
        .as_array()
        .map(|ins| ins.iter().filter_map(|i| i["len"].as_u64()).sum())
        .unwrap_or(0);
    device.info["leds"]["count"] = json!(count);
    Json(json!({"success": true})).into_response()
}

/// Fusion récursive des objets, remplacement pour tout le reste.
fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                merge(target.entry(key).or_insert(Value::Null), value);
            }
        }
        (target, patch) => *target = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge() {
        let mut cfg = json!({"if": {"live": {"en": false, "port": 0}}, "hw": {"led": {"ins": [1, 2]}}});
        merge(&mut cfg, json!({"if": {"live": {"en": true}}, "hw": {"led": {"ins": [3]}}}));
        assert_eq!(cfg, json!({"if": {"live": {"en": true, "port": 0}}, "hw": {"led": {"ins": [3]}}}));
    }

    #[tokio::test]
    async fn test_serves_and_records() {
        let mut wled = FakeWled::start(3).await.unwrap();
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        let base = format!("http://{}", wled.host());

        let info: Value = http.get(format!("{base}/json/info")).send().await.unwrap().json().await.unwrap();
        assert_eq!(info["leds"]["count"], 3);

        let body = json!({"hw": {"led": {"ins": [{"pin": [2], "len": 5}]}}});
        let reply: Value = http.post(format!("{base}/json/cfg")).json(&body).send().await.unwrap().json().await.unwrap();
        assert_eq!(reply["success"], true);
        assert_eq!(wled.posts(), vec![body]);
        assert_eq!(wled.info()["leds"]["count"], 5);
        assert_eq!(wled.cfg()["if"]["live"]["port"], 5568);

        wled.set_failure(FailureMode::ServerError);
        let status = http.get(format!("{base}/json/cfg")).send().await.unwrap().status();
        assert_eq!(status, 500);

        wled.set_failure(FailureMode::RejectConfig);
        let reply: Value = http.post(format!("{base}/json/cfg")).json(&json!({})).send().await.unwrap().json().await.unwrap();
        assert_eq!(reply["success"], false);

        wled.stop();
    }
}
