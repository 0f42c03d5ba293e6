use byop_kernel::color::RainbowSource;
use byop_kernel::diagnostics::{Diagnostics, WledClient};
use byop_kernel::health::HealthTracker;
use byop_kernel::http::{build_router, AppState};
use byop_kernel::listener::TelemetryListener;
use byop_kernel::registry::{DeviceRegistry, FieldMode};
use byop_kernel::state::{new_state, SharedRegistry};
use byop_kernel::store::MemoryStore;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;

const KEY: &str = "test-key";

struct TestServer {
    base: String,
    registry: SharedRegistry,
    store: MemoryStore,
    http: reqwest::Client,
}

impl TestServer {
    async fn start() -> Self {
        let telemetry = TelemetryListener::new();
        let feed = telemetry.feed();
        let store = MemoryStore::new();
        let registry = new_state(DeviceRegistry::new(
            FieldMode::Dynamic,
            Box::new(RainbowSource::new()),
            Box::new(telemetry),
            Box::new(store.clone()),
        ));
        let diagnostics = Diagnostics::new(registry.clone(), WledClient::new(Duration::from_millis(500)).unwrap());
        let app = build_router(AppState {
            registry: registry.clone(),
            diagnostics,
            telemetry: feed,
            health: HealthTracker::new(),
            api_key: Some(KEY.into()),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        Self {
            base: format!("http://{addr}"),
            registry,
            store,
            http: reqwest::Client::builder().no_proxy().build().unwrap(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self.http.get(self.url(path)).send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, path: &str, body: &Value) -> (StatusCode, Value) {
        let response = self.http.post(self.url(path)).header("x-api-key", KEY).json(body).send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }
}

#[tokio::test]
async fn test_register_and_read_devices() {
    let server = TestServer::start().await;

    let body = json!({"x": 1.0, "y": 2.0, "host": "10.0.0.1", "pixels": [[0, 0], [1, 1]]});
    let (status, reply) = server.post("/devices", &body).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reply, json!({"id": 0}));

    let (status, _) = server.post("/devices", &json!({"x": 5.0, "y": 5.0, "host": "10.0.0.1"})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, reply) = server.post("/devices", &json!({"x": 5.0, "y": 5.0, "pixels": "nope"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(reply["error"].as_str().unwrap().contains("Couldn't parse"));

    let (status, device) = server.get("/devices/0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(device["host"], "10.0.0.1");
    assert_eq!(device["pixels"].as_array().unwrap().len(), 2);

    let (status, _) = server.get("/devices/7").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, devices) = server.get("/devices").await;
    assert_eq!(devices.as_array().unwrap().len(), 1);
    assert_eq!(server.store.records().len(), 1);
}

#[tokio::test]
async fn test_update_device() {
    let server = TestServer::start().await;
    server.post("/devices", &json!({"x": 0.0, "y": 0.0})).await;

    let response = server
        .http
        .put(server.url("/devices/0"))
        .header("x-api-key", KEY)
        .json(&json!({"x": 3.0, "y": 4.0, "pixels": [[0, 0], [2, 0], [4, 0]]}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let device: Value = response.json().await.unwrap();
    assert_eq!((device["x"].as_f64(), device["y"].as_f64()), (Some(3.0), Some(4.0)));
    assert_eq!(server.registry.lock().device(0).unwrap().pixel_count(), 3);

    let response = server
        .http
        .put(server.url("/devices/9"))
        .header("x-api-key", KEY)
        .json(&json!({"x": 0.0, "y": 0.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_api_key_guards_mutations_only() {
    let server = TestServer::start().await;

    let response = server.http.post(server.url("/devices")).json(&json!({"x": 0, "y": 0})).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = server
        .http
        .post(server.url("/devices"))
        .header("x-api-key", "wrong")
        .json(&json!({"x": 0, "y": 0}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(server.registry.lock().is_empty());

    let (status, _) = server.get("/devices").await;
    assert_eq!(status, StatusCode::OK);
    let health = server.http.get(server.url("/health")).send().await.unwrap().text().await.unwrap();
    assert_eq!(health, "ok");
}

#[tokio::test]
async fn test_fix_routes() {
    let server = TestServer::start().await;
    server.post("/devices", &json!({"x": 0, "y": 0})).await;

    let (status, _) = server.post("/devices/0/fix/reboot", &Value::Null).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server.post("/devices/0/fix/liveMode", &Value::Null).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = server.post("/devices/4/poll", &Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, health) = server.post("/devices/0/poll", &Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["up"], false);
}

#[tokio::test]
async fn test_unregistered_and_system_health() {
    let server = TestServer::start().await;
    server.post("/devices", &json!({"x": 0, "y": 0, "host": "10.0.0.1"})).await;
    {
        let mut registry = server.registry.lock();
        registry.mark_device_up("10.0.0.2");
        registry.mark_device_up("10.0.0.1");
    }

    let (_, seen) = server.get("/devices/unregistered").await;
    assert_eq!(seen.as_object().unwrap().len(), 1);
    assert_eq!(seen["10.0.0.2"]["up"], true);

    let (_, health) = server.get("/system/health").await;
    assert_eq!(health["devices_registered"], 1);
    assert_eq!(health["devices_unregistered"], 1);
    assert_eq!(health["color_source"], "demo-api");
    assert_eq!(health["discovery_status"], "disabled");
}

#[tokio::test]
async fn test_pixel_data() {
    let server = TestServer::start().await;
    server.post("/devices", &json!({"x": 0, "y": 0, "pixels": [[0, 0], [10, 0]]})).await;
    server.post("/devices", &json!({"x": 100, "y": 50})).await;
    server.registry.lock().update_pixel_colors(1_000);

    let (status, frame) = server.get("/api/pixelData").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(frame["source"], "demo-api");
    let first = &frame["devices"]["0"];
    assert_eq!(first["maxX"], 10.0);
    assert_eq!(first["pixels"].as_object().unwrap().len(), 2);
    assert_eq!(first["pixels"]["1"]["x"], 10.0);
    assert!(frame["devices"]["1"]["pixels"]["0"]["r"].is_number());
}
