/**
 * BYOP KERNEL - Point d'entrée du serveur
 *
 * RÔLE : Assemble config, store, source couleur, listeners, registre,
 * découverte, boucles de rendu/diagnostics et API HTTP.
 *
 * ARCHITECTURE : un registre partagé, un tick couleur à fps fixe, un poll
 * diagnostics périodique, et l'API REST/WS par-dessus.
 */

use anyhow::Context;
use byop_kernel::color::{ColorSource, GridSource, RainbowSource};
use byop_kernel::config::{load_config, SourceKind};
use byop_kernel::diagnostics::{Diagnostics, WledClient};
use byop_kernel::discovery::spawn_mqtt_discovery;
use byop_kernel::e131::{bind_receiver, spawn_receiver, UdpSink};
use byop_kernel::health::HealthTracker;
use byop_kernel::http::{build_router, AppState};
use byop_kernel::listener::{CompositeListener, TelemetryListener, TransmitListener};
use byop_kernel::registry::DeviceRegistry;
use byop_kernel::resolver::spawn_resolver;
use byop_kernel::state::new_state;
use byop_kernel::store::{spawn_store_writer, JsonFileStore};
use byop_kernel::{demo, ticker};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("byop_kernel=info")))
        .init();

    let cfg = load_config().await;
    let health = HealthTracker::new();

    let store = JsonFileStore::open(&cfg.store.path)
        .with_context(|| format!("opening device store {}", cfg.store.path.display()))?;
    let (store, store_task) = spawn_store_writer(Box::new(store)).context("loading device store")?;

    // source couleur (+ récepteur E1.31 en mode grille)
    let source: Box<dyn ColorSource> = match cfg.render.source {
        SourceKind::Rainbow => Box::new(RainbowSource::new()),
        SourceKind::Grid => {
            let grid = GridSource::new(cfg.grid.rows, cfg.grid.cols);
            let socket = bind_receiver(cfg.grid.listen, cfg.grid.universe)
                .await
                .with_context(|| format!("binding sACN receiver on {}", cfg.grid.listen))?;
            spawn_receiver(socket, cfg.grid.universe, grid.feed(), health.clone());
            Box::new(grid)
        }
    };

    let telemetry = TelemetryListener::new();
    let telemetry_feed = telemetry.feed();
    let sink = UdpSink::bind().context("binding sACN output socket")?;
    spawn_resolver(sink.hosts());
    let listener = CompositeListener::new(vec![Box::new(telemetry), Box::new(TransmitListener::new(sink))]);

    let mut registry = DeviceRegistry::new(cfg.field_mode(), source, Box::new(listener), Box::new(store));
    if let Err(e) = registry.restore() {
        warn!("could not restore devices: {e}");
    }
    if registry.is_empty() && cfg.demo_devices {
        demo::seed_demo_devices(&mut registry).context("seeding demo devices")?;
    }
    info!("{} devices registered, color source {}", registry.len(), registry.source_label());
    let registry = new_state(registry);

    match cfg.mqtt.clone() {
        Some(mqtt) => {
            spawn_mqtt_discovery(mqtt, registry.clone(), health.clone());
        }
        None => info!("no mqtt section, discovery disabled"),
    }

    let client = WledClient::new(cfg.diagnostics_timeout()).context("building diagnostics HTTP client")?;
    let diagnostics = Diagnostics::new(registry.clone(), client);

    ticker::spawn_pixel_loop(registry.clone(), cfg.render.fps, health.clone());
    ticker::spawn_diagnostics_loop(diagnostics.clone(), cfg.diagnostics_interval());

    let api_key = std::env::var("BYOP_API_KEY").ok().filter(|k| !k.is_empty());
    if api_key.is_none() {
        warn!("BYOP_API_KEY not set, mutating routes are open");
    }
    let app = build_router(AppState {
        registry: registry.clone(),
        diagnostics,
        telemetry: telemetry_feed,
        health,
        api_key,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http.port));
    let listener = TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    info!("listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    registry.lock().shutdown();
    if let Err(e) = store_task.await {
        warn!("device store writer did not finish: {e}");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("ctrl-c handler failed: {e}");
    }
    info!("shutting down");
}
