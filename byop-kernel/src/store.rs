/**
 * DEVICE STORE - Persistance des devices enregistrés
 *
 * RÔLE :
 * Sauvegarde les devices (id, position, host, pixels) pour les restaurer
 * au redémarrage. Les infos de santé et les findings ne sont jamais stockés.
 *
 * FONCTIONNEMENT :
 * - DeviceStore trait = load / save / shutdown, injecté dans le registre
 * - JsonFileStore = tableau JSON indenté sur disque, upsert par id
 * - MemoryStore = même contrat en mémoire, pour les tests
 * - StoreWriter = façade non bloquante : le registre dépose les
 *   enregistrements sous son verrou, une tâche les écrit sur le pool bloquant
 */

use crate::device::Device;
use crate::state::{new_state, Shared};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store writer has stopped")]
    Closed,
}

/// Forme persistée d'un device. Les pixels restent en JSON brut : ils
/// repassent par le parseur au chargement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: u32,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub pixels: Value,
}

impl From<&Device> for DeviceRecord {
    fn from(device: &Device) -> Self {
        let pixels = device.pixels.iter().map(|p| serde_json::json!([p.x, p.y])).collect();
        Self {
            id: device.id,
            x: device.x,
            y: device.y,
            host: device.host.clone(),
            pixels: Value::Array(pixels),
        }
    }
}

pub trait DeviceStore: Send {
    fn load(&self) -> Result<Vec<DeviceRecord>, StoreError>;

    /// Insert or replace the record with the same id.
    fn save(&mut self, record: &DeviceRecord) -> Result<(), StoreError>;

    fn shutdown(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub struct JsonFileStore {
    path: PathBuf,
    records: Vec<DeviceRecord>,
}

impl JsonFileStore {
    /// Opens the store, reading any existing file. Entries that do not
    /// deserialize are logged and left out.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let records = read_records(&path)?;
        info!("device store at {:?} ({} records)", path, records.len());
        Ok(Self { path, records })
    }

    fn save_to_disk(&self) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&self.records)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

fn read_records(path: &Path) -> Result<Vec<DeviceRecord>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<Value> = serde_json::from_str(&content)?;
    let records = entries
        .into_iter()
        .enumerate()
        .filter_map(|(i, entry)| match serde_json::from_value::<DeviceRecord>(entry) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("skipping stored device #{i}: {e}");
                None
            }
        })
        .collect();
    Ok(records)
}

fn upsert(records: &mut Vec<DeviceRecord>, record: &DeviceRecord) {
    match records.iter_mut().find(|r| r.id == record.id) {
        Some(existing) => *existing = record.clone(),
        None => records.push(record.clone()),
    }
}

impl DeviceStore for JsonFileStore {
    fn load(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        Ok(self.records.clone())
    }

    fn save(&mut self, record: &DeviceRecord) -> Result<(), StoreError> {
        upsert(&mut self.records, record);
        self.save_to_disk()
    }

    fn shutdown(&mut self) -> Result<(), StoreError> {
        self.save_to_disk()?;
        info!("device store flushed to {:?}", self.path);
        Ok(())
    }
}

enum StoreCommand {
    Save(DeviceRecord),
    Shutdown,
}

/// Store handed to the registry in production. `save` only queues the
/// record; the task from [`spawn_store_writer`] runs the wrapped store's
/// IO on tokio's blocking pool, in order.
pub struct StoreWriter {
    initial: Vec<DeviceRecord>,
    commands: mpsc::UnboundedSender<StoreCommand>,
}

/// Loads `store` once, then moves it into the writer task. The task ends
/// after the shutdown command, or when every `StoreWriter` is dropped.
pub fn spawn_store_writer(store: Box<dyn DeviceStore>) -> Result<(StoreWriter, JoinHandle<()>), StoreError> {
    let initial = store.load()?;
    let (commands, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let mut store = store;
        while let Some(command) = rx.recv().await {
            let last = matches!(command, StoreCommand::Shutdown);
            let done = tokio::task::spawn_blocking(move || {
                let result = match &command {
                    StoreCommand::Save(record) => store.save(record),
                    StoreCommand::Shutdown => store.shutdown(),
                };
                (store, result)
            })
            .await;
            match done {
                Ok((returned, result)) => {
                    store = returned;
                    if let Err(e) = result {
                        warn!("device store write failed: {e}");
                    }
                }
                Err(e) => {
                    warn!("device store writer panicked: {e}");
                    return;
                }
            }
            if last {
                return;
            }
        }
    });
    Ok((StoreWriter { initial, commands }, handle))
}

impl DeviceStore for StoreWriter {
    fn load(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        Ok(self.initial.clone())
    }

    fn save(&mut self, record: &DeviceRecord) -> Result<(), StoreError> {
        self.commands.send(StoreCommand::Save(record.clone())).map_err(|_| StoreError::Closed)
    }

    fn shutdown(&mut self) -> Result<(), StoreError> {
        self.commands.send(StoreCommand::Shutdown).map_err(|_| StoreError::Closed)
    }
}

/// In-memory store. Clones share the same records, so a test can keep a
/// handle after giving the store to the registry.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Shared<Vec<DeviceRecord>>,
    shut_down: Shared<bool>,
    fail_saves: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<DeviceRecord>) -> Self {
        Self { records: new_state(records), ..Self::default() }
    }

    /// Store whose every save fails with an IO error.
    pub fn failing() -> Self {
        Self { fail_saves: true, ..Self::default() }
    }

    pub fn records(&self) -> Vec<DeviceRecord> {
        self.records.lock().clone()
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shut_down.lock()
    }
}

impl DeviceStore for MemoryStore {
    fn load(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        Ok(self.records())
    }

    fn save(&mut self, record: &DeviceRecord) -> Result<(), StoreError> {
        if self.fail_saves {
            return Err(StoreError::Io(std::io::Error::other("store unavailable")));
        }
        upsert(&mut self.records.lock(), record);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), StoreError> {
        *self.shut_down.lock() = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::PixelLocation;
    use serde_json::json;

    fn record(id: u32, host: &str) -> DeviceRecord {
        DeviceRecord { id, x: 1.0, y: 2.0, host: Some(host.into()), pixels: json!([[0, 0], [1, 1]]) }
    }

    #[test]
    fn test_record_from_device() {
        let device = Device::new(
            7,
            3.0,
            4.0,
            Some("10.0.0.7".into()),
            vec![PixelLocation::new(0.0, 0.0), PixelLocation::new(625.0, 625.0)],
        );
        let r = DeviceRecord::from(&device);
        assert_eq!(r.id, 7);
        assert_eq!(r.host.as_deref(), Some("10.0.0.7"));
        assert_eq!(r.pixels, json!([[0.0, 0.0], [625.0, 625.0]]));
    }

    #[test]
    fn test_json_store_upserts_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("devices.json");

        let mut store = JsonFileStore::open(&path).unwrap();
        assert!(store.load().unwrap().is_empty());
        store.save(&record(0, "a")).unwrap();
        store.save(&record(1, "b")).unwrap();
        let mut moved = record(0, "a");
        moved.x = 42.0;
        store.save(&moved).unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        let records = reopened.load().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].x, 42.0);
        assert_eq!(records[1].host.as_deref(), Some("b"));
    }

    #[test]
    fn test_json_store_skips_bad_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        fs::write(&path, r#"[{"id": 3, "x": 0, "y": 0, "host": "h"}, {"x": "nope"}]"#).unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        let records = store.load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].pixels, Value::Null);
    }

    #[test]
    fn test_memory_store_handles_share_state() {
        let handle = MemoryStore::new();
        let mut store: Box<dyn DeviceStore> = Box::new(handle.clone());
        store.save(&record(0, "a")).unwrap();
        store.shutdown().unwrap();
        assert_eq!(handle.records().len(), 1);
        assert!(handle.is_shut_down());

        assert!(MemoryStore::failing().save(&record(0, "a")).is_err());
    }

    /// Store whose saves wait for the test to open the gate.
    struct GatedStore {
        gate: std::sync::mpsc::Receiver<()>,
        inner: MemoryStore,
    }

    impl DeviceStore for GatedStore {
        fn load(&self) -> Result<Vec<DeviceRecord>, StoreError> {
            self.inner.load()
        }

        fn save(&mut self, record: &DeviceRecord) -> Result<(), StoreError> {
            self.gate.recv().ok();
            self.inner.save(record)
        }

        fn shutdown(&mut self) -> Result<(), StoreError> {
            self.inner.shutdown()
        }
    }

    #[tokio::test]
    async fn test_writer_does_not_wait_for_io() {
        let memory = MemoryStore::with_records(vec![record(0, "a")]);
        let (open_gate, gate) = std::sync::mpsc::channel();
        let (mut writer, task) = spawn_store_writer(Box::new(GatedStore { gate, inner: memory.clone() })).unwrap();
        assert_eq!(writer.load().unwrap(), vec![record(0, "a")]);

        // le store est bloqué, save rend la main quand même
        writer.save(&record(1, "b")).unwrap();
        writer.save(&record(2, "c")).unwrap();
        assert_eq!(memory.records().len(), 1);

        open_gate.send(()).unwrap();
        open_gate.send(()).unwrap();
        writer.shutdown().unwrap();
        task.await.unwrap();

        let hosts: Vec<_> = memory.records().into_iter().filter_map(|r| r.host).collect();
        assert_eq!(hosts, vec!["a", "b", "c"]);
        assert!(memory.is_shut_down());
        assert!(matches!(writer.save(&record(3, "d")), Err(StoreError::Closed)));
    }

    #[tokio::test]
    async fn test_writer_persists_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        let (mut writer, task) = spawn_store_writer(Box::new(JsonFileStore::open(&path).unwrap())).unwrap();
        writer.save(&record(0, "a")).unwrap();
        writer.shutdown().unwrap();
        task.await.unwrap();

        let records = JsonFileStore::open(&path).unwrap().load().unwrap();
        assert_eq!(records, vec![record(0, "a")]);
    }
}
