use crate::registry::DeviceRegistry;
use parking_lot::Mutex;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

/// Le registre, partagé entre le tick de rendu, les diagnostics, la
/// découverte et l'API HTTP. Jamais verrouillé à travers un `.await`.
pub type SharedRegistry = Shared<DeviceRegistry>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
