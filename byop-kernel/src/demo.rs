use crate::registry::{DeviceRegistry, RegistryError};
use serde_json::{json, Value};
use tracing::info;

/// Deux contrôleurs de démo : un mono-pixel, un à deux pixels en diagonale.
pub fn seed_demo_devices(registry: &mut DeviceRegistry) -> Result<Vec<u32>, RegistryError> {
    let ids = vec![
        registry.register_device(0.0, 0.0, Some("192.168.1.97".into()), &Value::Null)?,
        registry.register_device(
            137_500.0,
            62_500.0,
            Some("192.168.1.98".into()),
            &json!([[0, 0], {"x": 625, "y": 625}]),
        )?,
    ];
    info!("seeded {} demo devices", ids.len());
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::RainbowSource;
    use crate::geometry::Bounds;
    use crate::listener::TelemetryListener;
    use crate::registry::FieldMode;
    use crate::store::MemoryStore;

    #[test]
    fn test_seed() {
        let mut registry = DeviceRegistry::new(
            FieldMode::Dynamic,
            Box::new(RainbowSource::new()),
            Box::new(TelemetryListener::new()),
            Box::new(MemoryStore::new()),
        );
        assert_eq!(seed_demo_devices(&mut registry).unwrap(), vec![0, 1]);
        assert_eq!(
            registry.field_bounds(),
            Some(Bounds { min_x: 0.0, max_x: 137_500.0, min_y: 0.0, max_y: 62_500.0 })
        );
        let second = registry.device(1).unwrap();
        assert_eq!(second.pixel_count(), 2);
        assert_eq!((second.pixels[1].l_x, second.pixels[1].l_y), (1.0, 1.0));
        assert_eq!((second.pixels[0].g_x, second.pixels[0].g_y), (1.0, 1.0));

        // une deuxième fois : hosts déjà pris
        assert!(matches!(seed_demo_devices(&mut registry), Err(RegistryError::DuplicateHost(_))));
    }
}
