/*!
# BYOP DevKit - Outils de test pour le kernel

- `FakeWled` : faux contrôleur WLED (API JSON) sur port éphémère, avec
  pannes simulables, pour les tests d'intégration des diagnostics
*/

pub mod fake_wled;

pub use fake_wled::{FailureMode, FakeWled};
