//! BYOP kernel: a fleet of LED controllers driven as one field of pixels.

pub mod color;
pub mod config;
pub mod demo;
pub mod device;
pub mod diagnostics;
pub mod discovery;
pub mod e131;
pub mod geometry;
pub mod health;
pub mod http;
pub mod listener;
pub mod registry;
pub mod resolver;
pub mod state;
pub mod store;
pub mod ticker;
