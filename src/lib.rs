//! Inferno - a Vulkan rendering backend
//!
//! The library owns everything between a window handle and a presented
//! frame; the `inferno` binary drives it from a winit event loop.

pub mod backend;
pub mod config;
pub mod logging;

pub use backend::Backend;
pub use config::Config;
