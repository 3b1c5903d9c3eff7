//! Loading and render lifecycle for an interactive 3D character.
//!
//! A [`SceneController`] probes the host for 3D support, loads the character
//! with progress, slow-load and timeout handling, drives the gaze-following
//! render loop once it is ready, and releases every resource it acquired on
//! retry, unmount or drop.

pub mod animation;
pub mod asset;
pub mod capability;
pub mod config;
pub mod controller;
pub mod frame;
pub mod input;
pub mod lifecycle;
pub mod loader;
pub mod pointer;
pub mod progress;
pub mod scene;
pub mod state;
pub mod surface;
pub mod timers;

pub mod demo;
pub mod gpu;

#[cfg(not(target_arch = "wasm32"))]
pub mod app;
#[cfg(target_arch = "wasm32")]
pub mod web;

#[cfg(test)]
pub(crate) mod testing;

pub use capability::{CapabilityProbe, CapabilityTier};
pub use config::{DeviceClass, SceneConfig};
pub use controller::{SceneController, SceneError, SceneHost};
pub use lifecycle::TeardownReport;
pub use loader::{AttemptId, CharacterLoader, LoadError, LoadReporter};
pub use state::{DisplayState, FailureReason, LoadState};
pub use surface::{RenderBackend, SurfaceProvider, Viewport};

/// Installs the logger for the current target. Later calls are ignored.
pub fn init_logging() {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "wasm32")] {
            std::panic::set_hook(Box::new(console_error_panic_hook::hook));
            if console_log::init_with_level(log::Level::Debug).is_err() {
                log::debug!("logger already installed");
            }
        } else {
            if env_logger::try_init().is_err() {
                log::debug!("logger already installed");
            }
        }
    }
}

/// Opens the desktop demo window and runs until it is closed.
#[cfg(not(target_arch = "wasm32"))]
pub fn run() {
    init_logging();
    if let Err(error) = app::run() {
        log::error!("{error}");
    }
}
