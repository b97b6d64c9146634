//! Device bridge boundary
//!
//! The dispatcher talks to lights only through [`LightBridge`], so
//! tests can swap the Hue implementation for a mock.

pub mod hue;

use std::collections::HashMap;

use async_trait::async_trait;

pub use hue::HueBridge;

use crate::Result;

/// What a light can actually do, reported by the bridge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Supports dimming
    pub brightness: bool,
    /// Supports color (xy gamut)
    pub color: bool,
}

/// Handle to one light
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightInfo {
    /// Bridge-assigned identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Declared capabilities
    pub capabilities: Capabilities,
}

/// Current state of one light
#[derive(Debug, Clone, PartialEq)]
pub struct LightState {
    /// Powered on
    pub on: bool,
    /// Brightness in [1, 254], absent if unsupported
    pub brightness: Option<u8>,
    /// Color as xy coordinates, absent if unsupported
    pub color: Option<(f64, f64)>,
}

/// Partial state change; unset fields are left untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LightUpdate {
    /// Set power
    pub on: Option<bool>,
    /// Set brightness in [1, 254]
    pub brightness: Option<u8>,
    /// Set color as xy coordinates
    pub color: Option<(f64, f64)>,
}

impl LightUpdate {
    /// Update that only sets power
    #[must_use]
    pub const fn power(on: bool) -> Self {
        Self {
            on: Some(on),
            brightness: None,
            color: None,
        }
    }

    /// Update that powers on at a given brightness
    #[must_use]
    pub const fn on_at(brightness: u8) -> Self {
        Self {
            on: Some(true),
            brightness: Some(brightness),
            color: None,
        }
    }
}

/// Network boundary to the lighting bridge
#[async_trait]
pub trait LightBridge: Send + Sync {
    /// Enumerate lights, keyed by name
    ///
    /// # Errors
    ///
    /// Returns error if the bridge is unreachable or responds badly
    async fn list_lights(&self) -> Result<HashMap<String, LightInfo>>;

    /// Fetch the current state of one light
    ///
    /// # Errors
    ///
    /// Returns error if the bridge is unreachable or responds badly
    async fn get_state(&self, id: &str) -> Result<LightState>;

    /// Apply a partial state change to one light
    ///
    /// # Errors
    ///
    /// Returns error if the bridge rejects or fails the update
    async fn apply(&self, id: &str, update: &LightUpdate) -> Result<()>;
}
