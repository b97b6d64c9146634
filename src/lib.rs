//! candela - fault-tolerant voice control for Philips Hue lighting
//!
//! A pipelined voice-command processor: wake detection, utterance
//! capture, speech recognition with confidence gating, and command
//! dispatch against the Hue bridge, all supervised with automatic
//! restart.
//!
//! # Architecture
//!
//! ```text
//! ┌──────┐    ┌─────────┐    ┌────────────┐    ┌────────────┐
//! │ Wake ├───►│ Capture ├───►│ Recognizer ├───►│ Dispatcher │
//! └──────┘    └─────────┘    └────────────┘    └─────┬──────┘
//!    ▲             ▲               │                 │
//!    │       cooldown watch ◄──────┼─────────────────┤
//!    │             │               ▼                 ▼
//! ┌──┴─────────────┴───────── supervisor ──────┐ ┌────────┐
//! │  restart on crash / error burst            │ │ bridge │
//! └────────────────────────────────────────────┘ └────────┘
//! ```
//!
//! Each stage is its own tokio task; stages communicate only through
//! bounded channels carrying owned events.

pub mod bridge;
pub mod config;
pub mod daemon;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod feedback;
pub mod supervisor;
pub mod timer;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Recovery, Result};
