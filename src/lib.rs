//! AdCue — VAST/VPAID ad insertion controller for media players
//!
//! Loads ad breaks from VAST ad servers, sequences them against a host
//! player and reports playback through tracking beacons. The host supplies
//! the rendering surfaces (player, companion slot, VPAID sandbox); this
//! crate owns scheduling, selection, sequencing and tracking.

pub mod ad;
pub mod config;
pub mod error;
pub mod metrics;
pub mod player;
pub mod plugin;
pub mod schedule;
pub mod sequencer;
pub mod tracker;
pub mod ui;
pub mod vast;
pub mod vpaid;

pub use error::{AdCueError, Result};
pub use plugin::VastPlugin;
