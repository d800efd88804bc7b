//! Core library for the unattended segment broadcast.
//!
//! Segment discovery, asset loading, and line-by-line playback live here.
//! The `showrunner` CLI and any presentation layer consume this crate through
//! `ShowRunner`, its `ShowHandle`, and the notification buses.

pub mod audio;
pub mod bus;
pub mod clip;
pub mod clock;
pub mod config;
pub mod error;
pub mod loader;
pub mod segment;
pub mod segment_index;
pub mod sequencer;
pub mod show;
pub mod state;

pub use error::{Result, ShowError};
pub use show::{ShowHandle, ShowRunner};

#[cfg(test)]
#[path = "../tests/common/mod.rs"]
mod fixtures;
