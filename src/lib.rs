//! Counts repetitive activities. Every counter has a label, a color and a number of points, and
//! can be bumped from the terminal or through a global hotkey handled by a background daemon.
//! The weighted sum of all counters is reported together with the progress towards the next
//! hundred points.

pub mod cli;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod fs;
pub mod hotkey;
pub mod storage;
pub mod utils;

pub use error::{Error, Result};
