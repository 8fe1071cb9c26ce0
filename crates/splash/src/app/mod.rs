//! Window, input and frame loop for the splash effect.

pub mod runner;

pub use runner::{key_action, run, KeyAction};
