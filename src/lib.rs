//! Scenestream - per-client scene hierarchy streaming for remote rendering

pub mod core;
pub mod math;
pub mod scene;
pub mod streaming;
