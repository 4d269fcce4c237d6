//! Integration test modules for cadence
//!
//! - audio_graph: transport state, topology rebuilds, hardware events
//! - render: resampling paths and offline rendering

pub mod audio_graph;
pub mod render;
