//! Integration tests for cadence
//!
//! Everything runs on the dummy backend, whose devices play and record in real time,
//! so tests that wait on the play head take a few hundred milliseconds.
//!
//! Test categories:
//! - Audio graph: transport, rebuilds, device selection and recovery
//! - Render: format conversion end to end, rendering to WAV
//!
//! Run with:
//! ```bash
//! cargo test -p cadence --test integration_tests
//! ```

mod helpers;
mod integration;
