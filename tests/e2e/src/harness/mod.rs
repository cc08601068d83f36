//! Test harness

mod engine_manager;

pub use engine_manager::EngineHarness;
