//! Live Inference Service Library
//!
//! Exposes the stream coordinator and its supporting pieces for the binary
//! and for integration tests.

pub mod config;
pub mod control;
pub mod coordinator;
pub mod messages;
pub mod supervisor;

// Re-export commonly used types
pub use config::LiveInferenceConfig;
pub use control::{apply_command, spawn_control_listener, ControlCommand};
pub use coordinator::{BatchOutcome, CoordinatorStatsSnapshot, StreamCoordinator};
pub use messages::{MarketAlert, MessageError};
pub use supervisor::supervise;
