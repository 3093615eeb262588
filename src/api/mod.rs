//! API Module
//!
//! Caller-facing surface of the engine:
//! - commands.rs: `Engine` context (init, batch training, file analysis, model I/O)
//! - status.rs: status and message DTOs

pub mod commands;
pub mod status;

pub use commands::{Engine, FileProgress, QueueItem, QueueTrainingSummary};
pub use status::{CommandMessage, EngineStatus, MessageStatus};
