//! Inference worker: the thread hosting the engine and its coordinator.

pub mod coordinator;
mod host;
pub mod protocol;

pub use coordinator::{Lifecycle, RemoveOutcome, TerminationReason, WorkerCoordinator};
pub use protocol::{WorkerCommand, WorkerFault, WorkerReply};
