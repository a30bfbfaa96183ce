//! Dedicated-server side of the lifecycle: drain handling and the runner

pub mod drain;
pub mod server;

pub use drain::{DrainCoordinator, ShutdownSequence};
pub use server::DedicatedServer;
