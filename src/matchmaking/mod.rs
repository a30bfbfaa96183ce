//! FIFO matchmaking
//!
//! Client connections wait in the registry; the matchmaker groups them in
//! arrival order, claims a server per group and broadcasts the outcome.

pub mod broadcaster;
pub mod connection;
pub mod former;
pub mod manager;
pub mod registry;

pub use broadcaster::MatchBroadcaster;
pub use connection::{Connection, Outbound};
pub use former::{Match, MatchFormer};
pub use manager::{Matchmaker, MatchmakerStats};
pub use registry::ConnectionRegistry;
