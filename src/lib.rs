//! Tank Arena simulation core
//!
//! Authoritative game-state library for a real-time multiplayer arena:
//! entity registry with replicated field groups, spatial hash grid,
//! binary wire codec, per-client delta synchronization and AI targeting.
//! The library is transport-agnostic; embedders feed raw client packets
//! in, drive `Simulation::tick`, and ship the returned update packets
//! over whatever transport they run.

pub mod config;
pub mod game;
pub mod net;
pub mod util;

pub use config::SimConfig;
pub use game::sim::{ClientId, Simulation};
