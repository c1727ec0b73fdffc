//! # Simkernel
//!
//! A deterministic discrete-event simulation kernel for Rust.
//!
//! Simkernel provides the engine that model code (queues, resources, agents)
//! is built on. Model logic is written as compositions of *actions*, units
//! of suspension that resolve as succeeded or failed, and the engine
//! resolves them one simulated instant at a time.
//!
//! ## Core Concepts
//!
//! - **Actions**: `Delay`, `Request`, `Listener`/`Signal`, and the
//!   combinators `Sequence`, `And`, `Or`, `Xor`, `Not`, `Repeat`, `Unless`,
//!   `Callback` and `Observer`. A `Chain` drives a resumable body that yields
//!   one child action at a time.
//! - **Schedule & Clock**: future events are filed into priority-ordered
//!   instants; the clock jumps from instant to instant, optionally capped,
//!   quantized, or paced against wall-clock time.
//! - **Entities**: each entity has a thread (one root action at a time) and
//!   a place in a named hierarchy. Model code plugs in a `Behavior`.
//! - **Determinism**: every tie-break draws from a seeded `ChaCha8Rng`, so
//!   the same seed replays the same run exactly.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use simkernel::prelude::*;
//!
//! struct Ticker;
//!
//! impl Behavior for Ticker {
//!     fn initialize(&mut self, sim: &mut Simulator, _me: EntityId) -> SimResult<Option<Act>> {
//!         let tick = sim.delay(1.0)?;
//!         Ok(Some(sim.repeat(tick, 10)?.into()))
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut sim = Simulator::new(SimConfig::default());
//!     sim.spawn("ticker", Ticker)?;
//!     let report = sim.single_run(Some(100.0), Some(42))?;
//!     println!("{} instants, ended at t={}", report.instants.len(), report.end_time);
//!     Ok(())
//! }
//! ```

pub const ENGINE_NAME: &str = "Simkernel";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Declare all the modules in the crate.
pub mod action;
pub mod clock;
pub mod common;
pub mod components;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod schedule;
pub mod stack;


/// A prelude module for easy importing of the most common Simkernel types.
pub mod prelude {
    pub use crate::action::{Act, Body, Hooks, Mode, Resume, Step, Tally};
    pub use crate::clock::{Advance, Clock};
    pub use crate::common::{
        ActionId, ChannelId, EntityId, EventId, Phase, Priority, Status, Time, Value,
    };
    pub use crate::components::{Behavior, Component, Container, Thread};
    pub use crate::config::SimConfig;
    pub use crate::engine::Simulator;
    pub use crate::error::{SimError, SimResult};
    pub use crate::events::{EngineState, FiredEvent, InstantRecord, RunReport};
    pub use crate::stack::{Activation, Stack, TraceSink};
}
