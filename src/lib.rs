//! Embeddable coordination store.
//!
//! `distro-store` stands up a clustered node of a wrapped cluster engine,
//! exposes its strongly consistent key/value store and membership roster,
//! and turns key-space and roster changes into events delivered to
//! registered channels.
//!
//! The engine itself is reached through the traits in [`engine`];
//! [`engine::memory`] implements them in-process.
mod config;
mod errors;
mod event;
mod listener;
mod store;
mod watch;

pub mod engine;
pub mod metrics;
pub mod utils;

pub use config::*;
pub use engine::EngineError;
pub use errors::*;
pub use event::*;
pub use listener::*;
pub use store::*;


//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
