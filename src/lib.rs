//! Core library for the XL2 measurement rig.
//!
//! An NTi XL2 audio analyzer and a GPS receiver hang off serial ports of unknown
//! identity. This crate finds them, proves which port is which, holds a live
//! protocol session with the analyzer and keeps pulling spectra from it.
//!
//! # Layout
//!
//! - [`hardware`]: port enumeration, async serial links, simulated devices
//! - [`discovery`]: platform filtering, confidence scoring, concurrent probing, caching
//! - [`protocol`]: XL2 command set, reply parsing, XL2 and GPS sessions
//! - [`orchestrator`]: discover, connect and finalize at startup and on demand
//! - [`events`]: the typed events the core emits and the sinks that receive them
//! - [`rig`]: wires everything together from [`config::Settings`]

pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod hardware;
pub mod logging;
pub mod measurement;
pub mod orchestrator;
pub mod protocol;
pub mod rig;

pub use error::{ApiError, RigError, RigResult};
pub use rig::Rig;
