//! Real-time pad sequencer core.
//!
//! A look-ahead [`clock::PrecisionClock`] schedules step events against the
//! audio output's own clock, the [`pipeline::StepDispatcher`] turns them into
//! note batches from the [`pipeline::PatternStore`], and the
//! [`trigger::SoundTrigger`] plays those as voices on an [`audio`] engine.
//! [`session::Session`] wires one of each together for a host loop.

pub mod audio;
pub mod audio_api;
pub mod clock;
pub mod config;
pub mod error;
pub mod loader;
pub mod midi;
pub mod pipeline;
pub mod samples;
pub mod session;
pub mod shared;
pub mod trigger;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{Error, Result};
pub use session::Session;
