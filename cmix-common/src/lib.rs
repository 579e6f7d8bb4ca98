//! # CMIX Common Library
//!
//! Shared code for the CMIX timeline mixer and anything that reads its clock:
//! - Exact rational timestamps (`Rational`)
//! - Event types (`CmixEvent` enum) and the bounded `EventBus`
//! - Configuration file loading helpers
//! - Common error type

pub mod config;
pub mod error;
pub mod events;
pub mod rational;

pub use error::{Error, Result};
pub use events::{CmixEvent, EventBus, PlayState};
pub use rational::Rational;
