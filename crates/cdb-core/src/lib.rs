//! Core domain + application logic for the commenter diff bot.
//!
//! The crate is transport-agnostic. Telegram and the X API live behind ports
//! (traits) implemented in adapter crates.

pub mod collector;
pub mod config;
pub mod diff;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod machine;
pub mod messaging;
pub mod normalizer;
pub mod rate_limit;
pub mod session;
pub mod source;

pub use errors::{Error, Result};
