//! nbiot-core: Core traits, types, and error definitions for the nbiot driver.
//!
//! This crate defines the modem-agnostic abstractions the rest of the
//! workspace builds on. Applications and test harnesses depend on these
//! types without pulling in a specific modem driver.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel to the modem
//! - [`RetryPolicy`] -- how long a transaction keeps retransmitting
//! - [`PowerLine`] -- which control line powers the modem
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use transport::Transport;
pub use types::*;
