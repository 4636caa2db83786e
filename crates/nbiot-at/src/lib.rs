//! AT-command plumbing shared by NB-IoT modem drivers.
//!
//! The engine owns the transport exclusively and performs one
//! send-and-await-response transaction at a time, retransmitting the command
//! whenever the expected response has not appeared within the timeout.
//!
//! # Architecture
//!
//! - [`protocol`] -- line terminators, status patterns, and [`Response`]
//! - [`engine`] -- the [`TransactionEngine`] and its bounded response buffer
//! - [`hex`] -- ASCII-hex payload encoding for socket commands
//! - [`compose`] -- bounded assembly of parameterised command lines

pub mod compose;
pub mod engine;
pub mod hex;
pub mod protocol;

pub use compose::Composer;
pub use engine::{EngineConfig, ResponseBuffer, TransactionEngine};
pub use protocol::Response;
