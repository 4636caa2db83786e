//! nbiot-test-harness: Test utilities and mock transports for the nbiot
//! driver.
//!
//! This crate provides [`MockTransport`], a scripted stand-in for a modem on
//! a serial line, and [`MockHandle`], the shared log a test keeps after the
//! transport has been moved into the engine.

pub mod mock_serial;

pub use mock_serial::{ControlLine, MockHandle, MockTransport};
