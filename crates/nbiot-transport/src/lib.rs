//! Transport implementations for the nbiot driver.
//!
//! This crate provides concrete implementations of the
//! [`Transport`](nbiot_core::Transport) trait from `nbiot-core`:
//!
//! - [`SerialTransport`]: the UART link to the modem (USB-serial adapters,
//!   on-board UARTs)
//!
//! # Example
//!
//! ```no_run
//! use nbiot_transport::SerialTransport;
//! use nbiot_core::transport::Transport;
//!
//! # async fn example() -> nbiot_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 9600).await?;
//! transport.send(b"AT+CSQ\r").await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;

pub use serial::{DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits};
