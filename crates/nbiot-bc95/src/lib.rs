//! Quectel BC95 NB-IoT modem driver.
//!
//! This crate drives a BC95 over its AT-command UART. It provides:
//!
//! - **Command vocabulary** ([`commands`]) -- the BC95 AT commands the
//!   session issues and pure parsers for their responses.
//! - **Session** ([`modem`]) -- [`Bc95Modem`], which owns the transaction
//!   engine and the peer configuration and implements network attach, UDP
//!   datagram send, socket close, and power-line reset.
//! - **Builder** ([`builder`]) -- fluent construction of [`Bc95Modem`]
//!   sessions with the modem's defaults.
//!
//! # Example
//!
//! ```no_run
//! use nbiot_bc95::Bc95Builder;
//!
//! # async fn example() -> nbiot_core::Result<()> {
//! let mut modem = Bc95Builder::new().serial_port("/dev/ttyUSB0").build().await?;
//! modem.initialize().await?;
//! let quality = modem.connect_to_operator().await?;
//! println!("attached, signal {quality}");
//!
//! modem.set_ip_address("192.168.1.10")?;
//! modem.set_port("3005")?;
//! modem.send_datagram(b"hello").await?;
//! modem.close_connection().await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod commands;
pub mod modem;

pub use builder::Bc95Builder;
pub use modem::{Bc95Modem, SessionConfig};
