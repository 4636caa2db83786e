//! # nbiot -- Asynchronous NB-IoT modem driver
//!
//! `nbiot` drives NB-IoT cellular modems over their AT-command serial
//! interface: attach to the operator's network, send UDP datagrams, close
//! sockets, and power-cycle the modem through a serial control line.
//!
//! ## Quick Start
//!
//! ```no_run
//! use nbiot::bc95::Bc95Builder;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut modem = Bc95Builder::new()
//!         .serial_port("/dev/ttyUSB0")
//!         .build()
//!         .await?;
//!
//!     modem.initialize().await?;
//!     let quality = modem.connect_to_operator().await?;
//!     println!("signal: {quality}");
//!
//!     modem.set_ip_address("192.168.1.10")?;
//!     modem.set_port("3005")?;
//!     modem.send_datagram(b"hello").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                | Purpose                                              |
//! |----------------------|------------------------------------------------------|
//! | `nbiot-core`         | [`Transport`] trait, shared types, [`Error`]         |
//! | `nbiot-transport`    | Serial transport                                     |
//! | `nbiot-at`           | Transaction engine, hex codec, command composer      |
//! | `nbiot-bc95`         | Quectel BC95 session and builder                     |
//! | **`nbiot`**          | This facade crate -- re-exports everything           |
//!
//! ## Feature Flags
//!
//! | Feature | Enables                      | Default |
//! |---------|------------------------------|---------|
//! | `bc95`  | [`bc95`] module (BC95 modem) | yes     |
//!
//! ## Retries
//!
//! By default a transaction retransmits its command after every timeout
//! until the expected response arrives, which blocks forever on a modem
//! that never answers. Pass a [`RetryPolicy::Bounded`] to the builder to
//! give up after a fixed number of transmissions, or cancel the token from
//! `Bc95Modem::cancel_token` in another task.

pub use nbiot_core::*;

/// AT-command transaction engine, hex payload codec, and command composer.
pub mod at {
    pub use nbiot_at::*;
}

/// Transport implementations.
pub mod transport {
    pub use nbiot_transport::*;
}

/// Quectel BC95 modem backend.
///
/// Provides [`Bc95Modem`](bc95::Bc95Modem) and
/// [`Bc95Builder`](bc95::Bc95Builder) for driving a BC95 over its UART.
#[cfg(feature = "bc95")]
pub mod bc95 {
    pub use nbiot_bc95::*;
}
