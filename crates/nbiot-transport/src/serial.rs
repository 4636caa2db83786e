//! UART transport to the modem.
//!
//! [`SerialTransport`] implements [`Transport`] over a `tokio-serial` stream.
//! The BC95 ships configured for 9600 baud 8N1 without flow control, which is
//! what [`SerialConfig::default`] describes.
//!
//! # Example
//!
//! ```no_run
//! use nbiot_transport::SerialTransport;
//! use nbiot_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> nbiot_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 9600).await?;
//! transport.send(b"AT\r").await?;
//!
//! let mut buf = [0u8; 64];
//! let n = transport.receive(&mut buf, Duration::from_millis(10)).await?;
//! # Ok(())
//! # }
//! ```

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, trace, warn};

pub use tokio_serial::{DataBits, FlowControl, Parity, StopBits};

use nbiot_core::error::{Error, Result};
use nbiot_core::transport::Transport;

/// Line settings of the modem UART.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl SerialConfig {
    /// 8N1 without flow control at `baud_rate`.
    pub fn with_baud_rate(baud_rate: u32) -> Self {
        SerialConfig {
            baud_rate,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::with_baud_rate(9600)
    }
}

/// The modem end of a serial line.
pub struct SerialTransport {
    stream: Option<SerialStream>,
    path: String,
}

impl SerialTransport {
    /// Open `path` at `baud_rate`, 8N1.
    pub async fn open(path: &str, baud_rate: u32) -> Result<Self> {
        Self::open_with_config(path, SerialConfig::with_baud_rate(baud_rate)).await
    }

    /// Open `path` with explicit line settings.
    ///
    /// DTR and RTS keep whatever state the OS gives them on open; a session
    /// using one as the power-enable line drives it explicitly.
    pub async fn open_with_config(path: &str, config: SerialConfig) -> Result<Self> {
        debug!(path, ?config, "opening modem UART");

        let stream = tokio_serial::new(path, config.baud_rate)
            .data_bits(config.data_bits)
            .parity(config.parity)
            .stop_bits(config.stop_bits)
            .flow_control(config.flow_control)
            .open_native_async()
            .map_err(|e| Error::Transport(format!("cannot open {path}: {e}")))?;

        debug!(path, baud_rate = config.baud_rate, "modem UART open");
        Ok(SerialTransport {
            stream: Some(stream),
            path: path.to_string(),
        })
    }

    /// Device path the transport was opened on.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn stream(&mut self) -> Result<&mut SerialStream> {
        self.stream.as_mut().ok_or(Error::NotConnected)
    }
}

/// A vanished device surfaces as a broken pipe or as end of stream; both
/// mean the modem is gone.
fn classify_io_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected | io::ErrorKind::UnexpectedEof => {
            Error::ConnectionLost
        }
        _ => Error::Io(e),
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        trace!(data = %data.escape_ascii(), "uart tx");
        let stream = self.stream()?;
        stream.write_all(data).await.map_err(classify_io_error)?;
        stream.flush().await.map_err(classify_io_error)
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream()?;
        match tokio::time::timeout(timeout, stream.read(buf)).await {
            Err(_) => Err(Error::Timeout),
            Ok(Ok(0)) if !buf.is_empty() => Err(Error::ConnectionLost),
            Ok(Ok(n)) => {
                trace!(data = %buf[..n].escape_ascii(), "uart rx");
                Ok(n)
            }
            Ok(Err(e)) => Err(classify_io_error(e)),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.flush().await {
                warn!(path = %self.path, error = %e, "flush before close failed");
            }
            debug!(path = %self.path, "modem UART closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn set_dtr(&mut self, on: bool) -> Result<()> {
        debug!(on, "DTR");
        self.stream()?
            .write_data_terminal_ready(on)
            .map_err(|e| Error::Transport(format!("cannot drive DTR: {e}")))
    }

    async fn set_rts(&mut self, on: bool) -> Result<()> {
        debug!(on, "RTS");
        self.stream()?
            .write_request_to_send(on)
            .map_err(|e| Error::Transport(format!("cannot drive RTS: {e}")))
    }
}
