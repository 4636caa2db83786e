//! Transport trait for modem communication.
//!
//! The [`Transport`] trait abstracts over the serial link to the modem.
//! The transaction engine in `nbiot-at` operates on a `Transport` rather
//! than directly on a serial port, enabling both real hardware control and
//! deterministic unit testing with `MockTransport` from the
//! `nbiot-test-harness` crate.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{Error, Result};

/// Asynchronous byte-level transport to a modem.
///
/// Implementations handle buffering and error recovery at the physical
/// layer. Line framing, response matching, and retransmission belong to the
/// transaction engine that consumes this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the modem.
    ///
    /// Implementations should block until all bytes have been written to
    /// the underlying port.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive whatever bytes are available into `buf`.
    ///
    /// Returns the number of bytes read. Waits up to `timeout` for data to
    /// arrive and returns [`Error::Timeout`] if nothing was received within
    /// the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`].
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently open.
    fn is_connected(&self) -> bool;

    /// Drive the DTR control line.
    async fn set_dtr(&mut self, _on: bool) -> Result<()> {
        Err(Error::Unsupported("DTR control on this transport".into()))
    }

    /// Drive the RTS control line.
    async fn set_rts(&mut self, _on: bool) -> Result<()> {
        Err(Error::Unsupported("RTS control on this transport".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send(&mut self, _data: &[u8]) -> Result<()> {
            Ok(())
        }

        async fn receive(&mut self, _buf: &mut [u8], _timeout: Duration) -> Result<usize> {
            Err(Error::Timeout)
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn control_lines_default_to_unsupported() {
        let mut t = NullTransport;
        assert!(matches!(t.set_dtr(true).await, Err(Error::Unsupported(_))));
        assert!(matches!(t.set_rts(false).await, Err(Error::Unsupported(_))));
    }

    #[test]
    fn transport_is_object_safe() {
        let t: Box<dyn Transport> = Box::new(NullTransport);
        assert!(t.is_connected());
    }
}
