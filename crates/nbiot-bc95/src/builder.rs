//! Bc95Builder -- fluent builder for constructing [`Bc95Modem`] sessions.
//!
//! Separates configuration from construction so that callers can set up
//! serial port parameters, the retry policy, buffer capacities, and the
//! power-enable line before the transport is opened.
//!
//! # Example
//!
//! ```no_run
//! use nbiot_bc95::Bc95Builder;
//! use nbiot_core::PowerLine;
//! use std::time::Duration;
//!
//! # async fn example() -> nbiot_core::Result<()> {
//! let mut modem = Bc95Builder::new()
//!     .serial_port("/dev/ttyUSB0")
//!     .command_timeout(Duration::from_millis(1500))
//!     .max_attempts(5)
//!     .power_line(PowerLine::Dtr)
//!     .build()
//!     .await?;
//! modem.initialize().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use nbiot_at::compose::DEFAULT_COMPOSE_CAPACITY;
use nbiot_at::engine::{
    DEFAULT_POLL_INTERVAL, DEFAULT_RESPONSE_CAPACITY, DEFAULT_TIMEOUT, EngineConfig,
};
use nbiot_at::hex::DEFAULT_HEX_CAPACITY;
use nbiot_at::{Composer, TransactionEngine};
use nbiot_core::error::{Error, Result};
use nbiot_core::transport::Transport;
use nbiot_core::types::{PowerLine, RetryPolicy};

use crate::modem::Bc95Modem;

/// Default UART speed of the BC95.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Fluent builder for [`Bc95Modem`].
///
/// Every setting has a default matching the modem's factory behaviour, so
/// the simplest usage is:
///
/// ```ignore
/// let modem = Bc95Builder::new()
///     .serial_port("/dev/ttyUSB0")
///     .build()
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct Bc95Builder {
    serial_port: Option<String>,
    baud_rate: u32,
    command_timeout: Duration,
    poll_interval: Duration,
    retry_policy: RetryPolicy,
    response_capacity: usize,
    compose_capacity: usize,
    hex_capacity: usize,
    power_line: PowerLine,
    cancel_token: Option<CancellationToken>,
}

impl Bc95Builder {
    pub fn new() -> Self {
        Bc95Builder {
            serial_port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            command_timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_policy: RetryPolicy::Unbounded,
            response_capacity: DEFAULT_RESPONSE_CAPACITY,
            compose_capacity: DEFAULT_COMPOSE_CAPACITY,
            hex_capacity: DEFAULT_HEX_CAPACITY,
            power_line: PowerLine::None,
            cancel_token: None,
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyUSB0` or `COM3`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Override the default baud rate (9600).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// Set how long a transaction waits for its expected response before
    /// retransmitting the command (default: 1000ms).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the upper bound on a single wait for incoming bytes
    /// (default: 10ms).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the retry policy (default: [`RetryPolicy::Unbounded`]).
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Give up on a transaction after `n` transmissions.
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.retry_policy = RetryPolicy::Bounded { max_attempts: n };
        self
    }

    /// Set the capacity of the response buffer (default: 400 bytes).
    pub fn response_capacity(mut self, capacity: usize) -> Self {
        self.response_capacity = capacity;
        self
    }

    /// Set the capacity of the command compose buffer (default: 300 bytes).
    pub fn compose_capacity(mut self, capacity: usize) -> Self {
        self.compose_capacity = capacity;
        self
    }

    /// Set the capacity of the hex payload buffer (default: 200 bytes, i.e.
    /// datagrams of up to 100 bytes).
    pub fn hex_capacity(mut self, capacity: usize) -> Self {
        self.hex_capacity = capacity;
        self
    }

    /// Set the serial control line wired to the modem's power-enable input.
    pub fn power_line(mut self, line: PowerLine) -> Self {
        self.power_line = line;
        self
    }

    /// Supply the token that cancels in-flight transactions.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    /// Build a [`Bc95Modem`] with a caller-provided transport.
    ///
    /// This is the primary entry point for testing (pass a
    /// `MockTransport` from `nbiot-test-harness`).
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<Bc95Modem> {
        if self.compose_capacity == 0 {
            return Err(Error::InvalidParameter(
                "compose capacity must be non-zero".into(),
            ));
        }
        if self.hex_capacity == 0 {
            return Err(Error::InvalidParameter(
                "hex capacity must be non-zero".into(),
            ));
        }

        let config = EngineConfig {
            timeout: self.command_timeout,
            poll_interval: self.poll_interval,
            retry_policy: self.retry_policy,
            response_capacity: self.response_capacity,
        };
        let mut engine = TransactionEngine::new(transport, config)?;
        if let Some(token) = self.cancel_token {
            engine = engine.with_cancel_token(token);
        }

        Ok(Bc95Modem::new(
            engine,
            Composer::with_capacity(self.compose_capacity),
            self.hex_capacity,
            self.power_line,
        ))
    }

    /// Build a [`Bc95Modem`] using a serial transport.
    ///
    /// Requires that [`serial_port()`](Self::serial_port) has been called.
    pub async fn build(self) -> Result<Bc95Modem> {
        let port = self
            .serial_port
            .as_ref()
            .ok_or_else(|| Error::InvalidParameter("serial_port is required for build()".into()))?;

        let transport = nbiot_transport::SerialTransport::open(port, self.baud_rate).await?;
        self.build_with_transport(Box::new(transport)).await
    }
}

impl Default for Bc95Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbiot_test_harness::MockTransport;

    #[tokio::test]
    async fn builder_defaults() {
        let modem = Bc95Builder::new()
            .build_with_transport(Box::new(MockTransport::new()))
            .await
            .unwrap();

        assert_eq!(modem.timeout(), Duration::from_millis(1000));
        assert_eq!(modem.retry_policy(), RetryPolicy::Unbounded);
        assert_eq!(modem.power_line(), PowerLine::None);
        assert_eq!(modem.socket(), 0);
    }

    #[tokio::test]
    async fn builder_custom_settings() {
        let modem = Bc95Builder::new()
            .serial_port("/dev/ttyUSB0")
            .baud_rate(115_200)
            .command_timeout(Duration::from_millis(250))
            .poll_interval(Duration::from_millis(5))
            .max_attempts(4)
            .power_line(PowerLine::Rts)
            .build_with_transport(Box::new(MockTransport::new()))
            .await
            .unwrap();

        assert_eq!(modem.timeout(), Duration::from_millis(250));
        assert_eq!(
            modem.retry_policy(),
            RetryPolicy::Bounded { max_attempts: 4 }
        );
        assert_eq!(modem.power_line(), PowerLine::Rts);
    }

    #[tokio::test]
    async fn builder_shares_cancel_token() {
        let token = CancellationToken::new();
        let modem = Bc95Builder::new()
            .cancel_token(token.clone())
            .build_with_transport(Box::new(MockTransport::new()))
            .await
            .unwrap();

        token.cancel();
        assert!(modem.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn builder_rejects_zero_attempts() {
        let result = Bc95Builder::new()
            .max_attempts(0)
            .build_with_transport(Box::new(MockTransport::new()))
            .await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn builder_rejects_zero_capacities() {
        for builder in [
            Bc95Builder::new().response_capacity(0),
            Bc95Builder::new().compose_capacity(0),
            Bc95Builder::new().hex_capacity(0),
            Bc95Builder::new().command_timeout(Duration::ZERO),
        ] {
            let result = builder
                .build_with_transport(Box::new(MockTransport::new()))
                .await;
            assert!(matches!(result, Err(Error::InvalidParameter(_))));
        }
    }

    #[tokio::test]
    async fn builder_serial_port_required_for_build() {
        let result = Bc95Builder::new().build().await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }
}
