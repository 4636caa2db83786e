//! The AT-command transaction engine.
//!
//! One transaction is one send-and-await-response exchange: the engine writes
//! a command line, then polls the transport, accumulating every byte that
//! arrives into a bounded [`ResponseBuffer`] until the expected pattern
//! appears in it. If a full timeout passes since the last transmission
//! without a match, the command is sent again. Whether that ever stops is
//! decided by the [`RetryPolicy`]:
//!
//! - [`RetryPolicy::Unbounded`] keeps retransmitting for as long as it takes.
//!   A modem that never answers blocks the caller until the engine's
//!   [`CancellationToken`] is cancelled.
//! - [`RetryPolicy::Bounded`] fails with [`Error::PatternNeverMatched`] once
//!   the configured number of transmissions have each waited out a timeout.
//!
//! On every retransmission the buffer is cut back to the last
//! `pattern.len() - 1` bytes: enough for a match that straddles the resend,
//! while a modem that keeps answering with some other status never fills it.
//! A cancelled token stops a transaction before anything is written.
//!
//! The engine owns its transport exclusively; `&mut self` on every
//! transaction means there is never more than one in flight.

use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use nbiot_core::error::{Error, Result};
use nbiot_core::transport::Transport;
use nbiot_core::types::RetryPolicy;

use crate::protocol::{self, Response};

/// Default time to wait for the expected response before retransmitting.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default upper bound on a single wait for incoming bytes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Capacity of the response buffer an engine allocates by default.
pub const DEFAULT_RESPONSE_CAPACITY: usize = 400;

/// Size of a single transport read.
const READ_CHUNK: usize = 64;

/// Fixed-capacity accumulator for the bytes of one transaction.
#[derive(Debug)]
pub struct ResponseBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl ResponseBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        ResponseBuffer {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `data`, failing with [`Error::BufferOverflow`] (and appending
    /// nothing) if the total would exceed the capacity.
    pub fn extend(&mut self, data: &[u8]) -> Result<()> {
        let required = self.buf.len() + data.len();
        if required > self.capacity {
            return Err(Error::BufferOverflow {
                required,
                capacity: self.capacity,
            });
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    pub fn contains(&self, pattern: &[u8]) -> bool {
        protocol::contains_pattern(&self.buf, pattern)
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Drop everything but the last `keep` bytes.
    pub fn retain_tail(&mut self, keep: usize) {
        let excess = self.buf.len().saturating_sub(keep);
        self.buf.advance(excess);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn to_response(&self) -> Response {
        Response::new(Bytes::copy_from_slice(&self.buf))
    }
}

/// Tunables of a [`TransactionEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time since the last transmission after which the command is resent.
    pub timeout: Duration,
    /// Upper bound on one wait for incoming bytes.
    pub poll_interval: Duration,
    pub retry_policy: RetryPolicy,
    pub response_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_policy: RetryPolicy::Unbounded,
            response_capacity: DEFAULT_RESPONSE_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::InvalidParameter("timeout must be non-zero".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidParameter(
                "poll interval must be non-zero".into(),
            ));
        }
        if self.response_capacity == 0 {
            return Err(Error::InvalidParameter(
                "response capacity must be non-zero".into(),
            ));
        }
        validate_retry_policy(self.retry_policy)
    }
}

fn validate_retry_policy(policy: RetryPolicy) -> Result<()> {
    match policy {
        RetryPolicy::Bounded { max_attempts: 0 } => Err(Error::InvalidParameter(
            "max_attempts must be at least 1".into(),
        )),
        _ => Ok(()),
    }
}

/// Drives request/response exchanges with the modem over a [`Transport`].
pub struct TransactionEngine {
    transport: Box<dyn Transport>,
    response: ResponseBuffer,
    timeout: Duration,
    poll_interval: Duration,
    retry_policy: RetryPolicy,
    cancel: CancellationToken,
}

impl TransactionEngine {
    /// Create an engine that owns `transport`.
    pub fn new(transport: Box<dyn Transport>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(TransactionEngine {
            transport,
            response: ResponseBuffer::with_capacity(config.response_capacity),
            timeout: config.timeout,
            poll_interval: config.poll_interval,
            retry_policy: config.retry_policy,
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the cancellation token observed by every transaction.
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A clone of the token that cancels in-flight transactions.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Swap in a fresh token, e.g. to resume after a cancellation.
    pub fn set_cancel_token(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            debug!("engine cancelled, nothing sent");
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Change the timeout applied to every subsequent transaction.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(Error::InvalidParameter("timeout must be non-zero".into()));
        }
        self.timeout = timeout;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    pub fn set_retry_policy(&mut self, policy: RetryPolicy) -> Result<()> {
        validate_retry_policy(policy)?;
        self.retry_policy = policy;
        Ok(())
    }

    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        &mut *self.transport
    }

    /// Consume the engine and hand back its transport.
    pub fn into_transport(self) -> Box<dyn Transport> {
        self.transport
    }

    /// Write one AT command without waiting for any response.
    pub async fn send_once(&mut self, command: &str) -> Result<()> {
        if command.is_empty() {
            return Err(Error::InvalidParameter("command must be non-empty".into()));
        }
        self.ensure_not_cancelled()?;
        debug!(command, "sending command without awaiting response");
        self.transport.send(&protocol::encode_command(command)).await
    }

    /// Send an AT command (the line terminator is appended) and wait until
    /// `expected` appears in the response.
    pub async fn execute(&mut self, command: &str, expected: &str) -> Result<Response> {
        if command.is_empty() {
            return Err(Error::InvalidParameter("command must be non-empty".into()));
        }
        self.run(&protocol::encode_command(command), expected).await
    }

    /// Send an already composed line verbatim and wait until `expected`
    /// appears in the response.
    pub async fn execute_raw(&mut self, line: &[u8], expected: &str) -> Result<Response> {
        if line.is_empty() {
            return Err(Error::InvalidParameter("line must be non-empty".into()));
        }
        self.run(line, expected).await
    }

    async fn run(&mut self, frame: &[u8], expected: &str) -> Result<Response> {
        if expected.is_empty() {
            return Err(Error::InvalidParameter(
                "expected pattern must be non-empty".into(),
            ));
        }
        self.ensure_not_cancelled()?;
        let pattern = expected.as_bytes();

        self.response.clear();
        debug!(
            command = %frame.escape_ascii(),
            expected = %pattern.escape_ascii(),
            "starting transaction"
        );

        self.transport.send(frame).await?;
        let mut attempts: u32 = 1;
        let mut last_send = Instant::now();
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if self.cancel.is_cancelled() {
                debug!(attempts, "transaction cancelled");
                return Err(Error::Cancelled);
            }

            if last_send.elapsed() > self.timeout {
                if !self.retry_policy.allows(attempts) {
                    warn!(
                        attempts,
                        expected = %pattern.escape_ascii(),
                        received = self.response.len(),
                        "expected response never arrived"
                    );
                    return Err(Error::PatternNeverMatched {
                        pattern: expected.to_string(),
                        attempts,
                    });
                }
                debug!(attempts, "no match within timeout, retransmitting");
                self.response.retain_tail(pattern.len() - 1);
                self.transport.send(frame).await?;
                attempts = attempts.saturating_add(1);
                last_send = Instant::now();
            }

            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(attempts, "transaction cancelled");
                    return Err(Error::Cancelled);
                }
                r = self.transport.receive(&mut chunk, self.poll_interval) => r,
            };

            match received {
                Ok(0) => tokio::time::sleep(self.poll_interval).await,
                Ok(n) => {
                    trace!(data = %chunk[..n].escape_ascii(), "modem");
                    if let Err(e) = self.response.extend(&chunk[..n]) {
                        warn!(error = %e, "response does not fit the response buffer");
                        return Err(e);
                    }
                    if self.response.contains(pattern) {
                        debug!(attempts, bytes = self.response.len(), "transaction matched");
                        return Ok(self.response.to_response());
                    }
                }
                Err(Error::Timeout) => {}
                Err(e) => {
                    warn!(error = %e, "transport failed during transaction");
                    return Err(e);
                }
            }
        }
    }
}
