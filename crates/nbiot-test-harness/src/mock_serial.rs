//! Mock transport for deterministic testing of the transaction engine.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs, behaving like a modem on the other end of a
//! serial line: responses can arrive in fragments across several reads,
//! only after a number of silent polls, or never.
//!
//! Because the engine takes ownership of its transport, everything the mock
//! observes is also recorded into a shared [`MockHandle`] that a test keeps
//! for its assertions.
//!
//! # Example
//!
//! ```
//! use nbiot_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // When the engine sends "AT+CSQ\r", answer with the signal report.
//! mock.expect(b"AT+CSQ\r", b"\r\n+CSQ:17,0\r\n\r\nOK\r\n");
//! // Deliver the echo and the status on separate reads.
//! mock.expect_chunks(b"AT\r", &[b"AT\r\n", b"OK\r\n"]);
//!
//! let handle = mock.handle();
//! assert!(handle.sent_data().is_empty());
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use nbiot_core::error::{Error, Result};
use nbiot_core::transport::Transport;

/// A pre-loaded request/response script entry.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// Fragments returned by successive `receive()` calls.
    chunks: Vec<Vec<u8>>,
    /// Number of `receive()` calls that time out before the first fragment.
    silent_polls: usize,
    /// Sends of `request` this entry answers before it is consumed.
    answers: usize,
}

/// A serial control line driven through the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlLine {
    Dtr,
    Rts,
}

#[derive(Debug, Default)]
struct MockLog {
    sent: Vec<Vec<u8>>,
    receive_calls: usize,
    lines: Vec<(ControlLine, bool)>,
}

/// Shared view of everything a [`MockTransport`] has observed.
///
/// Cloning is cheap; all clones see the same log.
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    log: Arc<Mutex<MockLog>>,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// All data sent through the transport, one element per `send()`.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// Count how many times exactly `data` was sent.
    pub fn send_count(&self, data: &[u8]) -> usize {
        self.lock()
            .sent
            .iter()
            .filter(|s| s.as_slice() == data)
            .count()
    }

    /// Number of `receive()` calls made so far.
    pub fn receive_calls(&self) -> usize {
        self.lock().receive_calls
    }

    /// History of control line changes in the order they happened.
    pub fn line_changes(&self) -> Vec<(ControlLine, bool)> {
        self.lock().lines.clone()
    }

    /// Last state a control line was driven to, `None` if never driven.
    pub fn line_state(&self, line: ControlLine) -> Option<bool> {
        self.lock()
            .lines
            .iter()
            .rev()
            .find(|(l, _)| *l == line)
            .map(|(_, on)| *on)
    }
}

/// A mock [`Transport`] for testing without a modem attached.
///
/// Expectations are consumed in order. When `send()` is called, the data is
/// recorded and matched against the next expectation; its response fragments
/// are then returned by subsequent `receive()` calls, one fragment per call.
///
/// Sending the same bytes as the most recently matched request again is a
/// retransmission: it is recorded but does not consume an expectation or
/// disturb the response that is still being delivered, just as a modem
/// keeps answering the first copy of a repeated command.
///
/// A `receive()` with nothing to deliver waits out its timeout and returns
/// [`Error::Timeout`], so tests running on paused time advance the clock
/// exactly as a silent serial line would.
#[derive(Debug)]
pub struct MockTransport {
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<Expectation>,
    /// Fragments still to be delivered for the current exchange.
    pending: VecDeque<Vec<u8>>,
    /// Silent polls remaining before `pending` starts to drain.
    silent_polls: usize,
    /// The request of the most recently matched expectation.
    last_request: Option<Vec<u8>>,
    /// Whether the transport is "connected".
    connected: bool,
    /// After this many `receive()` calls the line reports `ConnectionLost`.
    poll_limit: Option<usize>,
    handle: MockHandle,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            pending: VecDeque::new(),
            silent_polls: 0,
            last_request: None,
            connected: true,
            poll_limit: None,
            handle: MockHandle::default(),
        }
    }

    /// Add an expected request whose response arrives in one read.
    ///
    /// An empty `response` scripts a modem that never answers.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        let chunks = if response.is_empty() {
            Vec::new()
        } else {
            vec![response.to_vec()]
        };
        self.push(request, chunks, 0);
    }

    /// Add an expected request whose response arrives as separate fragments,
    /// one per `receive()` call. An empty fragment reads as `Ok(0)`.
    pub fn expect_chunks(&mut self, request: &[u8], chunks: &[&[u8]]) {
        let chunks = chunks.iter().map(|c| c.to_vec()).collect();
        self.push(request, chunks, 0);
    }

    /// Add an expected request whose response only arrives after
    /// `silent_polls` reads have timed out.
    pub fn expect_after_polls(&mut self, request: &[u8], silent_polls: usize, response: &[u8]) {
        self.push(request, vec![response.to_vec()], silent_polls);
    }

    /// Answer the next `times` sends of `request`, retransmissions included,
    /// with `response` each, like a modem reporting an unchanged status.
    /// A later expectation for the same request takes over afterwards.
    pub fn expect_repeating(&mut self, request: &[u8], response: &[u8], times: usize) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            chunks: vec![response.to_vec()],
            silent_polls: 0,
            answers: times.max(1),
        });
    }

    fn push(&mut self, request: &[u8], chunks: Vec<Vec<u8>>, silent_polls: usize) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            chunks,
            silent_polls,
            answers: 1,
        });
    }

    /// Cut the line after `polls` reads: every later `receive()` returns
    /// [`Error::ConnectionLost`].
    ///
    /// Lets a test bound a transaction that would otherwise poll forever.
    pub fn fail_after_polls(&mut self, polls: usize) {
        self.poll_limit = Some(polls);
    }

    /// Return a handle onto the shared activity log.
    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }

    /// Return all data sent through this transport, one element per `send()`.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.handle.sent_data()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls will
    /// return [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    fn drive_line(&mut self, line: ControlLine, on: bool) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.handle.lock().lines.push((line, on));
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        self.handle.lock().sent.push(data.to_vec());

        let next_matches = self
            .expectations
            .front()
            .is_some_and(|e| e.request.as_slice() == data);

        if next_matches {
            let repeating = self.expectations.front_mut().filter(|e| e.answers > 1);
            if let Some(expectation) = repeating {
                expectation.answers -= 1;
                self.pending.extend(expectation.chunks.iter().cloned());
                self.silent_polls = expectation.silent_polls;
                self.last_request = Some(expectation.request.clone());
                return Ok(());
            }
            if let Some(expectation) = self.expectations.pop_front() {
                self.pending = expectation.chunks.into();
                self.silent_polls = expectation.silent_polls;
                self.last_request = Some(expectation.request);
            }
            return Ok(());
        }

        if self.last_request.as_deref() == Some(data) {
            tracing::trace!(data = %data.escape_ascii(), "mock transport: retransmission");
            return Ok(());
        }

        match self.expectations.front() {
            Some(expectation) => Err(Error::Protocol(format!(
                "unexpected send data: expected \"{}\", got \"{}\"",
                expectation.request.escape_ascii(),
                data.escape_ascii()
            ))),
            None => Err(Error::Protocol(
                "no more expectations in mock transport".into(),
            )),
        }
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        let calls = {
            let mut log = self.handle.lock();
            log.receive_calls += 1;
            log.receive_calls
        };
        if self.poll_limit.is_some_and(|limit| calls > limit) {
            return Err(Error::ConnectionLost);
        }

        if self.silent_polls > 0 || self.pending.is_empty() {
            self.silent_polls = self.silent_polls.saturating_sub(1);
            tokio::time::sleep(timeout).await;
            return Err(Error::Timeout);
        }

        let Some(mut chunk) = self.pending.pop_front() else {
            return Err(Error::Timeout);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            // Oversized fragment: hand out the remainder on the next read.
            self.pending.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.pending.clear();
        self.silent_polls = 0;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn set_dtr(&mut self, on: bool) -> Result<()> {
        self.drive_line(ControlLine::Dtr, on)
    }

    async fn set_rts(&mut self, on: bool) -> Result<()> {
        self.drive_line(ControlLine::Rts, on)
    }
}
