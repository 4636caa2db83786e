//! Bc95Modem -- a driver session for one BC95 NB-IoT modem.
//!
//! The session owns a [`TransactionEngine`] (and through it the transport),
//! the command composer, the hex scratch buffer for outgoing payloads, and
//! the peer configuration used by the UDP socket commands. Every operation
//! takes `&mut self`, so at most one transaction is ever in flight and the
//! configuration cannot change underneath a send.
//!
//! Multi-step operations such as [`connect_to_operator`](Bc95Modem::connect_to_operator)
//! run their steps strictly in order and stop at the first failure; steps
//! that already succeeded are not undone.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use bytes::BytesMut;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use nbiot_at::hex::encode_hex_into;
use nbiot_at::protocol::{self, Response};
use nbiot_at::{Composer, TransactionEngine};
use nbiot_core::error::{Error, Result};
use nbiot_core::transport::Transport;
use nbiot_core::types::{PowerLine, RetryPolicy, SignalQuality};

use crate::commands;

/// Longest accepted peer IP address.
pub const MAX_IP_ADDRESS_LEN: usize = 29;
/// Longest accepted destination port.
pub const MAX_PORT_LEN: usize = 7;
/// Longest accepted domain name.
pub const MAX_DOMAIN_NAME_LEN: usize = 49;

/// Wait between requesting the attach and querying its state.
const ATTACH_SETTLE: Duration = Duration::from_millis(500);
/// Wait after powering the modem before talking to it.
const POWER_UP_SETTLE: Duration = Duration::from_millis(500);
/// Spacing of the steps of a hardware reset.
const RESET_STEP: Duration = Duration::from_millis(200);

/// Peer settings used by the socket commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    ip_address: Option<String>,
    port: Option<String>,
    domain_name: Option<String>,
}

impl SessionConfig {
    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    pub fn domain_name(&self) -> Option<&str> {
        self.domain_name.as_deref()
    }
}

fn bounded_value(what: &str, value: &str, max: usize) -> Result<String> {
    if value.is_empty() {
        return Err(Error::InvalidParameter(format!("{what} must not be empty")));
    }
    if value.len() > max {
        return Err(Error::InvalidParameter(format!(
            "{what} is {} characters long, at most {max} are allowed",
            value.len()
        )));
    }
    if value.contains([',', '\r', '\n']) {
        return Err(Error::InvalidParameter(format!(
            "{what} must not contain separators or line breaks"
        )));
    }
    Ok(value.to_string())
}

/// Hex scratch buffer that is emptied when the guard goes out of scope.
struct ScratchGuard<'a>(&'a mut BytesMut);

impl Deref for ScratchGuard<'_> {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        self.0
    }
}

impl DerefMut for ScratchGuard<'_> {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.0
    }
}

impl Drop for ScratchGuard<'_> {
    fn drop(&mut self) {
        self.0.clear();
    }
}

/// A session with one BC95 modem.
///
/// Constructed through [`Bc95Builder`](crate::Bc95Builder).
pub struct Bc95Modem {
    engine: TransactionEngine,
    composer: Composer,
    hex_scratch: BytesMut,
    hex_capacity: usize,
    config: SessionConfig,
    power_line: PowerLine,
    socket: u8,
}

impl Bc95Modem {
    pub(crate) fn new(
        engine: TransactionEngine,
        composer: Composer,
        hex_capacity: usize,
        power_line: PowerLine,
    ) -> Self {
        Bc95Modem {
            engine,
            composer,
            hex_scratch: BytesMut::with_capacity(hex_capacity),
            hex_capacity,
            config: SessionConfig::default(),
            power_line,
            socket: commands::DEFAULT_SOCKET,
        }
    }

    // ---------------------------------------------------------------
    // Configuration accessors
    // ---------------------------------------------------------------

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.config.ip_address()
    }

    /// Set the peer IP address used by [`send_datagram`](Self::send_datagram).
    pub fn set_ip_address(&mut self, ip_address: &str) -> Result<()> {
        self.config.ip_address = Some(bounded_value(
            "ip address",
            ip_address,
            MAX_IP_ADDRESS_LEN,
        )?);
        Ok(())
    }

    pub fn port(&self) -> Option<&str> {
        self.config.port()
    }

    /// Set the destination port used by [`send_datagram`](Self::send_datagram).
    pub fn set_port(&mut self, port: &str) -> Result<()> {
        self.config.port = Some(bounded_value("port", port, MAX_PORT_LEN)?);
        Ok(())
    }

    pub fn domain_name(&self) -> Option<&str> {
        self.config.domain_name()
    }

    pub fn set_domain_name(&mut self, domain_name: &str) -> Result<()> {
        self.config.domain_name = Some(bounded_value(
            "domain name",
            domain_name,
            MAX_DOMAIN_NAME_LEN,
        )?);
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        self.engine.timeout()
    }

    /// Change the timeout of every subsequent transaction.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.engine.set_timeout(timeout)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.engine.retry_policy()
    }

    pub fn set_retry_policy(&mut self, policy: RetryPolicy) -> Result<()> {
        self.engine.set_retry_policy(policy)
    }

    /// Token that cancels the transaction currently in flight.
    ///
    /// Once cancelled, every later command fails with
    /// [`Error::Cancelled`] without touching the wire until a fresh token is
    /// installed with [`set_cancel_token`](Self::set_cancel_token).
    pub fn cancel_token(&self) -> CancellationToken {
        self.engine.cancel_token()
    }

    pub fn set_cancel_token(&mut self, cancel: CancellationToken) {
        self.engine.set_cancel_token(cancel);
    }

    pub fn power_line(&self) -> PowerLine {
        self.power_line
    }

    /// Socket the datagram and close commands address.
    pub fn socket(&self) -> u8 {
        self.socket
    }

    /// Release the transport, ending the session.
    pub fn into_transport(self) -> Box<dyn Transport> {
        self.engine.into_transport()
    }

    // ---------------------------------------------------------------
    // Generic commands
    // ---------------------------------------------------------------

    /// Send one AT command without waiting for a response.
    pub async fn send_command_once(&mut self, command: &str) -> Result<()> {
        self.engine.send_once(command).await
    }

    /// Send one AT command and wait for `expected`.
    pub async fn send_command(&mut self, command: &str, expected: &str) -> Result<Response> {
        self.engine.execute(command, expected).await
    }

    /// Send a complete line verbatim and wait for `expected`.
    pub async fn send_raw(&mut self, line: &[u8], expected: &str) -> Result<Response> {
        self.engine.execute_raw(line, expected).await
    }

    async fn compose_and_execute(&mut self, keyword: &str, fields: &[&str]) -> Result<Response> {
        let line = self.composer.compose(keyword, fields)?;
        self.engine.execute_raw(&line, protocol::OK).await
    }

    // ---------------------------------------------------------------
    // Power and initialization
    // ---------------------------------------------------------------

    async fn drive_power_line(&mut self, on: bool) -> Result<()> {
        match self.power_line {
            PowerLine::None => Err(Error::Unsupported(
                "no power-enable line is configured".into(),
            )),
            PowerLine::Dtr => {
                debug!(on, "driving power-enable via DTR");
                self.engine.transport_mut().set_dtr(on).await
            }
            PowerLine::Rts => {
                debug!(on, "driving power-enable via RTS");
                self.engine.transport_mut().set_rts(on).await
            }
        }
    }

    /// Drive the power-enable line high.
    pub async fn power_on(&mut self) -> Result<()> {
        self.drive_power_line(true).await
    }

    /// Drive the power-enable line low.
    pub async fn power_off(&mut self) -> Result<()> {
        self.drive_power_line(false).await
    }

    /// Bring the modem up: power it (when a power-enable line is
    /// configured), enable automatic network registration and scrambling,
    /// turn on echo, and check that it answers.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.power_line != PowerLine::None {
            self.power_on().await?;
        }
        tokio::time::sleep(POWER_UP_SETTLE).await;

        self.set_auto_connect(true).await?;
        self.set_scrambling(true).await?;
        self.engine.execute(commands::ECHO_ON, protocol::OK).await?;
        self.engine.execute(commands::ECHO_ON, protocol::OK).await?;
        self.engine.execute(commands::ATTENTION, protocol::OK).await?;
        info!("BC95 modem initialized");
        Ok(())
    }

    /// Power-cycle the modem through its power-enable line after storing
    /// the configuration.
    ///
    /// Fails with [`Error::Unsupported`] before sending anything when no
    /// power-enable line is configured.
    pub async fn reset(&mut self) -> Result<()> {
        if self.power_line == PowerLine::None {
            return Err(Error::Unsupported(
                "hardware reset requires a power-enable line".into(),
            ));
        }
        debug!(line = ?self.power_line, "resetting modem");

        self.save_configuration().await?;
        tokio::time::sleep(RESET_STEP).await;
        self.power_off().await?;
        tokio::time::sleep(RESET_STEP).await;
        self.power_on().await?;
        tokio::time::sleep(RESET_STEP).await;
        info!("BC95 modem reset");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Modem configuration and identity
    // ---------------------------------------------------------------

    /// Enable or disable automatic network registration after power-up.
    pub async fn set_auto_connect(&mut self, on: bool) -> Result<()> {
        debug!(on, "setting auto-connect");
        self.compose_and_execute(
            commands::CONFIG_KEYWORD,
            &[commands::CONFIG_AUTOCONNECT, commands::config_flag(on)],
        )
        .await?;
        Ok(())
    }

    /// Enable or disable the scrambling feature.
    pub async fn set_scrambling(&mut self, on: bool) -> Result<()> {
        debug!(on, "setting scrambling");
        self.compose_and_execute(
            commands::CONFIG_KEYWORD,
            &[commands::CONFIG_SCRAMBLING, commands::config_flag(on)],
        )
        .await?;
        Ok(())
    }

    /// Store the current configuration in non-volatile memory.
    pub async fn save_configuration(&mut self) -> Result<()> {
        debug!("saving configuration");
        self.engine
            .execute(commands::SAVE_CONFIGURATION, protocol::OK)
            .await?;
        Ok(())
    }

    pub async fn imei(&mut self) -> Result<String> {
        debug!("reading IMEI");
        let resp = self
            .engine
            .execute(commands::REQUEST_IMEI, protocol::OK)
            .await?;
        commands::parse_imei(&resp.text())
    }

    /// Firmware revision lines, one per component.
    pub async fn firmware_info(&mut self) -> Result<Vec<String>> {
        debug!("reading firmware revision");
        let resp = self
            .engine
            .execute(commands::REQUEST_FIRMWARE, protocol::OK)
            .await?;
        let text = resp.text();
        Ok(commands::info_lines(&text, commands::REQUEST_FIRMWARE)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Model identification.
    pub async fn hardware_info(&mut self) -> Result<String> {
        debug!("reading model identification");
        let resp = self
            .engine
            .execute(commands::REQUEST_MODEL, protocol::OK)
            .await?;
        commands::parse_identification(&resp.text(), commands::REQUEST_MODEL)
    }

    pub async fn signal_quality(&mut self) -> Result<SignalQuality> {
        debug!("reading signal quality");
        let resp = self
            .engine
            .execute(commands::SIGNAL_QUALITY, protocol::OK)
            .await?;
        commands::parse_signal_quality(&resp.text())
    }

    // ---------------------------------------------------------------
    // Network and sockets
    // ---------------------------------------------------------------

    /// Attach to the operator's packet network and report the signal
    /// quality once attached.
    pub async fn connect_to_operator(&mut self) -> Result<SignalQuality> {
        debug!("attaching to network");
        self.engine.execute(commands::ATTACH, protocol::OK).await?;
        tokio::time::sleep(ATTACH_SETTLE).await;
        self.engine
            .execute(commands::ATTACH_STATUS, commands::ATTACHED)
            .await?;
        let quality = self.signal_quality().await?;
        info!(%quality, "attached to network");
        Ok(quality)
    }

    /// Create the UDP socket bound to `local_port`. Later datagram and close
    /// commands address the socket number the modem returns.
    pub async fn open_udp_socket(&mut self, local_port: u16) -> Result<u8> {
        debug!(local_port, "opening UDP socket");
        let fields = commands::udp_socket_fields(local_port);
        let line = self
            .composer
            .compose(commands::SOCKET_CREATE_KEYWORD, &fields)?;
        let resp = self.engine.execute_raw(&line, protocol::OK).await?;
        self.socket = commands::parse_socket_id(&resp.text())?;
        debug!(socket = self.socket, "UDP socket opened");
        Ok(self.socket)
    }

    /// Send `payload` as one UDP datagram to the configured peer.
    ///
    /// Requires both the peer IP address and port to be set. The payload is
    /// hex-encoded into the session's scratch buffer, which is emptied again
    /// whether or not the send succeeds.
    pub async fn send_datagram(&mut self, payload: &[u8]) -> Result<()> {
        let ip_address = self
            .config
            .ip_address
            .as_deref()
            .ok_or(Error::NotConfigured("ip address"))?;
        let port = self
            .config
            .port
            .as_deref()
            .ok_or(Error::NotConfigured("port"))?;
        debug!(ip_address, port, len = payload.len(), "sending datagram");

        let mut hex = ScratchGuard(&mut self.hex_scratch);
        encode_hex_into(payload, &mut hex, self.hex_capacity)?;
        let line =
            self.composer
                .compose_udp_send(self.socket, ip_address, port, payload.len(), &hex)?;
        self.engine.execute_raw(&line, protocol::OK).await?;
        Ok(())
    }

    /// Close the UDP socket.
    pub async fn close_connection(&mut self) -> Result<()> {
        debug!(socket = self.socket, "closing UDP socket");
        let socket = self.socket.to_string();
        self.compose_and_execute(commands::SOCKET_CLOSE_KEYWORD, &[socket.as_str()])
            .await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn hex_scratch_is_clear(&self) -> bool {
        self.hex_scratch.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn composer_is_clear(&self) -> bool {
        self.composer.is_clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Bc95Builder;
    use nbiot_test_harness::{ControlLine, MockHandle, MockTransport};
    use tokio::time::Instant;

    async fn modem(mock: MockTransport) -> Bc95Modem {
        Bc95Builder::new()
            .build_with_transport(Box::new(mock))
            .await
            .unwrap()
    }

    async fn bounded_modem(mock: MockTransport) -> Bc95Modem {
        Bc95Builder::new()
            .max_attempts(1)
            .build_with_transport(Box::new(mock))
            .await
            .unwrap()
    }

    fn sent_lines(handle: &MockHandle) -> Vec<String> {
        handle
            .sent_data()
            .iter()
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect()
    }

    // ---------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn session_config_round_trip() {
        let mut modem = modem(MockTransport::new()).await;
        assert_eq!(modem.ip_address(), None);

        modem.set_ip_address("192.168.1.10").unwrap();
        modem.set_port("3005").unwrap();
        modem.set_domain_name("iot.example.com").unwrap();

        assert_eq!(modem.ip_address(), Some("192.168.1.10"));
        assert_eq!(modem.port(), Some("3005"));
        assert_eq!(modem.domain_name(), Some("iot.example.com"));
        assert_eq!(modem.config().port(), Some("3005"));
    }

    #[tokio::test]
    async fn overlong_values_are_rejected() {
        let mut modem = modem(MockTransport::new()).await;
        modem.set_port("3005").unwrap();

        assert!(matches!(
            modem.set_port("12345678"),
            Err(Error::InvalidParameter(_))
        ));
        assert!(modem.set_ip_address(&"1".repeat(30)).is_err());
        assert!(modem.set_domain_name(&"d".repeat(50)).is_err());
        assert!(modem.set_ip_address(&"1".repeat(29)).is_ok());
        assert!(modem.set_domain_name(&"d".repeat(49)).is_ok());
        assert_eq!(modem.port(), Some("3005"));
    }

    #[tokio::test]
    async fn values_with_separators_are_rejected() {
        let mut modem = modem(MockTransport::new()).await;
        assert!(modem.set_ip_address("10.0.0.1,99").is_err());
        assert!(modem.set_port("30\r05").is_err());
        assert!(modem.set_port("").is_err());
    }

    #[tokio::test]
    async fn set_timeout_applies_to_session() {
        let mut modem = modem(MockTransport::new()).await;
        assert_eq!(modem.timeout(), Duration::from_millis(1000));
        modem.set_timeout(Duration::from_millis(2000)).unwrap();
        assert_eq!(modem.timeout(), Duration::from_millis(2000));
        assert!(matches!(
            modem.set_timeout(Duration::ZERO),
            Err(Error::InvalidParameter(_))
        ));
    }

    // ---------------------------------------------------------------
    // Datagrams
    // ---------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn send_datagram_composes_hex_line() {
        let mut mock = MockTransport::new();
        mock.expect(
            b"AT+NSOST=0,192.168.1.10,3005,5,68656C6C6F\r",
            b"\r\n0,5\r\n\r\nOK\r\n",
        );
        let handle = mock.handle();

        let mut modem = modem(mock).await;
        modem.set_ip_address("192.168.1.10").unwrap();
        modem.set_port("3005").unwrap();
        modem.send_datagram(b"hello").await.unwrap();

        assert_eq!(
            sent_lines(&handle),
            vec!["AT+NSOST=0,192.168.1.10,3005,5,68656C6C6F\r"]
        );
        assert!(modem.hex_scratch_is_clear());
        assert!(modem.composer_is_clear());
    }

    #[tokio::test]
    async fn send_datagram_requires_ip_address() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let mut modem = modem(mock).await;
        modem.set_port("3005").unwrap();

        let err = modem.send_datagram(b"hello").await.unwrap_err();
        assert!(matches!(err, Error::NotConfigured("ip address")));
        assert!(handle.sent_data().is_empty());
    }

    #[tokio::test]
    async fn send_datagram_requires_port() {
        let mut modem = modem(MockTransport::new()).await;
        modem.set_ip_address("192.168.1.10").unwrap();

        let err = modem.send_datagram(b"hello").await.unwrap_err();
        assert!(matches!(err, Error::NotConfigured("port")));
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected_before_sending() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let mut modem = modem(mock).await;
        modem.set_ip_address("192.168.1.10").unwrap();
        modem.set_port("3005").unwrap();

        let err = modem.send_datagram(&[0u8; 101]).await.unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { encoded: 202, .. }));
        assert!(handle.sent_data().is_empty());
        assert!(modem.hex_scratch_is_clear());
    }

    #[tokio::test]
    async fn compose_overflow_clears_hex_scratch() {
        let mock = MockTransport::new();
        let mut modem = Bc95Builder::new()
            .compose_capacity(40)
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        modem.set_ip_address("192.168.1.10").unwrap();
        modem.set_port("3005").unwrap();

        let err = modem.send_datagram(&[0xAA; 20]).await.unwrap_err();
        assert!(matches!(err, Error::ComposeOverflow { .. }));
        assert!(modem.hex_scratch_is_clear());
        assert!(modem.composer_is_clear());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_clears_hex_scratch() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+NSOST=0,10.0.0.1,5683,2,6869\r", b"\r\nERROR\r\n");

        let mut modem = bounded_modem(mock).await;
        modem.set_ip_address("10.0.0.1").unwrap();
        modem.set_port("5683").unwrap();

        let err = modem.send_datagram(b"hi").await.unwrap_err();
        assert!(matches!(err, Error::PatternNeverMatched { attempts: 1, .. }));
        assert!(modem.hex_scratch_is_clear());
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_datagrams_do_not_leak_payload() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+NSOST=0,10.0.0.1,5683,3,414243\r", b"\r\n0,3\r\n\r\nOK\r\n");
        mock.expect(b"AT+NSOST=0,10.0.0.1,5683,1,5A\r", b"\r\n0,1\r\n\r\nOK\r\n");

        let mut modem = modem(mock).await;
        modem.set_ip_address("10.0.0.1").unwrap();
        modem.set_port("5683").unwrap();
        modem.send_datagram(b"ABC").await.unwrap();
        modem.send_datagram(b"Z").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn open_socket_then_send_and_close() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+NSOCR=DGRAM,17,4000,0\r", b"\r\n1\r\n\r\nOK\r\n");
        mock.expect(b"AT+NSOST=1,10.0.0.1,5683,1,00\r", b"\r\n1,1\r\n\r\nOK\r\n");
        mock.expect(b"AT+NSOCL=1\r", b"\r\nOK\r\n");

        let mut modem = modem(mock).await;
        modem.set_ip_address("10.0.0.1").unwrap();
        modem.set_port("5683").unwrap();
        assert_eq!(modem.open_udp_socket(4000).await.unwrap(), 1);
        assert_eq!(modem.socket(), 1);
        modem.send_datagram(&[0]).await.unwrap();
        modem.close_connection().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn close_connection_sends_socket_close() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+NSOCL=0\r", b"AT+NSOCL=0\r\n\r\nOK\r\n");
        let handle = mock.handle();

        let mut modem = modem(mock).await;
        modem.close_connection().await.unwrap();
        assert_eq!(sent_lines(&handle), vec!["AT+NSOCL=0\r"]);
    }

    // ---------------------------------------------------------------
    // Network attach
    // ---------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn connect_to_operator_runs_attach_sequence() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CGATT=1\r", b"AT+CGATT=1\r\n\r\nOK\r\n");
        mock.expect(b"AT+CGATT?\r", b"AT+CGATT?\r\n\r\n+CGATT:1\r\n\r\nOK\r\n");
        mock.expect(b"AT+CSQ\r", b"AT+CSQ\r\n\r\n+CSQ:20,0\r\n\r\nOK\r\n");
        let handle = mock.handle();

        let mut modem = modem(mock).await;
        let start = Instant::now();
        let quality = modem.connect_to_operator().await.unwrap();

        assert_eq!(quality, SignalQuality { rssi: 20, ber: 0 });
        assert_eq!(
            sent_lines(&handle),
            vec!["AT+CGATT=1\r", "AT+CGATT?\r", "AT+CSQ\r"]
        );
        assert!(start.elapsed() >= ATTACH_SETTLE);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_to_operator_stops_at_first_failure() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CGATT=1\r", b"\r\nOK\r\n");
        mock.expect(b"AT+CGATT?\r", b"\r\n+CGATT:0\r\n\r\nOK\r\n");
        let handle = mock.handle();

        let mut modem = bounded_modem(mock).await;
        let err = modem.connect_to_operator().await.unwrap_err();
        assert!(matches!(err, Error::PatternNeverMatched { .. }));
        assert_eq!(handle.send_count(b"AT+CSQ\r"), 0);
    }

    // ---------------------------------------------------------------
    // Identity
    // ---------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn identity_queries() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CGSN\r", b"\r\n+CGSN:490154203237518\r\n\r\nOK\r\n");
        mock.expect(
            b"AT+CGMR\r",
            b"\r\nSECURITY,V100R100C10B657SP2\r\n\r\nPROTOCOL,V100R100C10B657SP2\r\n\r\nOK\r\n",
        );
        mock.expect(b"AT+CGMM\r", b"\r\nBC95HB-02-STD_900\r\n\r\nOK\r\n");

        let mut modem = modem(mock).await;
        assert_eq!(modem.imei().await.unwrap(), "490154203237518");
        assert_eq!(
            modem.firmware_info().await.unwrap(),
            vec!["SECURITY,V100R100C10B657SP2", "PROTOCOL,V100R100C10B657SP2"]
        );
        assert_eq!(modem.hardware_info().await.unwrap(), "BC95HB-02-STD_900");
    }

    // ---------------------------------------------------------------
    // Power and initialization
    // ---------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn initialize_sends_setup_sequence() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+NCONFIG=AUTOCONNECT,TRUE\r", b"\r\nOK\r\n");
        mock.expect(b"AT+NCONFIG=CR_0354_0338_SCRAMBLING,TRUE\r", b"\r\nOK\r\n");
        mock.expect(b"ATE1\r", b"ATE1\r\n\r\nOK\r\n");
        mock.expect(b"ATE1\r", b"ATE1\r\n\r\nOK\r\n");
        mock.expect(b"AT\r", b"AT\r\n\r\nOK\r\n");
        let handle = mock.handle();

        let mut modem = Bc95Builder::new()
            .power_line(PowerLine::Dtr)
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        modem.initialize().await.unwrap();

        assert_eq!(handle.line_changes(), vec![(ControlLine::Dtr, true)]);
        assert_eq!(
            sent_lines(&handle),
            vec![
                "AT+NCONFIG=AUTOCONNECT,TRUE\r",
                "AT+NCONFIG=CR_0354_0338_SCRAMBLING,TRUE\r",
                "ATE1\r",
                "ATE1\r",
                "AT\r"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_without_power_line_skips_power_up() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+NCONFIG=AUTOCONNECT,TRUE\r", b"\r\nOK\r\n");
        mock.expect(b"AT+NCONFIG=CR_0354_0338_SCRAMBLING,TRUE\r", b"\r\nOK\r\n");
        mock.expect(b"ATE1\r", b"\r\nOK\r\n");
        mock.expect(b"ATE1\r", b"\r\nOK\r\n");
        mock.expect(b"AT\r", b"\r\nOK\r\n");
        let handle = mock.handle();

        let mut modem = modem(mock).await;
        modem.initialize().await.unwrap();
        assert!(handle.line_changes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_toggles_power_line_after_saving() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT&W\r", b"\r\nOK\r\n");
        let handle = mock.handle();

        let mut modem = Bc95Builder::new()
            .power_line(PowerLine::Rts)
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        let start = Instant::now();
        modem.reset().await.unwrap();

        assert_eq!(sent_lines(&handle), vec!["AT&W\r"]);
        assert_eq!(
            handle.line_changes(),
            vec![(ControlLine::Rts, false), (ControlLine::Rts, true)]
        );
        assert!(start.elapsed() >= RESET_STEP * 3);
    }

    #[tokio::test]
    async fn reset_without_power_line_is_unsupported() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let mut modem = modem(mock).await;

        let err = modem.reset().await.unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        assert!(handle.sent_data().is_empty());
        assert!(handle.line_changes().is_empty());
    }

    #[tokio::test]
    async fn power_control_without_line_is_unsupported() {
        let mut modem = modem(MockTransport::new()).await;
        assert!(matches!(modem.power_on().await, Err(Error::Unsupported(_))));
        assert!(matches!(modem.power_off().await, Err(Error::Unsupported(_))));
    }

    // ---------------------------------------------------------------
    // Generic commands
    // ---------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn send_command_returns_response() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+NBAND?\r", b"\r\n+NBAND:8\r\n\r\nOK\r\n");
        mock.expect(b"AT+NRB\r", b"");

        let mut modem = modem(mock).await;
        let resp = modem.send_command("AT+NBAND?", "OK\r\n").await.unwrap();
        assert!(resp.contains("+NBAND:8"));
        modem.send_command_once("AT+NRB").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn send_raw_is_verbatim() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CFUN=1\r\n", b"\r\nOK\r\n");

        let mut modem = modem(mock).await;
        modem.send_raw(b"AT+CFUN=1\r\n", "OK\r\n").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_token_ends_a_stuck_transaction() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CGATT=1\r", b"");

        let mut modem = modem(mock).await;
        let cancel = modem.cancel_token();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            cancel.cancel();
        });

        let err = modem.connect_to_operator().await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_session_sends_no_datagram() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+NSOST=0,10.0.0.1,5683,2,6869\r", b"\r\n0,2\r\n\r\nOK\r\n");
        let handle = mock.handle();

        let mut modem = modem(mock).await;
        modem.set_ip_address("10.0.0.1").unwrap();
        modem.set_port("5683").unwrap();
        modem.cancel_token().cancel();

        let err = modem.send_datagram(b"hi").await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(handle.sent_data().is_empty());
        assert!(modem.hex_scratch_is_clear());
        assert!(modem.composer_is_clear());

        modem.set_cancel_token(CancellationToken::new());
        modem.send_datagram(b"hi").await.unwrap();
        assert_eq!(sent_lines(&handle), vec!["AT+NSOST=0,10.0.0.1,5683,2,6869\r"]);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_to_operator_waits_out_a_slow_attach() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CGATT=1\r", b"AT+CGATT=1\r\n\r\nOK\r\n");
        // Half a minute of "+CGATT:0", one answer per retransmission.
        mock.expect_repeating(
            b"AT+CGATT?\r",
            b"AT+CGATT?\r\n\r\n+CGATT:0\r\n\r\nOK\r\n",
            30,
        );
        mock.expect(b"AT+CGATT?\r", b"AT+CGATT?\r\n\r\n+CGATT:1\r\n\r\nOK\r\n");
        mock.expect(b"AT+CSQ\r", b"AT+CSQ\r\n\r\n+CSQ:12,0\r\n\r\nOK\r\n");
        let handle = mock.handle();

        let mut modem = modem(mock).await;
        let start = Instant::now();
        let quality = modem.connect_to_operator().await.unwrap();

        assert_eq!(quality, SignalQuality { rssi: 12, ber: 0 });
        assert_eq!(handle.send_count(b"AT+CGATT?\r"), 31);
        assert!(start.elapsed() > Duration::from_secs(30));
    }

    #[tokio::test]
    async fn into_transport_releases_the_transport() {
        let modem = modem(MockTransport::new()).await;
        let transport = modem.into_transport();
        assert!(transport.is_connected());
    }
}
