//! BC95 AT command vocabulary and response parsers.
//!
//! Plain commands are `&'static str` constants handed to the transaction
//! engine as they are. Commands with parameters are described by a keyword
//! and field helpers and assembled by the session's
//! [`Composer`](nbiot_at::Composer).
//!
//! The parsers are pure: they take the text of a completed transaction,
//! echo and final status included, and pull the payload lines out of it.
//!
//! # BC95 command reference
//!
//! Based on the Quectel BC95 AT Commands Manual. The modem answers every
//! command with `\r\n`-framed lines and a final `OK` or `ERROR`; with `ATE1`
//! active the command line itself is echoed first.

use nbiot_at::protocol;
use nbiot_core::{Error, Result, SignalQuality};

// ---------------------------------------------------------------
// Plain commands
// ---------------------------------------------------------------

/// Attention; the modem answers `OK` once it is ready.
pub const ATTENTION: &str = "AT";
/// Enable command echo.
pub const ECHO_ON: &str = "ATE1";
/// Store the current configuration in non-volatile memory.
pub const SAVE_CONFIGURATION: &str = "AT&W";
/// Request the IMEI.
pub const REQUEST_IMEI: &str = "AT+CGSN";
/// Request the firmware revision.
pub const REQUEST_FIRMWARE: &str = "AT+CGMR";
/// Request the model identification.
pub const REQUEST_MODEL: &str = "AT+CGMM";
/// Request signal quality.
pub const SIGNAL_QUALITY: &str = "AT+CSQ";
/// Attach to the packet domain.
pub const ATTACH: &str = "AT+CGATT=1";
/// Query packet domain attach state.
pub const ATTACH_STATUS: &str = "AT+CGATT?";

/// Status line reported once the modem is attached.
pub const ATTACHED: &str = "+CGATT:1\r\n";

// ---------------------------------------------------------------
// Parameterised commands
// ---------------------------------------------------------------

/// Keyword of the modem configuration command.
pub const CONFIG_KEYWORD: &str = "AT+NCONFIG=";
/// Configuration key for automatic network registration after power-up.
pub const CONFIG_AUTOCONNECT: &str = "AUTOCONNECT";
/// Configuration key for the CR 0354/0338 scrambling feature.
pub const CONFIG_SCRAMBLING: &str = "CR_0354_0338_SCRAMBLING";

/// Keyword of the socket-create command.
pub const SOCKET_CREATE_KEYWORD: &str = "AT+NSOCR=";
/// Keyword of the socket-close command.
pub const SOCKET_CLOSE_KEYWORD: &str = "AT+NSOCL=";
/// Socket type for UDP.
pub const SOCKET_TYPE_DATAGRAM: &str = "DGRAM";
/// IP protocol number of UDP.
pub const PROTOCOL_UDP: &str = "17";
/// Do not deliver incoming datagrams as unsolicited messages.
pub const RECEIVE_CONTROL_IGNORE: &str = "0";

/// Socket the session uses until the modem assigns another one.
pub const DEFAULT_SOCKET: u8 = 0;
/// Local port the session binds its UDP socket to by default.
pub const DEFAULT_LOCAL_PORT: u16 = 3005;

/// The `TRUE`/`FALSE` field of an `AT+NCONFIG` line.
pub fn config_flag(on: bool) -> &'static str {
    if on { "TRUE" } else { "FALSE" }
}

/// Fields of a socket-create line for a UDP socket bound to `local_port`.
pub fn udp_socket_fields(local_port: u16) -> [String; 4] {
    [
        SOCKET_TYPE_DATAGRAM.to_string(),
        PROTOCOL_UDP.to_string(),
        local_port.to_string(),
        RECEIVE_CONTROL_IGNORE.to_string(),
    ]
}

// ---------------------------------------------------------------
// Response parsers
// ---------------------------------------------------------------

/// Payload lines of a response: everything except the echoed `command`
/// and the final `OK`.
pub fn info_lines<'a>(text: &'a str, command: &str) -> Vec<&'a str> {
    protocol::lines(text)
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != command && *line != "OK")
        .collect()
}

/// Parse the `+CSQ:<rssi>,<ber>` line of an `AT+CSQ` response.
pub fn parse_signal_quality(text: &str) -> Result<SignalQuality> {
    let line = protocol::lines(text)
        .find_map(|line| line.trim().strip_prefix("+CSQ:"))
        .ok_or_else(|| Error::Protocol(format!("no +CSQ line in response {text:?}")))?;

    let (rssi, ber) = line
        .split_once(',')
        .ok_or_else(|| Error::Protocol(format!("malformed +CSQ line {line:?}")))?;
    let rssi = parse_field(rssi, "rssi")?;
    let ber = parse_field(ber, "ber")?;
    Ok(SignalQuality { rssi, ber })
}

fn parse_field(value: &str, name: &str) -> Result<u8> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Protocol(format!("invalid {name} value {value:?}")))
}

/// Parse the IMEI from an `AT+CGSN` response.
///
/// Firmware revisions differ in whether the number carries a `+CGSN:`
/// prefix; both forms are accepted.
pub fn parse_imei(text: &str) -> Result<String> {
    info_lines(text, REQUEST_IMEI)
        .into_iter()
        .map(|line| line.strip_prefix("+CGSN:").unwrap_or(line).trim())
        .find(|line| !line.is_empty() && line.bytes().all(|b| b.is_ascii_digit()))
        .map(str::to_string)
        .ok_or_else(|| Error::Protocol(format!("no IMEI in response {text:?}")))
}

/// Parse the first payload line of an identification query such as
/// `AT+CGMM`.
pub fn parse_identification(text: &str, command: &str) -> Result<String> {
    info_lines(text, command)
        .first()
        .map(|line| line.to_string())
        .ok_or_else(|| Error::Protocol(format!("empty response to {command}")))
}

/// Parse the socket number returned by a socket-create command.
pub fn parse_socket_id(text: &str) -> Result<u8> {
    let line = info_lines(text, "")
        .into_iter()
        .find(|line| !line.starts_with("AT"))
        .ok_or_else(|| Error::Protocol(format!("no socket number in response {text:?}")))?;
    line.parse()
        .map_err(|_| Error::Protocol(format!("invalid socket number {line:?}")))
}
