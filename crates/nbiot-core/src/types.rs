//! Shared types used across the driver crates.

use std::fmt;

/// Which serial control line drives the modem's power-enable input.
///
/// The NB-IoT shield gates the modem's supply through an enable pin. When
/// that pin is wired to one of the host's serial control lines, the session
/// can power-cycle the modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PowerLine {
    /// No power-enable control (default). Hardware reset is unavailable.
    #[default]
    None,
    /// Power-enable via the DTR serial line.
    Dtr,
    /// Power-enable via the RTS serial line.
    Rts,
}

/// How many times the transaction engine transmits a command before giving
/// up on the expected response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RetryPolicy {
    /// Retransmit after every timeout, forever.
    ///
    /// A modem that never produces the expected response blocks the caller
    /// until the transaction is cancelled.
    #[default]
    Unbounded,
    /// Give up after `max_attempts` transmissions have each waited a full
    /// timeout without a match.
    Bounded { max_attempts: u32 },
}

impl RetryPolicy {
    /// Whether another transmission is allowed after `attempts` so far.
    pub fn allows(&self, attempts: u32) -> bool {
        match self {
            RetryPolicy::Unbounded => true,
            RetryPolicy::Bounded { max_attempts } => attempts < *max_attempts,
        }
    }
}

/// Received signal quality as reported by `AT+CSQ`.
///
/// `rssi` is the 0–31 index defined by 3GPP TS 27.007 (99 = unknown);
/// `ber` is the channel bit error rate index (99 = unknown).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalQuality {
    pub rssi: u8,
    pub ber: u8,
}

impl SignalQuality {
    /// Value the modem reports when a figure is not known.
    pub const UNKNOWN: u8 = 99;

    /// Convert the RSSI index to dBm.
    ///
    /// Index 0 is -113 dBm or less, 31 is -51 dBm or more, in 2 dB steps.
    /// Returns `None` for the unknown marker or out-of-range indices.
    pub fn rssi_dbm(&self) -> Option<i16> {
        if self.rssi <= 31 {
            Some(-113 + 2 * i16::from(self.rssi))
        } else {
            None
        }
    }

    /// Whether the modem currently reports any usable signal.
    pub fn has_signal(&self) -> bool {
        self.rssi != Self::UNKNOWN && self.rssi > 0
    }
}

impl fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rssi_dbm() {
            Some(dbm) => write!(f, "{dbm} dBm (rssi {}, ber {})", self.rssi, self.ber),
            None => write!(f, "unknown (rssi {}, ber {})", self.rssi, self.ber),
        }
    }
}
