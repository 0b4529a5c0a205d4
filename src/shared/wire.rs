//! wire.rs
//! Messages exchanged between the roles and their line-oriented text form.
//!
//! - `Data{n}` <-> `DATA_<n>`
//! - `Exit`    <-> `EXIT`
//! - `Ack{n}`  <-> `ACK_DATA_<n>`

use std::{fmt, str::FromStr};

use crate::shared::error::WireError;

const DATA_PREFIX: &str = "DATA_";
const ACK_PREFIX: &str = "ACK_DATA_";
const EXIT_TAG: &str = "EXIT";

/// Master -> slave traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    Data { sequence: u64 },
    /// Sentinel; always the last item on its channel.
    Exit,
}

/// Slave -> master traffic, one per received `Data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub sequence: u64,
}

fn parse_sequence(line: &str, digits: &str) -> Result<u64, WireError> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(WireError(line.to_string()));
    }
    digits.parse().map_err(|_| WireError(line.to_string()))
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Data { sequence } => write!(f, "{}{}", DATA_PREFIX, sequence),
            Message::Exit => f.write_str(EXIT_TAG),
        }
    }
}

impl FromStr for Message {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim_end_matches(&['\r', '\n'][..]);
        if line == EXIT_TAG {
            return Ok(Message::Exit);
        }
        match line.strip_prefix(DATA_PREFIX) {
            Some(digits) => Ok(Message::Data {
                sequence: parse_sequence(line, digits)?,
            }),
            None => Err(WireError(line.to_string())),
        }
    }
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", ACK_PREFIX, self.sequence)
    }
}

impl FromStr for Ack {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim_end_matches(&['\r', '\n'][..]);
        match line.strip_prefix(ACK_PREFIX) {
            Some(digits) => Ok(Ack {
                sequence: parse_sequence(line, digits)?,
            }),
            None => Err(WireError(line.to_string())),
        }
    }
}
