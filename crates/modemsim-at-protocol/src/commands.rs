//! Commands received from the peer device.
//!
//! Only the commands a peer needs to bring the modem up are modelled:
//! - Echo control (`ATE0`)
//! - Identification (`AT+CGMI`, `AT+CGMM`)
//! - Message storage selection (`AT+CPMS...`)
//! - Message retrieval (`AT+CMGR=<n>`)
//!
//! Everything else is kept verbatim as [`AtCommand::Unrecognized`].

use crate::codec::encode_line;
use crate::error::{ProtocolError, ProtocolResult};

/// Disable command echo.
pub const CMD_ECHO_OFF: &str = "ATE0";
/// Request manufacturer identification.
pub const CMD_MANUFACTURER: &str = "AT+CGMI";
/// Request model identification.
pub const CMD_MODEL: &str = "AT+CGMM";
/// Preferred message storage prefix.
pub const CMD_PREFERRED_STORAGE: &str = "AT+CPMS";
/// Read message prefix.
pub const CMD_READ_MESSAGE: &str = "AT+CMGR=";

/// A command line received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtCommand {
    /// `ATE0`: turn command echo off.
    EchoOff,

    /// `AT+CGMI`: manufacturer identification.
    Manufacturer,

    /// `AT+CGMM`: model identification.
    Model,

    /// `AT+CPMS...`: select preferred message storage.
    /// The storage arguments are ignored.
    PreferredStorage,

    /// `AT+CMGR=<n>`: read the pending message at `index`.
    ReadMessage {
        /// Index into the pending message list.
        index: usize,
    },

    /// Any other line. Acknowledged but not acted on.
    Unrecognized(String),
}

impl AtCommand {
    /// Parse a command line (without its terminator).
    ///
    /// Matching is case-sensitive. `ATE0`, `AT+CGMI` and `AT+CGMM` must match
    /// exactly; `AT+CPMS` and `AT+CMGR=` match as prefixes.
    ///
    /// Returns an error only for a malformed `AT+CMGR=` argument.
    pub fn parse(line: &str) -> ProtocolResult<AtCommand> {
        match line {
            CMD_ECHO_OFF => return Ok(AtCommand::EchoOff),
            CMD_MANUFACTURER => return Ok(AtCommand::Manufacturer),
            CMD_MODEL => return Ok(AtCommand::Model),
            _ => {}
        }

        if line.starts_with(CMD_PREFERRED_STORAGE) {
            return Ok(AtCommand::PreferredStorage);
        }

        if let Some(argument) = line.strip_prefix(CMD_READ_MESSAGE) {
            let index = argument
                .parse::<usize>()
                .map_err(|_| ProtocolError::InvalidIndex(argument.to_string()))?;
            return Ok(AtCommand::ReadMessage { index });
        }

        Ok(AtCommand::Unrecognized(line.to_string()))
    }

    /// Short name used for logging and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            AtCommand::EchoOff => "echo_off",
            AtCommand::Manufacturer => "manufacturer",
            AtCommand::Model => "model",
            AtCommand::PreferredStorage => "preferred_storage",
            AtCommand::ReadMessage { .. } => "read_message",
            AtCommand::Unrecognized(_) => "unrecognized",
        }
    }

    /// Encode the command as a peer would send it, with `\r\n` appended.
    ///
    /// `PreferredStorage` is rendered with the `"SM"` storage argument.
    pub fn encode(&self) -> Vec<u8> {
        let line = match self {
            AtCommand::EchoOff => CMD_ECHO_OFF.to_string(),
            AtCommand::Manufacturer => CMD_MANUFACTURER.to_string(),
            AtCommand::Model => CMD_MODEL.to_string(),
            AtCommand::PreferredStorage => format!("{}=\"SM\"", CMD_PREFERRED_STORAGE),
            AtCommand::ReadMessage { index } => format!("{}{}", CMD_READ_MESSAGE, index),
            AtCommand::Unrecognized(line) => line.clone(),
        };
        encode_line(&line)
    }
}
