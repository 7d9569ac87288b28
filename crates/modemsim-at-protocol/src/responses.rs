//! Responses sent from the emulated modem to the peer.
//!
//! Every command gets exactly one response. The wire strings below are what
//! the peer expects byte for byte, including their slightly irregular line
//! breaks, so they are kept as literal constants.

use crate::error::{ProtocolError, ProtocolResult};

/// Final result code for success.
pub const REPLY_OK: &str = "\r\nOK\r\n";
/// Final result code for failure.
pub const REPLY_ERROR: &str = "\r\nERROR\r\n";
/// Manufacturer identification followed by `OK`.
pub const REPLY_MANUFACTURER: &str = "\r\n\"Sony Ericsson\"\r\n\r\nOK\r\n";
/// Placeholder model identification followed by `OK`.
pub const REPLY_MODEL: &str = "\r\nUnknown\r\nOK\r\n";
/// Storage selected: 0 messages used, capacity 10.
pub const REPLY_MESSAGE_STORAGE: &str = "+CPMS:0,10\r\nOK\r\n";
/// Prefix of a message read response.
pub const REPLY_READ_MESSAGE: &str = "+CMGR:";
/// Prefix of the new message indication.
pub const UNSOLICITED_NEW_MESSAGE: &str = "+CMTI:\"SM\",";

/// Message status reported by `+CMGR`: "received read".
const STATUS_READ: u8 = 1;

/// A response or unsolicited result code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `OK`.
    Ok,

    /// `ERROR`.
    Error,

    /// Manufacturer identification.
    Manufacturer,

    /// Model identification.
    Model,

    /// Preferred storage acknowledgment.
    StorageSelected,

    /// A message read from the pending list.
    MessageRead {
        /// Hex SMS-DELIVER PDU.
        pdu: String,
    },

    /// Unsolicited notification that a message arrived at `index`.
    NewMessage {
        /// Index of the message in the pending list.
        index: usize,
    },
}

impl Response {
    /// Encode the response as the exact string written to the peer.
    pub fn encode(&self) -> String {
        match self {
            Response::Ok => REPLY_OK.to_string(),
            Response::Error => REPLY_ERROR.to_string(),
            Response::Manufacturer => REPLY_MANUFACTURER.to_string(),
            Response::Model => REPLY_MODEL.to_string(),
            Response::StorageSelected => REPLY_MESSAGE_STORAGE.to_string(),
            Response::MessageRead { pdu } => {
                // The second field would carry the sender's phone book name;
                // no lookup is done so it stays empty.
                format!(
                    "{}{},,\r\n{}\r\n{}",
                    REPLY_READ_MESSAGE, STATUS_READ, pdu, REPLY_OK
                )
            }
            Response::NewMessage { index } => {
                format!("\r\n{}{}\r\n", UNSOLICITED_NEW_MESSAGE, index)
            }
        }
    }

    /// Parse a single response line as seen by the peer (trimmed of line breaks).
    ///
    /// Only the result codes and information lines this modem emits are
    /// recognized. Multi-line responses have to be split by the caller.
    pub fn parse_line(line: &str) -> ProtocolResult<Response> {
        let line = line.trim();
        match line {
            "OK" => return Ok(Response::Ok),
            "ERROR" => return Ok(Response::Error),
            "\"Sony Ericsson\"" => return Ok(Response::Manufacturer),
            "Unknown" => return Ok(Response::Model),
            "+CPMS:0,10" => return Ok(Response::StorageSelected),
            _ => {}
        }

        if let Some(index) = line.strip_prefix(UNSOLICITED_NEW_MESSAGE) {
            let index = index
                .parse()
                .map_err(|_| ProtocolError::InvalidIndex(index.to_string()))?;
            return Ok(Response::NewMessage { index });
        }

        Err(ProtocolError::UnexpectedResponse(line.to_string()))
    }

    /// Check if this is an error response.
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_fixed_replies() {
        assert_eq!(Response::Ok.encode(), "\r\nOK\r\n");
        assert_eq!(Response::Error.encode(), "\r\nERROR\r\n");
        assert_eq!(
            Response::Manufacturer.encode(),
            "\r\n\"Sony Ericsson\"\r\n\r\nOK\r\n"
        );
        assert_eq!(Response::Model.encode(), "\r\nUnknown\r\nOK\r\n");
        assert_eq!(Response::StorageSelected.encode(), "+CPMS:0,10\r\nOK\r\n");
    }

    #[test]
    fn test_encode_message_read() {
        let response = Response::MessageRead {
            pdu: "ABCD".to_string(),
        };
        assert_eq!(response.encode(), "+CMGR:1,,\r\nABCD\r\n\r\nOK\r\n");
    }

    #[test]
    fn test_encode_new_message() {
        let response = Response::NewMessage { index: 7 };
        assert_eq!(response.encode(), "\r\n+CMTI:\"SM\",7\r\n");
    }

    #[test]
    fn test_parse_notification_line() {
        assert_eq!(
            Response::parse_line("+CMTI:\"SM\",12\r\n").unwrap(),
            Response::NewMessage { index: 12 }
        );
    }

    #[test]
    fn test_parse_result_codes() {
        assert_eq!(Response::parse_line("OK").unwrap(), Response::Ok);
        let error = Response::parse_line("\r\nERROR\r\n").unwrap();
        assert!(error.is_error());
    }
}
