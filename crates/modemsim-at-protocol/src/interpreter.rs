//! The command interpreter: one command line in, one response out.
//!
//! The interpreter keeps no session state. Echo is never tracked; the peer
//! always turns it off first and nothing here depends on it.

use crate::commands::AtCommand;
use crate::error::{ProtocolError, ProtocolResult};
use crate::pdu::MessageUnit;
use crate::responses::Response;

/// One interpreted command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// The parsed command, `None` when the line was malformed.
    pub command: Option<AtCommand>,
    /// What to send back.
    pub response: Response,
}

impl Reply {
    /// Label for the command, `"malformed"` when it did not parse.
    pub fn command_name(&self) -> &'static str {
        self.command.as_ref().map_or("malformed", AtCommand::name)
    }
}

/// Parse a command line and work out its response.
///
/// Protocol faults (a malformed or out-of-range `AT+CMGR=` index) are
/// answered with [`Response::Error`]; they never end the session.
pub fn interpret(line: &str, pending: &[MessageUnit]) -> Reply {
    let command = match AtCommand::parse(line) {
        Ok(command) => command,
        Err(e) => {
            log::debug!("Rejecting {:?}: {}", line, e);
            return Reply {
                command: None,
                response: Response::Error,
            };
        }
    };
    let response = respond_to(&command, pending).unwrap_or_else(|e| {
        log::debug!("Rejecting {:?}: {}", line, e);
        Response::Error
    });
    Reply {
        command: Some(command),
        response,
    }
}

/// Map a command line to its response.
pub fn respond(line: &str, pending: &[MessageUnit]) -> Response {
    interpret(line, pending).response
}

/// Map an already parsed command to its response.
pub fn respond_to(command: &AtCommand, pending: &[MessageUnit]) -> ProtocolResult<Response> {
    let response = match command {
        AtCommand::EchoOff => Response::Ok,
        AtCommand::Manufacturer => Response::Manufacturer,
        AtCommand::Model => Response::Model,
        AtCommand::PreferredStorage => Response::StorageSelected,
        AtCommand::ReadMessage { index } => {
            let message = pending
                .get(*index)
                .ok_or(ProtocolError::IndexOutOfRange {
                    index: *index,
                    len: pending.len(),
                })?;
            Response::MessageRead {
                pdu: message.to_pdu_hex(),
            }
        }
        // Permissive default: unknown commands are acknowledged
        AtCommand::Unrecognized(_) => Response::Ok,
    };
    Ok(response)
}

/// Handle a command line and return the exact string to send to the peer.
pub fn handle_command(line: &str, pending: &[MessageUnit]) -> String {
    respond(line, pending).encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(texts: &[&str]) -> Vec<MessageUnit> {
        texts.iter().map(|t| MessageUnit::new(*t)).collect()
    }

    #[test]
    fn test_fixed_commands_ignore_list_contents() {
        for list in [pending(&[]), pending(&["one", "two", "three"])] {
            assert_eq!(handle_command("ATE0", &list), "\r\nOK\r\n");
            assert_eq!(
                handle_command("AT+CGMI", &list),
                "\r\n\"Sony Ericsson\"\r\n\r\nOK\r\n"
            );
            assert_eq!(handle_command("AT+CGMM", &list), "\r\nUnknown\r\nOK\r\n");
            assert_eq!(
                handle_command("AT+CPMS=\"SM\",\"SM\",\"SM\"", &list),
                "+CPMS:0,10\r\nOK\r\n"
            );
        }
    }

    #[test]
    fn test_unrecognized_commands_are_acknowledged() {
        let list = pending(&["x"]);
        for line in ["", "AT", "AT+CNMI=2,1", "ATZ", "garbage \u{7f}", "AT+CMGR", "at+cmgr=0"] {
            assert_eq!(handle_command(line, &list), "\r\nOK\r\n", "line {:?}", line);
        }
    }

    #[test]
    fn test_read_message() {
        let list = pending(&["Hi"]);
        let reply = handle_command("AT+CMGR=0", &list);

        assert!(reply.starts_with("+CMGR:1,,\r\n0004"));
        assert!(reply.ends_with("\r\n\r\nOK\r\n"));
        assert_eq!(
            reply,
            "+CMGR:1,,\r\n00040BC87238880999F100009930925161958002C834\r\n\r\nOK\r\n"
        );
    }

    #[test]
    fn test_read_message_out_of_range() {
        let list = pending(&["a", "b"]);
        assert_eq!(handle_command("AT+CMGR=5", &list), "\r\nERROR\r\n");
        assert_eq!(handle_command("AT+CMGR=2", &list), "\r\nERROR\r\n");
        assert_eq!(handle_command("AT+CMGR=0", &[]), "\r\nERROR\r\n");
    }

    #[test]
    fn test_read_message_bad_index() {
        let list = pending(&["a"]);
        assert_eq!(handle_command("AT+CMGR=abc", &list), "\r\nERROR\r\n");
        assert_eq!(handle_command("AT+CMGR=", &list), "\r\nERROR\r\n");
        assert_eq!(
            handle_command("AT+CMGR=99999999999999999999999", &list),
            "\r\nERROR\r\n"
        );
    }

    #[test]
    fn test_read_message_returns_message_at_index() {
        let list = pending(&["first", "second", "third"]);
        for (i, msg) in list.iter().enumerate() {
            let response = respond(&format!("AT+CMGR={}", i), &list);
            assert_eq!(
                response,
                Response::MessageRead {
                    pdu: msg.to_pdu_hex()
                }
            );
        }
    }

    #[test]
    fn test_respond_to_reports_range_error() {
        let err = respond_to(&AtCommand::ReadMessage { index: 3 }, &[]).unwrap_err();
        assert!(matches!(err, ProtocolError::IndexOutOfRange { index: 3, len: 0 }));
    }

    #[test]
    fn test_interpret_keeps_parsed_command() {
        let list = pending(&["a"]);

        let reply = interpret("AT+CMGR=4", &list);
        assert_eq!(reply.command, Some(AtCommand::ReadMessage { index: 4 }));
        assert_eq!(reply.command_name(), "read_message");
        assert!(reply.response.is_error());

        let reply = interpret("AT+CMGR=x", &list);
        assert_eq!(reply.command, None);
        assert_eq!(reply.command_name(), "malformed");
        assert!(reply.response.is_error());

        assert_eq!(interpret("ATZ", &list).command_name(), "unrecognized");
    }
}
