//! Emulated Handset Modem AT Protocol
//!
//! This crate provides the protocol half of the modem emulator: the handful of
//! AT commands a peer device issues to bring a "phone" up, the modem-style
//! responses it expects back, and the SMS-DELIVER PDUs used to hand it queued
//! text messages.
//!
//! # Protocol Overview
//!
//! The protocol is a line-based text interface over a duplex byte stream:
//!
//! - **Commands** (peer → modem): ASCII lines terminated with `\r\n`. A bare
//!   `\n` or a bare `\r` is also accepted as a terminator.
//! - **Responses** (modem → peer): exactly one response per command, using the
//!   usual `\r\nOK\r\n` / `\r\nERROR\r\n` result codes.
//! - **Unsolicited notifications** (modem → peer): `\r\n+CMTI:"SM",<index>\r\n`
//!   announces that a new message is available at `<index>`.
//!
//! # Supported Commands
//!
//! | Command      | Response                                   |
//! |--------------|--------------------------------------------|
//! | `ATE0`       | `OK`                                       |
//! | `AT+CGMI`    | manufacturer identity                      |
//! | `AT+CGMM`    | placeholder model                          |
//! | `AT+CPMS...` | storage selected, capacity 10              |
//! | `AT+CMGR=<n>`| message `n` as a hex PDU, then `OK`        |
//! | anything else| `OK`                                       |
//!
//! # Example
//!
//! ```rust
//! use modemsim_at_protocol::{handle_command, MessageUnit};
//!
//! let pending = vec![MessageUnit::new("Hi")];
//! let reply = handle_command("AT+CMGR=0", &pending);
//! assert!(reply.starts_with("+CMGR:1,,\r\n0004"));
//! assert!(reply.ends_with("\r\nOK\r\n"));
//! ```

mod codec;
mod commands;
mod error;
pub mod gsm7;
mod interpreter;
mod pdu;
mod responses;

pub use codec::*;
pub use commands::*;
pub use error::*;
pub use interpreter::*;
pub use pdu::*;
pub use responses::*;
