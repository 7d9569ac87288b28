//! Outbound text messages and their SMS-DELIVER PDU encoding.
//!
//! The peer only looks at the user data, so every header field is a fixed
//! placeholder. The layout follows the SMS-DELIVER TPDU:
//!
//! ```text
//! +------+------+------+------+--------------+-----+-----+----------------+-----+---------+
//! | SMSC | FO   | OA   | TOA  | OA digits    | PID | DCS | SCTS           | UDL | UD      |
//! | 00   | 04   | 0B   | C8   | 7238880999F1 | 00  | 00  | 99309251619580 | nn  | packed  |
//! +------+------+------+------+--------------+-----+-----+----------------+-----+---------+
//! ```
//!
//! These placeholders are part of the wire contract with the peer and must
//! not be changed.

use crate::gsm7;

/// Length of the SMSC information (none).
pub const PDU_SMSC_LENGTH: &str = "00";
/// First octet of an SMS-DELIVER message.
pub const PDU_FIRST_OCTET: &str = "04";
/// Originator address length.
pub const PDU_ADDRESS_LENGTH: &str = "0B";
/// Originator type of address.
pub const PDU_ADDRESS_TYPE: &str = "C8";
/// Originator number, semi-octet encoded.
pub const PDU_SENDER_NUMBER: &str = "7238880999F1";
/// TP-PID.
pub const PDU_PROTOCOL_ID: &str = "00";
/// TP-DCS: GSM 7-bit default alphabet.
pub const PDU_DATA_CODING: &str = "00";
/// TP-SCTS service centre timestamp.
pub const PDU_TIMESTAMP: &str = "99309251619580";

/// One outbound text message.
///
/// Immutable once constructed. By convention a message is at most 160
/// characters long, but this is not enforced.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageUnit {
    text: String,
}

impl MessageUnit {
    /// Create a new message unit.
    pub fn new(text: impl Into<String>) -> Self {
        MessageUnit { text: text.into() }
    }

    /// The message text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The packed 7-bit user data.
    pub fn user_data(&self) -> Vec<u8> {
        gsm7::encode(&self.text)
    }

    /// The TP-UDL value written into the PDU.
    ///
    /// Computed as `floor(packed_len * 8 / 7)`, which recovers the septet
    /// count from the packed length. Clamped so it always fits one octet.
    pub fn user_data_length(&self) -> u8 {
        user_data_length(self.user_data().len())
    }

    /// Encode the message as an upper-case hex SMS-DELIVER PDU.
    ///
    /// Never fails; the empty string encodes to a PDU with no user data.
    pub fn to_pdu_hex(&self) -> String {
        let user_data = self.user_data();
        let mut pdu = String::with_capacity(44 + user_data.len() * 2);

        pdu.push_str(PDU_SMSC_LENGTH);
        pdu.push_str(PDU_FIRST_OCTET);
        pdu.push_str(PDU_ADDRESS_LENGTH);
        pdu.push_str(PDU_ADDRESS_TYPE);
        pdu.push_str(PDU_SENDER_NUMBER);
        pdu.push_str(PDU_PROTOCOL_ID);
        pdu.push_str(PDU_DATA_CODING);
        pdu.push_str(PDU_TIMESTAMP);
        pdu.push_str(&format!("{:02X}", user_data_length(user_data.len())));
        pdu.push_str(&hex::encode_upper(&user_data));

        pdu
    }
}

impl From<&str> for MessageUnit {
    fn from(text: &str) -> Self {
        MessageUnit::new(text)
    }
}

impl From<String> for MessageUnit {
    fn from(text: String) -> Self {
        MessageUnit::new(text)
    }
}

fn user_data_length(packed_len: usize) -> u8 {
    (packed_len * 8 / 7).min(0xFF) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "00040BC87238880999F1000099309251619580";

    #[test]
    fn test_pdu_hi() {
        let msg = MessageUnit::new("Hi");
        assert_eq!(msg.to_pdu_hex(), format!("{}02C834", HEADER));
        assert_eq!(msg.user_data_length(), 2);
    }

    #[test]
    fn test_pdu_empty() {
        let msg = MessageUnit::new("");
        assert_eq!(msg.to_pdu_hex(), format!("{}00", HEADER));
    }

    #[test]
    fn test_pdu_length_field_recovers_septet_count() {
        // 10 septets pack into 9 octets; 9 * 8 / 7 = 10
        let msg = MessageUnit::new("hellohello");
        assert_eq!(msg.to_pdu_hex(), format!("{}0AE8329BFD4697D9EC37", HEADER));

        // 12 septets pack into 11 octets; 11 * 8 / 7 = 12
        let msg = MessageUnit::new("Hello world!");
        assert_eq!(msg.to_pdu_hex(), format!("{}0CC8329BFD06DDDF72363904", HEADER));
    }

    #[test]
    fn test_pdu_full_length_message() {
        let msg = MessageUnit::new("a".repeat(160));
        // 160 septets -> 140 octets -> 160 (0xA0)
        assert_eq!(msg.user_data().len(), 140);
        assert_eq!(&msg.to_pdu_hex()[HEADER.len()..HEADER.len() + 2], "A0");
    }

    #[test]
    fn test_pdu_length_is_clamped_to_one_octet() {
        let msg = MessageUnit::new("a".repeat(400));
        assert_eq!(msg.user_data_length(), 0xFF);
        assert_eq!(&msg.to_pdu_hex()[HEADER.len()..HEADER.len() + 2], "FF");
    }

    #[test]
    fn test_pdu_is_deterministic() {
        let text = "Meet at the usual place {7pm} €5";
        assert_eq!(
            MessageUnit::new(text).to_pdu_hex(),
            MessageUnit::new(text).to_pdu_hex()
        );
    }

    #[test]
    fn test_pdu_header_is_fixed() {
        for text in ["", "x", "a longer message with digits 0123456789"] {
            assert!(MessageUnit::new(text).to_pdu_hex().starts_with(HEADER));
        }
    }
}
