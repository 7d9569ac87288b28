//! GSM 03.38 default alphabet and 7-bit septet packing.

/// Escape septet that introduces a character from the extension table.
pub const ESCAPE: u8 = 0x1B;

/// Septet substituted for characters outside the GSM alphabet (`?`).
pub const UNKNOWN: u8 = 0x3F;

/// The GSM default alphabet, indexed by septet value.
///
/// Slot `0x1B` is the escape code and never matches a character.
const DEFAULT_ALPHABET: [char; 128] = [
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì', 'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å',
    'Δ', '_', 'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ', 'Σ', 'Θ', 'Ξ', '\u{1B}', 'Æ', 'æ', 'ß', 'É',
    ' ', '!', '"', '#', '¤', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/',
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?',
    '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O',
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'Ä', 'Ö', 'Ñ', 'Ü', '§',
    '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o',
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à',
];

/// Look up a character in the default alphabet.
fn default_code(c: char) -> Option<u8> {
    DEFAULT_ALPHABET
        .iter()
        .position(|&a| a == c)
        .filter(|&pos| pos != ESCAPE as usize)
        .map(|pos| pos as u8)
}

/// Look up a character in the extension table (used after [`ESCAPE`]).
fn extension_code(c: char) -> Option<u8> {
    match c {
        '\u{0C}' => Some(0x0A),
        '^' => Some(0x14),
        '{' => Some(0x28),
        '}' => Some(0x29),
        '\\' => Some(0x2F),
        '[' => Some(0x3C),
        '~' => Some(0x3D),
        ']' => Some(0x3E),
        '|' => Some(0x40),
        '€' => Some(0x65),
        _ => None,
    }
}

/// Convert text to unpacked septets, one byte per septet.
///
/// Extension characters take two septets; anything else outside the
/// alphabet becomes `?`.
pub fn to_septets(text: &str) -> Vec<u8> {
    let mut septets = Vec::with_capacity(text.len());
    for c in text.chars() {
        if let Some(code) = default_code(c) {
            septets.push(code);
        } else if let Some(code) = extension_code(c) {
            septets.push(ESCAPE);
            septets.push(code);
        } else {
            septets.push(UNKNOWN);
        }
    }
    septets
}

/// Pack septets LSB-first into octets.
///
/// Eight septets fit in seven octets; a trailing partial octet is emitted
/// with its unused high bits cleared.
pub fn pack(septets: &[u8]) -> Vec<u8> {
    let mut packed = Vec::with_capacity(septets.len() * 7 / 8 + 1);
    let mut acc: u32 = 0;
    let mut bits = 0;

    for &septet in septets {
        acc |= u32::from(septet & 0x7F) << bits;
        bits += 7;
        while bits >= 8 {
            packed.push((acc & 0xFF) as u8);
            acc >>= 8;
            bits -= 8;
        }
    }
    if bits > 0 {
        packed.push((acc & 0xFF) as u8);
    }

    packed
}

/// Convert text straight to packed septets.
pub fn encode(text: &str) -> Vec<u8> {
    pack(&to_septets(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_alphabet() {
        assert_eq!(to_septets("A"), vec![0x41]);
        assert_eq!(to_septets("@"), vec![0x00]);
        assert_eq!(to_septets("à"), vec![0x7F]);
    }

    #[test]
    fn test_extension_characters_are_escaped() {
        assert_eq!(to_septets("€"), vec![ESCAPE, 0x65]);
        assert_eq!(to_septets("[x]"), vec![ESCAPE, 0x3C, 0x78, ESCAPE, 0x3E]);
    }

    #[test]
    fn test_unknown_character_becomes_question_mark() {
        assert_eq!(to_septets("✓"), vec![UNKNOWN]);
        // The escape character itself is not a printable member of the alphabet
        assert_eq!(to_septets("\u{1B}"), vec![UNKNOWN]);
    }

    #[test]
    fn test_pack_hi() {
        assert_eq!(encode("Hi"), vec![0xC8, 0x34]);
    }

    #[test]
    fn test_pack_hellohello() {
        // Classic 03.38 example: ten septets in nine octets
        assert_eq!(
            encode("hellohello"),
            vec![0xE8, 0x32, 0x9B, 0xFD, 0x46, 0x97, 0xD9, 0xEC, 0x37]
        );
    }

    #[test]
    fn test_pack_eight_septets_fill_seven_octets() {
        assert_eq!(pack(&[0x7F; 8]), vec![0xFF; 7]);
    }

    #[test]
    fn test_pack_empty() {
        assert!(encode("").is_empty());
    }
}
