//! Translation between a BMG file's on-disk byte stream and the crate's internal
//! 16-bit code-unit representation. Grounded in the teacher's `bmg.rs` (which
//! already picks `encoding_rs`'s `WINDOWS_1252`/`UTF_16BE`/`SHIFT_JIS`/`UTF_8`
//! codecs for this exact format), generalized so opcodes are preserved as raw code
//! units rather than folded into the decoded string.

use encoding_rs::{Encoding, SHIFT_JIS, UTF_16BE, UTF_8, WINDOWS_1252};
use serde::{Deserialize, Serialize};

use crate::tables::CP1252_HIGH;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    /// Byte value 0 in the BMG header. Nintendo's older GameCube titles leave the
    /// encoding unspecified; in practice this is always CP1252.
    Undefined,
    Cp1252,
    Utf16,
    ShiftJis,
    Utf8,
}

impl TextEncoding {
    pub fn from_byte(b: u8) -> Option<TextEncoding> {
        match b {
            0 => Some(TextEncoding::Undefined),
            1 => Some(TextEncoding::Cp1252),
            2 => Some(TextEncoding::Utf16),
            3 => Some(TextEncoding::ShiftJis),
            4 => Some(TextEncoding::Utf8),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            TextEncoding::Undefined => 0,
            TextEncoding::Cp1252 => 1,
            TextEncoding::Utf16 => 2,
            TextEncoding::ShiftJis => 3,
            TextEncoding::Utf8 => 4,
        }
    }

    /// 1 for byte-oriented encodings, 2 for UTF-16.
    pub fn codepoint_size(self) -> usize {
        match self {
            TextEncoding::Utf16 => 2,
            _ => 1,
        }
    }

    fn codec(self) -> &'static Encoding {
        match self {
            TextEncoding::Undefined | TextEncoding::Cp1252 => WINDOWS_1252,
            TextEncoding::Utf8 => UTF_8,
            TextEncoding::Utf16 => UTF_16BE,
            TextEncoding::ShiftJis => SHIFT_JIS,
        }
    }

    /// Decodes a null-terminated byte run into 16-bit code units, copying any
    /// in-band `0x1A` opcode through untranslated. Stops at the first terminator
    /// (`0x00` for byte encodings, `0x0000` for UTF-16) that isn't inside an
    /// opcode run. Does not require the terminator to be present (permissive —
    /// a truncated buffer simply decodes everything available).
    pub fn decode(self, data: &[u8]) -> Vec<u16> {
        let unit_size = self.codepoint_size();
        let mut units = Vec::new();
        let mut offset = 0usize;

        while offset + unit_size <= data.len() {
            let raw = read_unit(data, offset, unit_size);
            if raw == 0 {
                break;
            }
            if raw == crate::escape::OPCODE_MARKER {
                let (opcode_units, consumed) = read_opcode_units(data, offset, unit_size);
                units.extend(opcode_units);
                offset += consumed;
                continue;
            }
            let (unit, consumed) = decode_one(self, data, offset, unit_size);
            units.push(unit);
            offset += consumed;
        }

        units
    }

    /// Inverse of [`TextEncoding::decode`]: encodes code units back to bytes and
    /// appends the encoding's terminator. Opcode runs (detected the same way) are
    /// copied through verbatim; unencodable scalars are dropped (CP1252/Shift-JIS)
    /// or replaced (`encoding_rs`'s default `?` substitution for UTF-8 is avoided
    /// by only ever feeding it scalars that originated from valid UTF-8 text).
    pub fn encode(self, units: &[u16]) -> Vec<u8> {
        let unit_size = self.codepoint_size();
        let mut out = Vec::new();
        let mut i = 0usize;

        while i < units.len() {
            if units[i] == crate::escape::OPCODE_MARKER {
                let opcode_len = crate::escape::opcode_len_in_units(&units[i..]);
                write_unit(&mut out, units[i], unit_size);
                for &word in &units[i + 1..i + opcode_len] {
                    out.extend_from_slice(&word.to_be_bytes());
                }
                i += opcode_len;
                continue;
            }

            let ch = char::from_u32(units[i] as u32).unwrap_or('\u{FFFD}');
            let mut buf = [0u8; 4];
            let s = ch.encode_utf8(&mut buf);
            let (encoded, _, _) = self.codec().encode(s);
            out.extend_from_slice(&encoded);
            i += 1;
        }

        for _ in 0..unit_size {
            out.push(0);
        }
        out
    }

    /// Decodes a run of code units (with no opcodes, no terminator) to a `String`,
    /// used by the text emitter for the non-opcode portions of a message.
    pub fn units_to_string(self, units: &[u16]) -> String {
        let mut s = String::with_capacity(units.len());
        for &u in units {
            match char::from_u32(u as u32) {
                Some(c) => s.push(c),
                None => s.push('\u{FFFD}'),
            }
        }
        s
    }
}

/// Reads the opcode beginning at `offset` (already confirmed to hold the marker).
/// The marker itself is `unit_size` bytes wide (matching the surrounding text's
/// encoding), but everything after it — the group word and its payload — is
/// always a run of raw big-endian 16-bit words, regardless of the file's text
/// encoding; this mirrors the source decoding the whole message into a uniform
/// `u16` array before ever looking at opcode structure.
fn read_opcode_units(data: &[u8], offset: usize, unit_size: usize) -> (Vec<u16>, usize) {
    let body_start = offset + unit_size;
    if body_start + 2 > data.len() {
        return (vec![crate::escape::OPCODE_MARKER], data.len() - offset);
    }
    let group = u16::from_be_bytes([data[body_start], data[body_start + 1]]);
    let total_units = crate::escape::opcode_total_units(group);
    let payload_units = total_units.saturating_sub(2);

    let mut units = Vec::with_capacity(total_units);
    units.push(crate::escape::OPCODE_MARKER);
    units.push(group);

    let mut pos = body_start + 2;
    for _ in 0..payload_units {
        if pos + 2 > data.len() {
            break;
        }
        units.push(u16::from_be_bytes([data[pos], data[pos + 1]]));
        pos += 2;
    }

    let consumed = pos - offset;
    (units, consumed)
}

fn read_unit(data: &[u8], offset: usize, unit_size: usize) -> u16 {
    if unit_size == 2 {
        u16::from_be_bytes([data[offset], data[offset + 1]])
    } else {
        data[offset] as u16
    }
}

fn write_unit(out: &mut Vec<u8>, unit: u16, unit_size: usize) {
    if unit_size == 2 {
        out.extend_from_slice(&unit.to_be_bytes());
    } else {
        out.push(unit as u8);
    }
}

/// Decodes one codepoint starting at `offset`, returning the decoded unit and the
/// number of bytes actually consumed. For Shift-JIS, a two-byte lead consumes 2
/// bytes even though `unit_size` (the encoding's nominal codepoint size) is 1; the
/// caller must advance by the returned count, not by `unit_size`.
fn decode_one(encoding: TextEncoding, data: &[u8], offset: usize, unit_size: usize) -> (u16, usize) {
    if encoding == TextEncoding::Utf16 {
        return (read_unit(data, offset, unit_size), unit_size);
    }
    let byte = data[offset];
    if encoding == TextEncoding::ShiftJis && byte >= 0x81 {
        // Multi-byte Shift-JIS lead byte: decode the whole two-byte sequence and
        // fold it into one code unit holding the resulting Unicode scalar. This
        // loses exact byte alignment against the original multi-byte sequence on
        // a lossy round trip through non-BMP scalars, which Shift-JIS's kana/kanji
        // repertoire never produces, so the scalar fits in one `u16` code unit.
        if offset + 1 < data.len() {
            let (cow, _, _) = SHIFT_JIS.decode(&data[offset..offset + 2]);
            if let Some(c) = cow.chars().next() {
                return (c as u32 as u16, 2);
            }
        }
    }
    if (0x80..=0x9F).contains(&byte) && matches!(encoding, TextEncoding::Cp1252 | TextEncoding::Undefined) {
        return (CP1252_HIGH[(byte - 0x80) as usize] as u32 as u16, unit_size);
    }
    (byte as u16, unit_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cp1252_round_trips_ascii() {
        let units = TextEncoding::Cp1252.decode(b"Hello\0");
        assert_eq!(units, vec![72, 101, 108, 108, 111]);
        let bytes = TextEncoding::Cp1252.encode(&units);
        assert_eq!(bytes, b"Hello\0");
    }

    #[test]
    fn utf16_round_trips() {
        let mut bytes = Vec::new();
        for c in "Hi!".encode_utf16() {
            bytes.extend_from_slice(&c.to_be_bytes());
        }
        bytes.extend_from_slice(&[0, 0]);
        let units = TextEncoding::Utf16.decode(&bytes);
        assert_eq!(units, vec!['H' as u16, 'i' as u16, '!' as u16]);
        assert_eq!(TextEncoding::Utf16.encode(&units), bytes);
    }

    #[test]
    fn cp1252_high_byte_maps_to_unicode() {
        // 0x80 is the euro sign in CP1252.
        let units = TextEncoding::Cp1252.decode(&[0x80, 0x00]);
        assert_eq!(units, vec!['\u{20AC}' as u16]);
    }

    #[test]
    fn decode_stops_at_terminator_without_requiring_one() {
        let units = TextEncoding::Cp1252.decode(b"abc");
        assert_eq!(units, vec![b'a' as u16, b'b' as u16, b'c' as u16]);
    }

    #[test]
    fn shift_jis_decodes_consecutive_two_byte_characters() {
        let (bytes, _, _) = SHIFT_JIS.encode("日本語");
        let mut data = bytes.into_owned();
        data.push(0);
        let units = TextEncoding::ShiftJis.decode(&data);
        assert_eq!(TextEncoding::ShiftJis.units_to_string(&units), "日本語");
    }

    #[test]
    fn cp1252_opcode_round_trips_through_bytes() {
        use crate::escape::{encode_opcode, Opcode};

        let mut units = vec!['a' as u16];
        encode_opcode(&mut units, &Opcode::color(0x0021));
        units.push('b' as u16);

        let bytes = TextEncoding::Cp1252.encode(&units);
        let decoded = TextEncoding::Cp1252.decode(&bytes);
        assert_eq!(decoded, units);
    }
}
