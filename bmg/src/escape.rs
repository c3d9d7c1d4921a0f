//! The in-band `0x1A` opcode and its text-form escape sequences.
//!
//! Grounded in `original_source/project/dclib/lib-bmg.c`'s string-print routine: a
//! marker code unit is followed by a "group" word whose high byte doubles as the
//! total length of the opcode (in code units, counting the marker itself) via
//! `total_units = (high_byte + 1) >> 1`. Two group values get special text-form
//! treatment (colour, Unicode literal); everything else round-trips as an opaque
//! `\z{}` blob. This crate keeps that length-in-high-byte convention so a decoded
//! opcode re-encodes to the identical bytes without needing a parallel length field.

use crate::config::{BmgConfig, ColorNameTier};
use crate::error::BmgError;
use crate::store::Bmg;
use crate::tables::{color_by_name, color_name};

pub const OPCODE_MARKER: u16 = 0x001A;
const GROUP_COLOR_SUBTYPE: u8 = 0x00;
const GROUP_UNICODE_SUBTYPE: u8 = 0x01;

/// One embedded opcode, minus its leading marker unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opcode {
    pub group: u16,
    pub payload: Vec<u16>,
}

impl Opcode {
    pub fn color(code: u16) -> Opcode {
        Opcode { group: group_word(GROUP_COLOR_SUBTYPE, 2), payload: vec![1, code] }
    }

    pub fn unicode(codepoint: u32) -> Opcode {
        Opcode { group: group_word(GROUP_UNICODE_SUBTYPE, 2), payload: vec![(codepoint >> 16) as u16, codepoint as u16] }
    }

    pub fn generic(subtype: u8, payload: Vec<u16>) -> Opcode {
        Opcode { group: group_word(subtype, payload.len()), payload }
    }

    pub fn subtype(&self) -> u8 {
        self.group as u8
    }

    /// `Some(color)` if this is the colour opcode (`\c{}`'s wire form).
    pub fn as_color(&self) -> Option<u16> {
        if self.subtype() == GROUP_COLOR_SUBTYPE && self.payload.len() == 2 && self.payload[0] == 1 {
            Some(self.payload[1])
        } else {
            None
        }
    }

    /// `Some(codepoint)` if this is the Unicode-literal opcode (`\u{}`'s wire form).
    pub fn as_unicode(&self) -> Option<u32> {
        if self.subtype() == GROUP_UNICODE_SUBTYPE && self.payload.len() == 2 {
            Some(((self.payload[0] as u32) << 16) | self.payload[1] as u32)
        } else {
            None
        }
    }

    /// Total code units this opcode occupies on the wire, marker included.
    pub fn total_units(&self) -> usize {
        2 + self.payload.len()
    }
}

fn group_word(subtype: u8, payload_len: usize) -> u16 {
    let total_units = 2 + payload_len;
    let length_byte = (total_units * 2).min(255) as u8;
    (length_byte as u16) << 8 | subtype as u16
}

/// Total code units (marker included) an opcode beginning with this group word
/// occupies, per the length-in-high-byte convention.
pub fn opcode_total_units(group_word: u16) -> usize {
    let length_byte = (group_word >> 8) as u8;
    (((length_byte as usize) + 1) >> 1).max(2)
}

/// `units[0]` must be [`OPCODE_MARKER`]; returns the opcode's total length in code
/// units (marker included), clamped to what's actually available.
pub fn opcode_len_in_units(units: &[u16]) -> usize {
    debug_assert_eq!(units.first().copied(), Some(OPCODE_MARKER));
    if units.len() < 2 {
        return units.len();
    }
    opcode_total_units(units[1]).min(units.len())
}

/// Decodes the opcode starting at `units[0]` (the marker). Returns the opcode and
/// the number of units consumed.
pub fn decode_opcode(units: &[u16]) -> (Opcode, usize) {
    let total = opcode_len_in_units(units);
    if total < 2 {
        return (Opcode { group: 0, payload: Vec::new() }, total);
    }
    let group = units[1];
    let payload = units[2..total].to_vec();
    (Opcode { group, payload }, total)
}

pub fn encode_opcode(out: &mut Vec<u16>, op: &Opcode) {
    out.push(OPCODE_MARKER);
    out.push(op.group);
    out.extend_from_slice(&op.payload);
}

/// Renders a run of decoded code units (text only, no raw opcodes other than the
/// two recognised ones) into `#BMG` text-form escapes. `\u{}` runs merge
/// consecutive literals into one `\u{a,b,c}` the way the source's `last_u` pointer
/// trick does.
pub fn emit_escapes(units: &[u16], config: &BmgConfig) -> String {
    let mut out = String::new();
    let mut i = 0;
    let mut open_unicode_run = false;

    while i < units.len() {
        let u = units[i];
        if u == OPCODE_MARKER {
            let (op, consumed) = decode_opcode(&units[i..]);
            if let Some(color) = op.as_color() {
                close_unicode_run(&mut out, &mut open_unicode_run);
                emit_color(&mut out, color, config.color_name_tier);
            } else if let Some(cp) = op.as_unicode() {
                if open_unicode_run {
                    out.push_str(&format!(",{:x}}}", cp));
                } else {
                    out.push_str(&format!("\\u{{{:x}", cp));
                    open_unicode_run = true;
                }
                i += consumed.max(1);
                continue;
            } else {
                close_unicode_run(&mut out, &mut open_unicode_run);
                emit_generic(&mut out, &op);
            }
            i += consumed.max(1);
            continue;
        }
        close_unicode_run(&mut out, &mut open_unicode_run);
        emit_char(&mut out, u);
        i += 1;
    }
    close_unicode_run(&mut out, &mut open_unicode_run);
    out
}

fn close_unicode_run(out: &mut String, open: &mut bool) {
    if *open {
        out.push('}');
        *open = false;
    }
}

fn emit_color(out: &mut String, code: u16, tier: ColorNameTier) {
    match color_name(code, tier) {
        Some(name) if tier != ColorNameTier::None => out.push_str(&format!("\\c{{{}}}", name)),
        _ => out.push_str(&format!("\\c{{{:x}}}", code)),
    }
}

fn emit_generic(out: &mut String, op: &Opcode) {
    out.push_str(&format!("\\z{{{:x}", op.subtype()));
    for &word in &op.payload {
        out.push_str(&format!(",{:x}", word));
    }
    out.push('}');
}

fn emit_char(out: &mut String, unit: u16) {
    match unit {
        0x0A => out.push_str("\\n"),
        0x5C => out.push_str("\\\\"),
        u if u < 0x20 || u == 0x7F => out.push_str(&format!("\\x{{{:x}}}", u)),
        u => {
            if let Some(c) = char::from_u32(u as u32) {
                out.push(c);
            }
        }
    }
}

/// Scans one escaped text-form run (the content between an opening quote and a
/// terminator) back into code units, expanding `\n`, `\xNN`, `\u{...}`, `\z{...}`,
/// `\c{...}`, `\m{...}`/`\M{...}`, the C-style one-char escapes, and `\0`-`\7`
/// octal byte literals into their opcode or literal forms. `local` is the store
/// being built by the current scan — `\m{}` checks it before falling back to
/// `config`'s macros store; `\M{}` only ever checks the macros store.
pub fn scan_escapes(text: &str, config: &BmgConfig, local: &Bmg) -> Result<Vec<u16>, BmgError> {
    let mut out = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c as u32 as u16);
            continue;
        }
        let Some(&esc) = chars.peek() else {
            out.push('\\' as u16);
            break;
        };
        match esc {
            'n' => {
                chars.next();
                out.push(0x0A);
            }
            'r' => {
                chars.next();
                out.push(0x0D);
            }
            't' => {
                chars.next();
                out.push(0x09);
            }
            'a' => {
                chars.next();
                out.push(0x07);
            }
            'b' => {
                chars.next();
                out.push(0x08);
            }
            'f' => {
                chars.next();
                out.push(0x0C);
            }
            'v' => {
                chars.next();
                out.push(0x0B);
            }
            '\\' => {
                chars.next();
                out.push(0x5C);
            }
            '0'..='7' => {
                let mut digits = String::new();
                while digits.len() < 3 {
                    match chars.peek() {
                        Some(&d) if ('0'..='7').contains(&d) => {
                            digits.push(d);
                            chars.next();
                        }
                        _ => break,
                    }
                }
                let value = u32::from_str_radix(&digits, 8).unwrap_or(0);
                out.push((value & 0xFF) as u16);
            }
            'x' => {
                chars.next();
                let hex = take_braced(&mut chars)?;
                let value = u32::from_str_radix(&hex, 16).map_err(|_| BmgError::InvalidHex(hex.clone()))?;
                out.push(value as u16);
            }
            'u' => {
                chars.next();
                let body = take_braced(&mut chars)?;
                for part in body.split(',') {
                    let cp = u32::from_str_radix(part.trim(), 16).map_err(|_| BmgError::InvalidHex(part.to_string()))?;
                    encode_opcode(&mut out, &Opcode::unicode(cp));
                }
            }
            'c' => {
                chars.next();
                let body = take_braced(&mut chars)?;
                let code = color_by_name(&body, config.color_name_tier)
                    .or_else(|| u16::from_str_radix(body.trim_start_matches("0x"), 16).ok())
                    .ok_or_else(|| BmgError::InvalidHex(body.clone()))?;
                encode_opcode(&mut out, &Opcode::color(code));
            }
            'z' => {
                chars.next();
                let body = take_braced(&mut chars)?;
                let mut parts = body.split(',');
                let subtype_str = parts.next().unwrap_or("0");
                let subtype = u8::from_str_radix(subtype_str.trim(), 16).map_err(|_| BmgError::InvalidHex(subtype_str.to_string()))?;
                let mut payload = Vec::new();
                for part in parts {
                    payload.push(u16::from_str_radix(part.trim(), 16).map_err(|_| BmgError::InvalidHex(part.to_string()))?);
                }
                encode_opcode(&mut out, &Opcode::generic(subtype, payload));
            }
            'm' | 'M' => {
                let macros_only = esc == 'M';
                chars.next();
                let body = take_braced(&mut chars)?;
                for part in body.split(',') {
                    let part = part.trim();
                    if part.is_empty() {
                        continue;
                    }
                    let hex = part.strip_prefix("0x").or_else(|| part.strip_prefix("0X")).unwrap_or(part);
                    let mid = u32::from_str_radix(hex, 16).map_err(|_| BmgError::InvalidHex(part.to_string()))?;
                    let resolved = if macros_only { None } else { local.find(mid) }.or_else(|| config.macros.as_deref().and_then(|m| m.find(mid)));
                    if let Some(item) = resolved {
                        out.extend_from_slice(&item.text);
                    }
                }
            }
            other => {
                chars.next();
                out.push(other as u32 as u16);
            }
        }
    }

    Ok(out)
}

fn take_braced(chars: &mut std::iter::Peekable<std::str::Chars>) -> Result<String, BmgError> {
    if chars.next() != Some('{') {
        return Err(BmgError::InvalidHex("expected '{' after escape".to_string()));
    }
    let mut body = String::new();
    for c in chars.by_ref() {
        if c == '}' {
            return Ok(body);
        }
        body.push(c);
    }
    Err(BmgError::InvalidHex("unterminated escape".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_opcode_round_trips_length() {
        let op = Opcode::color(0x0021);
        let mut units = vec![OPCODE_MARKER];
        encode_opcode(&mut units, &op);
        assert_eq!(units.len(), op.total_units());
        let (decoded, consumed) = decode_opcode(&units);
        assert_eq!(consumed, units.len());
        assert_eq!(decoded.as_color(), Some(0x0021));
    }

    #[test]
    fn unicode_opcode_round_trips() {
        let op = Opcode::unicode(0x1F600);
        let mut units = vec![OPCODE_MARKER];
        encode_opcode(&mut units, &op);
        let (decoded, _) = decode_opcode(&units);
        assert_eq!(decoded.as_unicode(), Some(0x1F600));
    }

    #[test]
    fn generic_opcode_is_opaque_round_trip() {
        let op = Opcode::generic(0x05, vec![0xAAAA, 0xBBBB, 0xCCCC]);
        let mut units = vec![OPCODE_MARKER];
        encode_opcode(&mut units, &op);
        let (decoded, consumed) = decode_opcode(&units);
        assert_eq!(consumed, units.len());
        assert_eq!(decoded, op);
    }

    #[test]
    fn scan_then_emit_round_trips_colour_escape() {
        let config = BmgConfig::default();
        let local = Bmg::new();
        let units = scan_escapes("\\c{RED1}", &config, &local).unwrap();
        let text = emit_escapes(&units, &config);
        assert_eq!(text, "\\c{RED1}");
    }

    #[test]
    fn scan_then_emit_round_trips_unicode_escape() {
        let config = BmgConfig::default();
        let local = Bmg::new();
        let units = scan_escapes("\\u{3042,3044}", &config, &local).unwrap();
        let text = emit_escapes(&units, &config);
        assert_eq!(text, "\\u{3042,3044}");
    }

    #[test]
    fn newline_escape_round_trips() {
        let config = BmgConfig::default();
        let local = Bmg::new();
        let units = scan_escapes("a\\nb", &config, &local).unwrap();
        assert_eq!(units, vec!['a' as u16, 0x0A, 'b' as u16]);
        assert_eq!(emit_escapes(&units, &config), "a\\nb");
    }

    #[test]
    fn c_style_one_char_escapes_decode_to_control_bytes() {
        let config = BmgConfig::default();
        let local = Bmg::new();
        let units = scan_escapes("\\r\\t\\a\\b\\f\\v", &config, &local).unwrap();
        assert_eq!(units, vec![0x0D, 0x09, 0x07, 0x08, 0x0C, 0x0B]);
    }

    #[test]
    fn octal_escape_decodes_byte_literal() {
        let config = BmgConfig::default();
        let local = Bmg::new();
        let units = scan_escapes("\\101\\7", &config, &local).unwrap();
        assert_eq!(units, vec![0o101, 0o7]);
    }

    #[test]
    fn macro_escape_substitutes_local_item_text() {
        let config = BmgConfig::default();
        let mut local = Bmg::new();
        local.insert(0x10).text = "hi".encode_utf16().collect();

        let units = scan_escapes("\\m{0x10}", &config, &local).unwrap();
        assert_eq!(String::from_utf16(&units).unwrap(), "hi");
    }

    #[test]
    fn macro_only_escape_ignores_local_store() {
        let mut config = BmgConfig::default();
        let mut macros = Bmg::new();
        macros.insert(0x20).text = "from-macros".encode_utf16().collect();
        config.macros = Some(std::rc::Rc::new(macros));

        let mut local = Bmg::new();
        local.insert(0x20).text = "from-local".encode_utf16().collect();

        let units = scan_escapes("\\M{0x20}", &config, &local).unwrap();
        assert_eq!(String::from_utf16(&units).unwrap(), "from-macros");
    }
}
