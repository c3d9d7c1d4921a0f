//! Small helpers shared by the binary and text codecs. Grounded in the teacher
//! crate's `util.rs` (`to_hex_string`/`from_hex_string`/`pad_to`), generalized to a
//! runtime alignment since BMG's section alignment is a configuration value, not a
//! compile-time constant.

use std::num::ParseIntError;

pub fn to_hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02X}", b));
    }
    out
}

pub fn from_hex_string(string: &str) -> Result<Vec<u8>, ParseIntError> {
    let string = string.trim();
    (0..string.len() / 2)
        .map(|idx| u8::from_str_radix(&string[idx * 2..idx * 2 + 2], 16))
        .collect()
}

/// Pads `buf` with zero bytes until its length is a multiple of `align`.
pub fn pad_to(buf: &mut Vec<u8>, align: usize) {
    if align == 0 {
        return;
    }
    while buf.len() % align != 0 {
        buf.push(0);
    }
}

/// Rounds `idx` up to the next multiple of `align`.
pub fn padded_index_to(idx: u32, align: u32) -> u32 {
    if align == 0 {
        return idx;
    }
    (idx + (align - 1)) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let bytes = vec![0x01, 0xAB, 0xFF, 0x00];
        let hex = to_hex_string(&bytes);
        assert_eq!(hex, "01ABFF00");
        assert_eq!(from_hex_string(&hex).unwrap(), bytes);
    }

    #[test]
    fn pad_to_rounds_up() {
        let mut buf = vec![0u8; 5];
        pad_to(&mut buf, 4);
        assert_eq!(buf.len(), 8);
        let mut exact = vec![0u8; 8];
        pad_to(&mut exact, 4);
        assert_eq!(exact.len(), 8);
    }

    #[test]
    fn padded_index_rounds_up() {
        assert_eq!(padded_index_to(0, 32), 0);
        assert_eq!(padded_index_to(1, 32), 32);
        assert_eq!(padded_index_to(32, 32), 32);
        assert_eq!(padded_index_to(33, 32), 64);
    }
}
