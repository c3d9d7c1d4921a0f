//! The message record (C4). Grounded in the teacher's `MessageId`/`TextIndexEntry`
//! pair in `bmg.rs`, merged into one record the way `lib-bmg.h`'s `bmg_item_t`
//! keeps mid/attribute/text together instead of splitting them across sections.

use serde::{Deserialize, Serialize};

pub const ATTRIB_SIZE: usize = 40;

/// A 32-bit message identifier. Values `>= 0x1_0000_0000` don't exist; MKW's own
/// id space (including CT-CODE/LE-CODE) fits in 16 bits, but the format's MID1
/// section stores a 32-bit `id << 8 | sub_id` pair, so this stays a `u32`.
pub type Mid = u32;

/// Packs a 16-bit MID and an 8-bit sub-id the way MID1 entries do on the wire.
pub fn pack_mid(id: u16, sub_id: u8) -> Mid {
    (id as u32) << 8 | sub_id as u32
}

pub fn unpack_mid(mid: Mid) -> (u16, u8) {
    ((mid >> 8) as u16, mid as u8)
}

/// Which predefined attribute/text slot (if any) an item occupies. BMG files built
/// with "use slots" preserve gaps in the slot sequence; this is `None` for items
/// that were appended rather than assigned to a fixed slot.
pub type Slot = Option<u32>;

/// One message: a MID, its fixed-width attribute vector, and its text. Attribute
/// lanes an item never set explicitly are filled from the store's inferred
/// default and tracked via `attrib_used` so re-encoding can tell "explicit zero"
/// from "unset, defaulted".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub mid: Mid,
    /// MID of a condition message gating this one, if any (`lib-bmg.h`'s
    /// `cond_mid`); `0` means unconditional.
    pub condition: Mid,
    pub slot: Slot,
    pub attrib: [u8; ATTRIB_SIZE],
    /// How many leading bytes of `attrib` were explicitly supplied (vs. taken
    /// from the store's default attribute vector).
    pub attrib_used: u16,
    /// Decoded code units, including any embedded opcodes (see `escape.rs`).
    pub text: Vec<u16>,
}

impl Item {
    pub fn new(mid: Mid) -> Item {
        Item { mid, condition: 0, slot: None, attrib: [0u8; ATTRIB_SIZE], attrib_used: 0, text: Vec::new() }
    }

    pub fn with_text(mid: Mid, text: Vec<u16>) -> Item {
        Item { text, ..Item::new(mid) }
    }

    pub fn is_empty_text(&self) -> bool {
        self.text.is_empty()
    }

    /// Attribute bytes actually specified by this item (the rest were defaulted).
    pub fn explicit_attrib(&self) -> &[u8] {
        &self.attrib[..self.attrib_used as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mid_packing_round_trips() {
        let mid = pack_mid(0x2454, 0x03);
        assert_eq!(unpack_mid(mid), (0x2454, 0x03));
    }

    #[test]
    fn new_item_has_no_attribute_bytes_used() {
        let item = Item::new(42);
        assert_eq!(item.attrib_used, 0);
        assert!(item.explicit_attrib().is_empty());
    }
}
