//! The message store (C4) plus the raw binary decoder/encoder (C6/C7). Grounded in
//! the teacher's `Bmg`/`TextIndexTable`/`StringPool`/`MessageIdTable` quartet in
//! `bmg.rs`, merged into one record-oriented store per spec §3 and generalized to
//! the slot/condition/raw-section bookkeeping `lib-bmg.h`'s `bmg_t` carries.

use std::collections::BTreeMap;

use crate::config::BmgConfig;
use crate::encoding::TextEncoding;
use crate::endian::Endianness;
use crate::error::{BmgError, Diagnostic, Diagnostics};
use crate::item::{pack_mid, Item, Mid, ATTRIB_SIZE};
use crate::section::{self, RawSection};

pub const DEFAULT_INF_SIZE: u32 = 8;
const INF_MAX_SIZE: u32 = 44;
const INF_LIMIT: u32 = 1000;

#[derive(Debug, Clone)]
pub struct FileMeta {
    pub name: String,
}

impl Default for FileMeta {
    fn default() -> Self {
        FileMeta { name: String::new() }
    }
}

/// The in-memory message container. Decoded from or encoded to either the binary
/// wire format (this module) or `#BMG` text (the `text` module).
#[derive(Debug, Clone)]
pub struct Bmg {
    items: Vec<Item>,
    pub config: BmgConfig,
    pub default_attrib: [u8; ATTRIB_SIZE],
    pub default_attrib_used: u16,
    pub inf_size: u32,
    pub encoding: TextEncoding,
    pub endian: Endianness,
    pub have_mid: bool,
    pub legacy: bool,
    /// `true` when the source file's MID1 forced slot pinning (unsorted MIDs, or
    /// an `0xFFFF`/offset-0 reserved-slot pattern); governs C7's slot assignment.
    pub predefined_slot_mode: bool,
    /// File indices reserved by an `0xFFFF`/offset-0 placeholder in the source
    /// (scenario 5): not live items, but slots the encoder must re-emit empty.
    pub reserved_slots: Vec<u32>,
    pub raw_sections: Vec<RawSection>,
    pub header_unknown: [u8; 15],
    pub unknown_inf_0c: u32,
    pub unknown_mid_0a: u16,
    pub unknown_mid_0c: u32,
    pub meta: FileMeta,
}

impl Default for Bmg {
    fn default() -> Self {
        Bmg::new_with(BmgConfig::default())
    }
}

impl Bmg {
    pub fn new() -> Bmg {
        Bmg::default()
    }

    pub fn new_with(config: BmgConfig) -> Bmg {
        Bmg {
            items: Vec::new(),
            config,
            default_attrib: [0u8; ATTRIB_SIZE],
            default_attrib_used: 4,
            inf_size: DEFAULT_INF_SIZE,
            encoding: TextEncoding::Cp1252,
            endian: Endianness::Big,
            have_mid: false,
            legacy: false,
            predefined_slot_mode: false,
            reserved_slots: Vec::new(),
            raw_sections: Vec::new(),
            header_unknown: [0u8; 15],
            unknown_inf_0c: 0,
            unknown_mid_0a: 0x1000,
            unknown_mid_0c: 0,
            meta: FileMeta::default(),
        }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut Item> {
        self.items.iter_mut()
    }

    /// Drops every item for which `keep` returns `false`. Used by patch ops
    /// (`RM-FILLED`, `RM-REGEX`) that remove MIDs outright rather than just
    /// blanking their text.
    pub fn retain(&mut self, keep: impl FnMut(&Item) -> bool) {
        self.items.retain(keep);
    }

    pub fn find(&self, mid: Mid) -> Option<&Item> {
        self.items.binary_search_by_key(&mid, |it| it.mid).ok().map(|i| &self.items[i])
    }

    pub fn find_mut(&mut self, mid: Mid) -> Option<&mut Item> {
        match self.items.binary_search_by_key(&mid, |it| it.mid) {
            Ok(i) => Some(&mut self.items[i]),
            Err(_) => None,
        }
    }

    /// Inserts (or returns the existing) item for `mid`. When `overwrite_attrib`
    /// is set and a matching item exists, its attribute vector is replaced
    /// following the force-attributes/used-length rule in C4.
    pub fn insert(&mut self, mid: Mid) -> &mut Item {
        match self.items.binary_search_by_key(&mid, |it| it.mid) {
            Ok(i) => &mut self.items[i],
            Err(i) => {
                let mut item = Item::new(mid);
                if let Some(forced) = self.config.force_attrib {
                    item.attrib = forced;
                    item.attrib_used = ATTRIB_SIZE as u16;
                } else {
                    item.attrib = self.default_attrib;
                    item.attrib_used = self.default_attrib_used;
                }
                self.items.insert(i, item);
                &mut self.items[i]
            }
        }
    }

    /// Deletion retains the slot: text becomes the empty sentinel and attributes
    /// reset to the store default, per C4, so predefined-slot encoding can still
    /// reuse the layout.
    pub fn delete(&mut self, mid: Mid) -> bool {
        match self.items.binary_search_by_key(&mid, |it| it.mid) {
            Ok(i) => {
                self.items[i].text.clear();
                self.items[i].attrib = self.default_attrib;
                self.items[i].attrib_used = self.default_attrib_used;
                true
            }
            Err(_) => false,
        }
    }

    /// Removes the item outright (used by patch ops like `RM-REGEX`/`RM-FILLED`
    /// that must drop the MID entirely, not just blank its text).
    pub fn remove(&mut self, mid: Mid) -> Option<Item> {
        self.items.binary_search_by_key(&mid, |it| it.mid).ok().map(|i| self.items.remove(i))
    }

    /// Copies `source`'s attribute vector onto this item under C4's rule:
    /// forced attributes win unconditionally, otherwise the destination's
    /// `attrib_used` becomes `min(self_default_used, source.attrib_used)` and
    /// the slot is carried only if the source has one.
    pub fn copy_attrib(&self, dest: &mut Item, source: &Item) {
        if let Some(forced) = self.config.force_attrib {
            dest.attrib = forced;
            dest.attrib_used = ATTRIB_SIZE as u16;
        } else {
            let used = self.default_attrib_used.min(source.attrib_used) as usize;
            dest.attrib = [0u8; ATTRIB_SIZE];
            dest.attrib[..used].copy_from_slice(&source.attrib[..used]);
            dest.attrib_used = used as u16;
        }
        if source.slot.is_some() {
            dest.slot = source.slot;
        }
    }

    /// Parses a binary BMG file (the `"MESGbmg1"` form). Permissive: most
    /// anomalies become a [`Diagnostic`] rather than an `Err`, per §7's policy.
    pub fn decode_binary(data: &[u8], config: BmgConfig) -> Result<(Bmg, Diagnostics), BmgError> {
        let mut diagnostics = Diagnostics::default();
        let header = section::read_header(data)?;

        let encoding = match TextEncoding::from_byte(header.encoding_byte) {
            Some(e) => e,
            None if config.force_encoding => {
                diagnostics.push(Diagnostic::warn(format!(
                    "unrecognized encoding byte {:#04x}, forcing CP1252",
                    header.encoding_byte
                )));
                TextEncoding::Cp1252
            }
            None => return Err(BmgError::UnsupportedEncoding(header.encoding_byte)),
        };

        let raw_sections = section::walk_sections(data, &header, &mut diagnostics);

        let mut bmg = Bmg::new_with(config);
        bmg.encoding = encoding;
        bmg.endian = header.endian;
        bmg.header_unknown = header.unknown;
        bmg.legacy = header.encoding_byte == 0;

        let mut inf_payload: Option<&[u8]> = None;
        let mut dat_payload: Option<&[u8]> = None;
        let mut mid_payload: Option<&[u8]> = None;

        for section in &raw_sections {
            match section::classify(&section.magic) {
                section::SectionClass::Inf1 => inf_payload = Some(&section.payload),
                section::SectionClass::Dat1 => dat_payload = Some(&section.payload),
                section::SectionClass::Mid1 => {
                    mid_payload = Some(&section.payload);
                    bmg.have_mid = true;
                }
                _ => {
                    bmg.raw_sections.push(RawSection {
                        magic: section.magic,
                        payload: section.payload.clone(),
                        total_size: 8 + section.payload.len() as u32,
                    });
                }
            }
        }

        let Some(inf) = inf_payload else {
            return Ok((bmg, diagnostics));
        };
        let Some(dat) = dat_payload else {
            return Ok((bmg, diagnostics));
        };

        if inf.len() < 8 {
            diagnostics.push(Diagnostic::warn("INF1 section shorter than its fixed header"));
            return Ok((bmg, diagnostics));
        }

        let n_msg = header.endian.read_u16(inf, 0) as usize;
        let mut inf_size_in_file = header.endian.read_u16(inf, 2) as u32;
        bmg.unknown_inf_0c = header.endian.read_u32(inf, 4);

        if !(4..=INF_LIMIT).contains(&inf_size_in_file) {
            diagnostics.push(Diagnostic::warn(format!("inf_size {inf_size_in_file} out of range, using default")));
            inf_size_in_file = DEFAULT_INF_SIZE;
        }
        if inf_size_in_file > INF_MAX_SIZE {
            diagnostics.push(Diagnostic::warn(format!(
                "inf_size {inf_size_in_file} exceeds the {INF_MAX_SIZE}-byte internal cap; trailing lanes dropped"
            )));
        }
        bmg.inf_size = inf_size_in_file.min(INF_MAX_SIZE);

        let entry_size = inf_size_in_file as usize;
        let entries_start = 8;
        let available_entries = if entry_size == 0 { 0 } else { (inf.len() - entries_start.min(inf.len())) / entry_size };
        let n_msg = n_msg.min(available_entries);

        let mids: Vec<Mid> = if let Some(mid) = mid_payload {
            read_mid_table(mid, header.endian, n_msg, &mut bmg, &mut diagnostics)
        } else {
            (0..n_msg as u32).collect()
        };

        bmg.predefined_slot_mode = bmg.have_mid && is_predefined_slot_mode(&mids, inf, header.endian, entries_start, entry_size);

        for i in 0..n_msg {
            let entry_off = entries_start + i * entry_size;
            let offset = header.endian.read_u32(inf, entry_off);
            let attrib_bytes = &inf[entry_off + 4..entry_off + entry_size];
            let mid = mids.get(i).copied().unwrap_or(i as u32);

            if mid == 0xFFFF && offset == 0 {
                if bmg.predefined_slot_mode {
                    bmg.reserved_slots.push(i as u32);
                }
                continue;
            }

            let mut attrib = [0u8; ATTRIB_SIZE];
            let used = attrib_bytes.len().min(ATTRIB_SIZE);
            attrib[..used].copy_from_slice(&attrib_bytes[..used]);

            let text = if (offset as usize) < dat.len() {
                bmg.encoding.decode(&dat[offset as usize..])
            } else {
                diagnostics.push(Diagnostic::warn_at(format!("DAT1 offset {offset} out of range"), entry_off));
                Vec::new()
            };

            let mut item = Item::new(mid);
            item.attrib = attrib;
            item.attrib_used = used as u16;
            item.text = text;
            if bmg.predefined_slot_mode {
                item.slot = Some(i as u32);
            }
            bmg.items.push(item);
        }

        bmg.items.sort_by_key(|it| it.mid);

        if let Some(explicit) = bmg.config.default_attrib {
            bmg.default_attrib = explicit.0;
            bmg.default_attrib_used = explicit.1;
        } else {
            let (attrib, used) = infer_default_attrib(inf, header.endian, entries_start, entry_size, n_msg);
            bmg.default_attrib = attrib;
            bmg.default_attrib_used = used;
        }

        Ok((bmg, diagnostics))
    }

    /// Lays out INF1/DAT1/MID1 (and any raw sections) and returns the complete
    /// file bytes. Strict: invariant violations are returned as errors rather
    /// than silently patched up, per §7.
    pub fn to_binary(&self) -> Result<Vec<u8>, BmgError> {
        let align = self.config.section_align as usize;
        let inf_size = self.inf_size.max(4) as usize;

        let slots = self.assign_slots();
        let total_slots = slots.keys().next_back().map(|&s| s + 1).unwrap_or(0);

        let mut inf_body = Vec::new();
        let unit_size = self.encoding.codepoint_size();
        let mut dat_body = vec![0u8; unit_size];
        let mut mid_body = Vec::new();

        for slot in 0..total_slots {
            match slots.get(&slot) {
                None => {
                    inf_body.extend_from_slice(&0u32.to_be_bytes());
                    inf_body.resize(inf_body.len() + (inf_size - 4), 0);
                    if self.have_mid {
                        mid_body.extend_from_slice(&0xFFFFu32.to_be_bytes());
                    }
                }
                Some(SlotEntry::Item(item)) => {
                    let offset = if item.text.is_empty() {
                        0u32
                    } else {
                        let off = dat_body.len() as u32;
                        dat_body.extend_from_slice(&self.encoding.encode(&item.text));
                        off
                    };
                    inf_body.extend_from_slice(&offset.to_be_bytes());
                    let used = item.attrib_used.min((inf_size - 4) as u16) as usize;
                    inf_body.extend_from_slice(&item.attrib[..used]);
                    inf_body.resize(inf_body.len() + (inf_size - 4 - used), 0);
                    if self.have_mid {
                        mid_body.extend_from_slice(&item.mid.to_be_bytes());
                    }
                }
            }
        }

        let mut inf_section = Vec::new();
        inf_section.extend_from_slice(&(total_slots as u16).to_be_bytes());
        inf_section.extend_from_slice(&(inf_size as u16).to_be_bytes());
        inf_section.extend_from_slice(&self.unknown_inf_0c.to_be_bytes());
        inf_section.extend_from_slice(&inf_body);

        let mut out = Vec::new();
        out.extend_from_slice(section::MAGIC);
        out.extend_from_slice(&[0u8; 4]); // total size, patched below
        let n_sections = 2 + if self.have_mid { 1 } else { 0 } + self.raw_sections.len() as u32;
        out.extend_from_slice(&n_sections.to_be_bytes());
        out.push(if self.legacy { 0 } else { self.encoding.to_byte() });
        out.extend_from_slice(&self.header_unknown);

        write_section(&mut out, section::MAGIC_INF1, &inf_section, align);
        write_section(&mut out, section::MAGIC_DAT1, &dat_body, align);
        if self.have_mid {
            let mut mid_section = Vec::new();
            mid_section.extend_from_slice(&(total_slots as u16).to_be_bytes());
            mid_section.extend_from_slice(&self.unknown_mid_0a.to_be_bytes());
            mid_section.extend_from_slice(&self.unknown_mid_0c.to_be_bytes());
            mid_section.extend_from_slice(&mid_body);
            write_section(&mut out, section::MAGIC_MID1, &mid_section, align);
        }
        for raw in &self.raw_sections {
            write_section(&mut out, &raw.magic, &raw.payload, align);
        }

        let total_size = if self.legacy {
            crate::util::padded_index_to(out.len() as u32, self.config.legacy_block_size) / self.config.legacy_block_size
        } else {
            out.len() as u32
        };
        out[0x08..0x0C].copy_from_slice(&total_size.to_be_bytes());

        Ok(out)
    }

    fn assign_slots(&self) -> BTreeMap<u32, SlotEntry<'_>> {
        let mut slots: BTreeMap<u32, SlotEntry> = BTreeMap::new();

        if !self.predefined_slot_mode {
            for (i, item) in self.items.iter().enumerate() {
                slots.insert(i as u32, SlotEntry::Item(item));
            }
            return slots;
        }

        for &reserved in &self.reserved_slots {
            slots.entry(reserved).or_insert(SlotEntry::Reserved);
        }

        let mut collided = Vec::new();
        let mut unslotted = Vec::new();
        for item in &self.items {
            if let Some(slot) = item.slot {
                if slots.contains_key(&slot) && !matches!(slots.get(&slot), Some(SlotEntry::Reserved)) {
                    collided.push(item);
                } else {
                    slots.insert(slot, SlotEntry::Item(item));
                }
            } else {
                unslotted.push(item);
            }
        }

        let n_predef = slots.keys().next_back().map(|&s| s + 1).unwrap_or(0);

        // Items that never had a predefined slot may still fill an earlier gap.
        let mut next_free = 0u32;
        for item in unslotted {
            while slots.contains_key(&next_free) {
                next_free += 1;
            }
            slots.insert(next_free, SlotEntry::Item(item));
            next_free += 1;
        }

        // Collisions are reassigned at-or-past n_predef, never into an earlier gap.
        let mut next_collision_free = n_predef;
        for item in collided {
            while slots.contains_key(&next_collision_free) {
                next_collision_free += 1;
            }
            slots.insert(next_collision_free, SlotEntry::Item(item));
            next_collision_free += 1;
        }

        slots
    }
}

enum SlotEntry<'a> {
    Item(&'a Item),
    Reserved,
}

fn write_section(out: &mut Vec<u8>, magic: &[u8], payload: &[u8], align: usize) {
    let mut body = payload.to_vec();
    crate::util::pad_to(&mut body, align);
    out.extend_from_slice(magic);
    out.extend_from_slice(&(8 + body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
}

fn read_mid_table(mid_payload: &[u8], endian: Endianness, n_msg: usize, bmg: &mut Bmg, diagnostics: &mut Diagnostics) -> Vec<Mid> {
    if mid_payload.len() < 8 {
        diagnostics.push(Diagnostic::warn("MID1 section shorter than its fixed header"));
        return (0..n_msg as u32).collect();
    }
    let n_mid = endian.read_u16(mid_payload, 0) as usize;
    bmg.unknown_mid_0a = endian.read_u16(mid_payload, 2);
    bmg.unknown_mid_0c = endian.read_u32(mid_payload, 4);

    let available = (mid_payload.len() - 8) / 4;
    if n_mid != n_msg {
        diagnostics.push(Diagnostic::warn(format!("MID1 count {n_mid} differs from INF1 count {n_msg}")));
    }
    let mut mids = Vec::with_capacity(n_msg);
    for i in 0..n_msg {
        if i < available {
            mids.push(endian.read_u32(mid_payload, 8 + i * 4));
        } else {
            mids.push(i as u32);
        }
    }
    mids
}

fn is_predefined_slot_mode(mids: &[Mid], inf: &[u8], endian: Endianness, entries_start: usize, entry_size: usize) -> bool {
    let sorted = mids.windows(2).all(|w| w[0] < w[1]);
    if !sorted {
        return true;
    }
    for (i, &mid) in mids.iter().enumerate() {
        if entry_size == 0 {
            break;
        }
        let entry_off = entries_start + i * entry_size;
        if entry_off + 4 > inf.len() {
            break;
        }
        let offset = endian.read_u32(inf, entry_off);
        if mid == 0xFFFF && offset == 0 {
            return true;
        }
    }
    false
}

fn infer_default_attrib(inf: &[u8], endian: Endianness, entries_start: usize, entry_size: usize, n_msg: usize) -> ([u8; ATTRIB_SIZE], u16) {
    if entry_size <= 4 || n_msg == 0 {
        return ([0u8; ATTRIB_SIZE], 0);
    }
    let attrib_len = (entry_size - 4).min(ATTRIB_SIZE);
    let lanes = attrib_len / 4;
    let mut default = [0u8; ATTRIB_SIZE];

    for lane in 0..lanes {
        let mut counts: BTreeMap<u32, u32> = BTreeMap::new();
        for i in 0..n_msg {
            let entry_off = entries_start + i * entry_size + 4 + lane * 4;
            if entry_off + 4 > inf.len() {
                continue;
            }
            let value = endian.read_u32(inf, entry_off);
            *counts.entry(value).or_insert(0) += 1;
        }
        if let Some((&value, _)) = counts.iter().max_by_key(|(_, &count)| count) {
            default[lane * 4..lane * 4 + 4].copy_from_slice(&value.to_be_bytes());
        }
    }

    (default, (lanes * 4) as u16)
}

pub fn mid_from_track(track_index: u32) -> Mid {
    pack_mid((crate::tables::MID_TRACK1.beg + track_index) as u16, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_minimal(encoding: TextEncoding, text: &str) -> Vec<u8> {
        let mut bmg = Bmg::new();
        bmg.encoding = encoding;
        bmg.have_mid = true;
        bmg.inf_size = 8;
        bmg.default_attrib[0..4].copy_from_slice(&0x0100_0000u32.to_be_bytes());
        bmg.default_attrib_used = 4;
        let item = bmg.insert(0x1234);
        item.text = text.encode_utf16().collect();
        bmg.to_binary().unwrap()
    }

    #[test]
    fn scenario_1_minimal_file_header_and_dat1() {
        let bytes = build_minimal(TextEncoding::Utf16, "hi");
        assert_eq!(&bytes[0..8], b"MESGbmg1");
        assert_eq!(bytes[0x10], 2);

        let (bmg, _) = Bmg::decode_binary(&bytes, BmgConfig::default()).unwrap();
        assert_eq!(bmg.items().len(), 1);
        assert_eq!(bmg.items()[0].mid, 0x1234);
        assert_eq!(bmg.encoding.units_to_string(&bmg.items()[0].text), "hi");
    }

    #[test]
    fn decode_encode_round_trips_text_and_mid() {
        let bytes = build_minimal(TextEncoding::Cp1252, "round trip");
        let (bmg, diagnostics) = Bmg::decode_binary(&bytes, BmgConfig::default()).unwrap();
        assert!(diagnostics.is_empty());
        let re_encoded = bmg.to_binary().unwrap();
        assert_eq!(bytes, re_encoded);
    }

    #[test]
    fn scenario_5_predefined_slots_preserve_reserved_placeholder() {
        let mut bmg = Bmg::new();
        bmg.have_mid = true;
        bmg.predefined_slot_mode = true;
        bmg.inf_size = 8;
        let mut a = Item::new(0x2000);
        a.slot = Some(0);
        a.text = vec!['a' as u16];
        let mut b = Item::new(0x1000);
        b.slot = Some(2);
        b.text = vec!['b' as u16];
        bmg.items = vec![b, a];
        bmg.items.sort_by_key(|it| it.mid);
        bmg.reserved_slots = vec![1];

        let bytes = bmg.to_binary().unwrap();
        let (decoded, _) = Bmg::decode_binary(&bytes, BmgConfig::default()).unwrap();
        assert_eq!(decoded.items().len(), 2);
        assert_eq!(decoded.reserved_slots, vec![1]);
        assert_eq!(decoded.find(0x1000).unwrap().slot, Some(2));
        assert_eq!(decoded.find(0x2000).unwrap().slot, Some(0));
    }

    #[test]
    fn colliding_predefined_slots_reassign_at_or_past_n_predef() {
        let mut bmg = Bmg::new();
        bmg.have_mid = true;
        bmg.predefined_slot_mode = true;
        bmg.inf_size = 8;
        let mut a = Item::new(0x1000);
        a.slot = Some(5);
        a.text = vec!['a' as u16];
        let mut b = Item::new(0x2000);
        b.slot = Some(5);
        b.text = vec!['b' as u16];
        bmg.items = vec![a, b];
        bmg.items.sort_by_key(|it| it.mid);

        let bytes = bmg.to_binary().unwrap();
        let (decoded, _) = Bmg::decode_binary(&bytes, BmgConfig::default()).unwrap();
        assert_eq!(decoded.items().len(), 2);
        let a_slot = decoded.find(0x1000).unwrap().slot.unwrap();
        let b_slot = decoded.find(0x2000).unwrap().slot.unwrap();
        assert_ne!(a_slot, b_slot);
        assert!(a_slot == 5 || b_slot == 5);
        let overflowed = if a_slot == 5 { b_slot } else { a_slot };
        assert!(overflowed >= 6, "colliding item must land at or past n_predef (6), got {overflowed}");
    }

    #[test]
    fn inf_size_out_of_range_falls_back_to_default() {
        let mut bytes = build_minimal(TextEncoding::Cp1252, "x");
        // Corrupt inf_size (first 2 bytes of the INF1 payload past n_msg) to 3.
        let inf1_pos = bytes.windows(4).position(|w| w == b"INF1").unwrap();
        let payload_pos = inf1_pos + 8;
        bytes[payload_pos + 2] = 0;
        bytes[payload_pos + 3] = 3;
        let (_, diagnostics) = Bmg::decode_binary(&bytes, BmgConfig::default()).unwrap();
        assert!(!diagnostics.is_empty());
    }
}
