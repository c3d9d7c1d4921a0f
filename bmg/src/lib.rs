//! Codec and patch engine for Nintendo's BMG message-container format.
//!
//! Wires together the binary codec ([`store`]), the `#BMG` text form
//! ([`text`]), the in-band opcode escape grammar ([`escape`]), and the patch
//! engine ([`patch`]) behind [`Bmg`], the single in-memory representation all
//! of them read and write.

pub mod config;
pub mod encoding;
pub mod endian;
pub mod error;
pub mod escape;
pub mod item;
pub mod patch;
pub mod regex_engine;
pub mod section;
pub mod store;
pub mod tables;
pub mod text;
pub mod util;

pub use config::{BmgConfig, ColorNameTier, CtMode, Hooks};
pub use error::{BmgError, Diagnostic, Diagnostics, PatchError, Severity};
pub use item::{pack_mid, unpack_mid, Item, Mid, Slot};
pub use store::{Bmg, FileMeta};
pub use text::{TextOptions, TEXT_MAGIC};

/// Auto-detects binary ("MESGbmg1") vs. text ("#BMG") form and decodes
/// accordingly. The top-level entry point the CLI and library consumers use.
pub fn scan(data: &[u8], config: BmgConfig) -> Result<(Bmg, Diagnostics), BmgError> {
    if data.len() >= 8 && &data[0..8] == section::MAGIC {
        return store::Bmg::decode_binary(data, config);
    }
    let text = String::from_utf8_lossy(data);
    text::scan_text(&text, config)
}

impl Bmg {
    /// Renders this store as `#BMG` text with default formatting options.
    pub fn to_text(&self) -> String {
        text::write_text(self, &TextOptions::default())
    }

    /// Renders this store as `#BMG` text with caller-supplied formatting options.
    pub fn to_text_with(&self, options: &TextOptions) -> String {
        text::write_text(self, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_detects_binary_form() {
        let mut bmg = Bmg::new();
        bmg.encoding = encoding::TextEncoding::Cp1252;
        bmg.have_mid = true;
        let item = bmg.insert(0x10);
        item.text = "hi".encode_utf16().collect();
        let bytes = bmg.to_binary().unwrap();

        let (decoded, _) = scan(&bytes, BmgConfig::default()).unwrap();
        assert_eq!(decoded.items().len(), 1);
    }

    #[test]
    fn scan_detects_text_form() {
        let text = b"#BMG\n@ENCODING=1\n0x1 = hello\n";
        let (decoded, _) = scan(text, BmgConfig::default()).unwrap();
        assert_eq!(decoded.items().len(), 1);
    }

    #[test]
    fn to_text_round_trips_through_scan() {
        let mut bmg = Bmg::new();
        bmg.encoding = encoding::TextEncoding::Cp1252;
        let item = bmg.insert(0x99);
        item.text = "round trip".encode_utf16().collect();

        let rendered = bmg.to_text();
        let (reparsed, _) = scan(rendered.as_bytes(), BmgConfig::default()).unwrap();
        assert_eq!(reparsed.encoding.units_to_string(&reparsed.find(0x99).unwrap().text), "round trip");
    }
}
