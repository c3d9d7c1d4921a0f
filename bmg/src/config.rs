//! Explicit, caller-supplied configuration. Per the concurrency & resource model,
//! everything that was a module-level global in the source (`opt_bmg_*`, the
//! "macros store", the MKW index-remap hooks) is a field here instead of hidden
//! state, passed through wherever it's needed.

use crate::endian::Endianness;
use std::rc::Rc;

/// How liberally `\c{}` colour escapes are recognised/emitted by name versus raw hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ColorNameTier {
    /// Disable color names entirely; always print/require raw hex.
    None,
    /// Only the original standard color names.
    Basics,
    /// Also accept/emit the `YORn` names.
    Yor,
}

impl Default for ColorNameTier {
    fn default() -> Self {
        ColorNameTier::Yor
    }
}

/// Which MKW engine extension's MID ranges the text scanner/emitter and patch
/// engine should recognise in addition to the two classic (Nintendo) track/arena
/// ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CtMode {
    #[default]
    Nintendo,
    CtCode,
    LeCode,
}

/// Hook table: per-instance callbacks that remap MKW track/arena indices, name the
/// container a `Bmg` came from (used by `FORMAT %n`/`%N` and `ID`), and observe
/// unrecognised `@` directives during a text scan.
#[derive(Clone)]
pub struct Hooks {
    pub track_index: Rc<dyn Fn(u32) -> u32>,
    pub arena_index: Rc<dyn Fn(u32) -> u32>,
    pub container_name: Rc<dyn Fn() -> String>,
    pub at_directive: Rc<dyn Fn(&str, Option<&str>)>,
}

impl Default for Hooks {
    fn default() -> Self {
        Hooks {
            track_index: Rc::new(|i| i),
            arena_index: Rc::new(|i| i),
            container_name: Rc::new(|| String::new()),
            at_directive: Rc::new(|_, _| {}),
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}

/// Everything the source kept as a module-level global. Constructed once and
/// threaded explicitly through `Bmg::new_with`, the scanner, and the patch engine.
#[derive(Debug, Clone)]
pub struct BmgConfig {
    /// Section alignment used by the raw encoder (C7). Historically conflated
    /// with `legacy_block_size`; kept as two independent knobs per the source's
    /// own flagged design debt.
    pub section_align: u32,
    /// Block size legacy (GameCube) files use to scale the header's `size` field.
    pub legacy_block_size: u32,
    pub force_attrib: Option<[u8; 40]>,
    pub default_attrib: Option<([u8; 40], u16)>,
    pub default_endian: Endianness,
    pub color_name_tier: ColorNameTier,
    pub max_recurse: u32,
    pub ct_mode: CtMode,
    pub use_slots: bool,
    pub use_raw_sections: bool,
    /// If the header's encoding byte is out of range, treat it as CP1252 with a
    /// warning instead of failing the decode outright.
    pub force_encoding: bool,
    /// `>0`: cap on how many CT/LE cup/track slots `CT-FILL`/`LE-FILL` will
    /// synthesise placeholders for. `0` means unlimited.
    pub fill_limit: u32,
    pub allow_print_directive: bool,
    pub hooks: Hooks,
    /// Process-wide "macros" store consulted by `\m{}`/`\M{}` during text scan,
    /// in addition to (for `\m{}`) the local store being scanned. `None` is the
    /// null default — never a hidden singleton, per the concurrency model.
    pub macros: Option<Rc<crate::store::Bmg>>,
}

impl Default for BmgConfig {
    fn default() -> Self {
        BmgConfig {
            section_align: 32,
            legacy_block_size: 32,
            force_attrib: None,
            default_attrib: None,
            default_endian: Endianness::Big,
            color_name_tier: ColorNameTier::default(),
            max_recurse: 10,
            ct_mode: CtMode::default(),
            use_slots: true,
            use_raw_sections: true,
            force_encoding: false,
            fill_limit: 0,
            allow_print_directive: false,
            hooks: Hooks::default(),
            macros: None,
        }
    }
}

impl BmgConfig {
    pub fn track_index(&self, i: u32) -> u32 {
        (self.hooks.track_index)(i)
    }

    pub fn arena_index(&self, i: u32) -> u32 {
        (self.hooks.arena_index)(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_tier_ordering() {
        assert!(ColorNameTier::Yor > ColorNameTier::Basics);
        assert!(ColorNameTier::Basics > ColorNameTier::None);
    }

    #[test]
    fn default_hooks_are_identity() {
        let hooks = Hooks::default();
        assert_eq!((hooks.track_index)(5), 5);
        assert_eq!((hooks.arena_index)(3), 3);
    }
}
