//! The patch engine (C10). Grounded in the teacher's `bmg.rs` merge/diff helpers,
//! generalized to the full command table and the MKW-specific range-copy passes
//! `original_source/project/dclib/lib-bmg.c`'s `PatchBMG` implements.

use regex::Regex;

use crate::error::PatchError;
use crate::item::{pack_mid, Item, Mid};
use crate::regex_engine::{DefaultRegexEngine, RegexEngine};
use crate::store::Bmg;
use crate::tables::{MidRange, MID_ARENA1, MID_ARENA2, MID_BCUP, MID_CT_ARENA, MID_CT_BCUP, MID_CT_RCUP, MID_CT_TRACK, MID_LE_ARENA, MID_LE_BCUP, MID_LE_RCUP, MID_LE_TRACK, MID_RCUP, MID_TRACK1, MID_TRACK2};

/// One of the eight set-like merge operations (spec §4.8's table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Replace,
    Insert,
    Overwrite,
    Delete,
    Mask,
    Equal,
    NotEqual,
    Print,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    OnlyA,
    OnlyB,
    Diff,
    Equal,
}

fn categorize(a: Option<&Item>, b: Option<&Item>) -> Category {
    match (a, b) {
        (Some(_), None) => Category::OnlyA,
        (None, Some(_)) => Category::OnlyB,
        (Some(ai), Some(bi)) if ai.text == bi.text => Category::Equal,
        (Some(_), Some(_)) => Category::Diff,
        (None, None) => unreachable!("mid drawn from the union of both stores"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Keep,
    Remove,
    Take,
}

fn action_for(op: SetOp, cat: Category) -> Action {
    use Category::*;
    match op {
        SetOp::Replace => match cat {
            OnlyA => Action::Keep,
            OnlyB => Action::Remove,
            Diff => Action::Take,
            Equal => Action::Take,
        },
        SetOp::Insert => match cat {
            OnlyA => Action::Keep,
            OnlyB => Action::Take,
            Diff => Action::Keep,
            Equal => Action::Take,
        },
        SetOp::Overwrite => match cat {
            OnlyA => Action::Keep,
            OnlyB => Action::Take,
            Diff => Action::Take,
            Equal => Action::Take,
        },
        SetOp::Delete => match cat {
            OnlyA => Action::Keep,
            OnlyB => Action::Remove,
            Diff => Action::Remove,
            Equal => Action::Remove,
        },
        SetOp::Mask => match cat {
            OnlyA => Action::Remove,
            OnlyB => Action::Remove,
            Diff => Action::Keep,
            Equal => Action::Keep,
        },
        SetOp::Equal => match cat {
            OnlyA => Action::Remove,
            OnlyB => Action::Remove,
            Diff => Action::Remove,
            Equal => Action::Keep,
        },
        SetOp::NotEqual => match cat {
            OnlyA => Action::Remove,
            OnlyB => Action::Remove,
            Diff => Action::Keep,
            Equal => Action::Remove,
        },
        SetOp::Print => match cat {
            OnlyA => Action::Keep,
            OnlyB => Action::Remove,
            Diff => Action::Keep,
            Equal => Action::Keep,
        },
    }
}

/// Applies one of the eight set-like ops, merging `source` into `dest` in place.
/// `PRINT` never mutates `dest`; it returns one formatted line per item present in
/// both stores.
pub fn apply_set_op(dest: &mut Bmg, source: &Bmg, op: SetOp) -> Vec<String> {
    let mut mids: Vec<Mid> = dest.items().iter().map(|i| i.mid).chain(source.items().iter().map(|i| i.mid)).collect();
    mids.sort_unstable();
    mids.dedup();

    let encoding = dest.encoding;
    let mut printed = Vec::new();

    for mid in mids {
        let a = dest.find(mid).cloned();
        let b = source.find(mid).cloned();
        let cat = categorize(a.as_ref(), b.as_ref());
        let action = action_for(op, cat);

        if op == SetOp::Print {
            if let (Some(ai), Some(_)) = (&a, &b) {
                printed.push(format!("{:08x}: {}", mid, encoding.units_to_string(&ai.text)));
            }
            continue;
        }

        match action {
            Action::Keep => {}
            Action::Remove => {
                dest.remove(mid);
            }
            Action::Take => {
                let Some(src_item) = &b else { continue };
                if matches!(op, SetOp::Replace | SetOp::Insert | SetOp::Overwrite)
                    && src_item.condition != 0
                    && dest.find(src_item.condition).is_none()
                {
                    continue;
                }
                let forced = dest.config.force_attrib;
                let default_used = dest.default_attrib_used;
                let (attrib, used) = if let Some(forced) = forced {
                    (forced, crate::item::ATTRIB_SIZE as u16)
                } else {
                    let used = default_used.min(src_item.attrib_used) as usize;
                    let mut attrib = [0u8; crate::item::ATTRIB_SIZE];
                    attrib[..used].copy_from_slice(&src_item.attrib[..used]);
                    (attrib, used as u16)
                };
                let slot = src_item.slot;
                let text = src_item.text.clone();

                let item = dest.insert(mid);
                item.text = text;
                item.attrib = attrib;
                item.attrib_used = used;
                if slot.is_some() {
                    item.slot = slot;
                }
            }
        }
    }

    printed
}

/// Renders one item's `FORMAT` template. `%s`/`%p1,p2s` slice the item's own text;
/// `%i`/`%I` the MID in hex (bare / zero-padded to 4 digits); `%n`/`%N` the
/// container name (full / trimmed); `%l[p1[,p2]]` a 0-based, clamped line slice;
/// `%m`…`%M` buffers everything between them and only replays it if whatever
/// follows `%M` (typically another `%l`/`%L`) itself produced output — otherwise
/// the whole marked group is dropped.
pub fn format_item(template: &str, mid: Mid, text: &str, container_name: &str) -> String {
    enum Mode {
        Normal,
        Prefixing,
        Suffixing,
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let mut out = String::new();
    let mut prefix_buf = String::new();
    let mut suffix_buf = String::new();
    let mut mode = Mode::Normal;

    let push = |mode: &Mode, out: &mut String, prefix: &mut String, suffix: &mut String, s: &str| match mode {
        Mode::Normal => out.push_str(s),
        Mode::Prefixing => prefix.push_str(s),
        Mode::Suffixing => suffix.push_str(s),
    };

    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            push(&mode, &mut out, &mut prefix_buf, &mut suffix_buf, &c.to_string());
            continue;
        }

        let mut num1 = String::new();
        while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
            num1.push(chars.next().unwrap());
        }
        let mut num2 = String::new();
        if chars.peek() == Some(&',') {
            chars.next();
            while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                num2.push(chars.next().unwrap());
            }
        }
        let Some(letter) = chars.next() else { break };

        let rendered = match letter {
            's' => {
                if num1.is_empty() {
                    text.to_string()
                } else {
                    let p1: usize = num1.parse().unwrap_or(0);
                    let total = text.chars().count();
                    let p2: usize = if num2.is_empty() { total } else { num2.parse().unwrap_or(p1) };
                    text.chars().skip(p1).take(p2.saturating_sub(p1)).collect()
                }
            }
            'i' => format!("{mid:x}"),
            'I' => format!("{mid:04x}"),
            'n' => container_name.to_string(),
            'N' => container_name.trim().to_string(),
            'l' => {
                let p1: usize = num1.parse().unwrap_or(0);
                if num2.is_empty() {
                    lines.get(p1).copied().unwrap_or("").to_string()
                } else {
                    let p2: usize = num2.parse().unwrap_or(p1).min(lines.len().saturating_sub(1));
                    if p1 >= lines.len() || p2 < p1 {
                        String::new()
                    } else {
                        lines[p1..=p2].join("\n")
                    }
                }
            }
            'L' => {
                let p1: usize = num1.parse().unwrap_or(0);
                match lines.get(p1) {
                    Some(s) => s.to_string(),
                    None => {
                        mode = Mode::Prefixing;
                        prefix_buf.clear();
                        String::new()
                    }
                }
            }
            'm' => {
                mode = Mode::Prefixing;
                prefix_buf.clear();
                String::new()
            }
            'M' => {
                if matches!(mode, Mode::Prefixing) {
                    mode = Mode::Suffixing;
                    suffix_buf.clear();
                }
                String::new()
            }
            '%' => "%".to_string(),
            _ => String::new(),
        };
        push(&mode, &mut out, &mut prefix_buf, &mut suffix_buf, &rendered);
    }

    match mode {
        Mode::Suffixing if !suffix_buf.is_empty() => {
            out.push_str(&prefix_buf);
            out.push_str(&suffix_buf);
        }
        Mode::Prefixing => out.push_str(&prefix_buf),
        _ => {}
    }
    out
}

pub fn apply_format(dest: &mut Bmg, template: &str) {
    let container = (dest.config.hooks.container_name)();
    let encoding = dest.encoding;
    for item in dest.items_mut() {
        let text = encoding.units_to_string(&item.text);
        let rendered = format_item(template, item.mid, &text, &container);
        item.text = rendered.encode_utf16().collect();
    }
}

/// `REGEX`/`RM-REGEX`: render each item to text, run the `;`-separated
/// `s/…/…/flags` pipeline, and parse the result back. `remove_empty` (`RM-REGEX`)
/// drops any item the pipeline reduces to an empty string.
pub fn apply_regex(dest: &mut Bmg, pipeline_spec: &str, remove_empty: bool) -> Result<(), PatchError> {
    let engine = DefaultRegexEngine;
    let subs = engine.parse_pipeline(pipeline_spec)?;
    let encoding = dest.encoding;

    let mut to_remove = Vec::new();
    for item in dest.items_mut() {
        let mut text = encoding.units_to_string(&item.text);
        for sub in &subs {
            text = engine.replace(&text, sub)?;
        }
        if remove_empty && text.is_empty() {
            to_remove.push(item.mid);
        } else {
            item.text = text.encode_utf16().collect();
        }
    }
    for mid in to_remove {
        dest.remove(mid);
    }
    Ok(())
}

/// `ID`/`ID-ALL`: prepend `<letter><mid-hex>:` to every message (`all`) or only
/// the non-empty ones.
pub fn apply_id(dest: &mut Bmg, all: bool) {
    let letter = dest.meta.name.chars().next().map(|c| c.to_ascii_uppercase()).unwrap_or('M');
    let encoding = dest.encoding;
    for item in dest.items_mut() {
        if !all && item.is_empty_text() {
            continue;
        }
        let text = encoding.units_to_string(&item.text);
        let tagged = format!("{letter}{:x}:{text}", item.mid);
        item.text = tagged.encode_utf16().collect();
    }
}

/// `UNICODE`: turns `\u{}`-style opcodes into plain characters when the target
/// codepoint is `>= 0x20`. `RM-ESCAPES`: strips every in-band opcode outright.
pub fn normalize_escapes(dest: &mut Bmg, strip_all: bool) {
    use crate::escape::{decode_opcode, encode_opcode, OPCODE_MARKER};

    for item in dest.items_mut() {
        let mut out = Vec::with_capacity(item.text.len());
        let mut i = 0;
        while i < item.text.len() {
            let u = item.text[i];
            if u != OPCODE_MARKER {
                out.push(u);
                i += 1;
                continue;
            }
            let (op, consumed) = decode_opcode(&item.text[i..]);
            if strip_all {
                // drop
            } else if let Some(cp) = op.as_unicode() {
                if cp >= 0x20 {
                    out.push(cp as u16);
                } else {
                    encode_opcode(&mut out, &op);
                }
            } else {
                encode_opcode(&mut out, &op);
            }
            i += consumed.max(1);
        }
        item.text = out;
    }
}

/// `GENERIC`: reads three reference messages (small/medium/large) from `source`,
/// strips their common prefix and suffix, and writes each remaining variant
/// substring into the matching MID in `dest`.
pub fn apply_generic(dest: &mut Bmg, source: &Bmg, mids: (Mid, Mid, Mid)) {
    let (small, medium, large) = mids;
    let order = [small, medium, large];
    let texts: Vec<String> = order.iter().map(|&m| source.find(m).map(|it| source.encoding.units_to_string(&it.text)).unwrap_or_default()).collect();

    let prefix_len = common_prefix_len(&texts);
    let suffix_len = common_suffix_len(&texts, prefix_len);

    for (idx, &mid) in order.iter().enumerate() {
        let full = &texts[idx];
        let total = full.chars().count();
        let variant: String = full.chars().skip(prefix_len).take(total.saturating_sub(prefix_len + suffix_len)).collect();
        let item = dest.insert(mid);
        item.text = variant.encode_utf16().collect();
    }
}

fn common_prefix_len(texts: &[String]) -> usize {
    if texts.is_empty() {
        return 0;
    }
    let mut len = texts[0].chars().count();
    for text in &texts[1..] {
        len = text.chars().zip(texts[0].chars()).take(len).take_while(|(a, b)| a == b).count().min(len);
    }
    len
}

fn common_suffix_len(texts: &[String], cap: usize) -> usize {
    if texts.is_empty() {
        return 0;
    }
    let reversed: Vec<Vec<char>> = texts.iter().map(|t| t.chars().rev().collect()).collect();
    let mut len = reversed[0].len().saturating_sub(cap);
    for rev in &reversed[1..] {
        let avail = rev.len().saturating_sub(cap);
        len = rev.iter().zip(reversed[0].iter()).take(len.min(avail)).take_while(|(a, b)| a == b).count().min(len);
    }
    len
}

fn copy_ranges(dest: &mut Bmg, source: &Bmg, mapping: &[(MidRange, MidRange)], force: bool) {
    for &(src_range, dst_range) in mapping {
        let n = src_range.len().min(dst_range.len());
        for i in 0..n {
            let src_mid = pack_mid((src_range.beg + i) as u16, 0);
            let dst_mid = pack_mid((dst_range.beg + i) as u16, 0);
            let Some(src_item) = source.find(src_mid) else { continue };
            if !force && dest.find(dst_mid).is_some_and(|it| !it.is_empty_text()) {
                continue;
            }
            let text = src_item.text.clone();
            let attrib = src_item.attrib;
            let attrib_used = src_item.attrib_used;
            let item = dest.insert(dst_mid);
            item.text = text;
            item.attrib = attrib;
            item.attrib_used = attrib_used;
        }
    }
}

fn fill_placeholders(dest: &mut Bmg, range: MidRange, prefix: &str, limit: u32) {
    let n = if limit == 0 { range.len() } else { limit.min(range.len()) };
    for i in 0..n {
        let mid = pack_mid((range.beg + i) as u16, 0);
        if dest.find(mid).is_some_and(|it| !it.is_empty_text()) {
            continue;
        }
        let placeholder = format!("_{prefix}{i}_");
        let item = dest.insert(mid);
        item.text = placeholder.encode_utf16().collect();
    }
}

/// Removes every message whose text matches the `_<prefix><n>_` pattern
/// [`fill_placeholders`] synthesises.
pub fn remove_filled(dest: &mut Bmg) {
    let re = Regex::new(r"^_[A-Za-z]+[0-9]+_$").expect("static pattern");
    let encoding = dest.encoding;
    dest.retain(|item| {
        let text = encoding.units_to_string(&item.text);
        !re.is_match(&text)
    });
}

fn classic_ranges() -> [(MidRange, MidRange); 2] {
    [(MID_TRACK1, MID_TRACK2), (MID_ARENA1, MID_ARENA2)]
}

fn ct_ranges() -> [(MidRange, MidRange); 4] {
    [(MID_TRACK1, MID_CT_TRACK), (MID_ARENA1, MID_CT_ARENA), (MID_RCUP, MID_CT_RCUP), (MID_BCUP, MID_CT_BCUP)]
}

fn le_ranges() -> [(MidRange, MidRange); 4] {
    [(MID_TRACK1, MID_LE_TRACK), (MID_ARENA1, MID_LE_ARENA), (MID_RCUP, MID_LE_RCUP), (MID_BCUP, MID_LE_BCUP)]
}

const FILL_PREFIXES: [&str; 4] = ["T", "A", "RC", "BC"];

/// Every named patch command beyond the eight set-like ops, dispatched by
/// [`execute`].
#[derive(Debug, Clone)]
pub enum PatchCommand {
    Set(SetOp),
    Format(String),
    Regex(String),
    RmRegex(String),
    Generic { small: Mid, medium: Mid, large: Mid },
    Id,
    IdAll,
    Unicode,
    RmEscapes,
    XCopy,
    XForceCopy,
    CtCopy,
    CtForceCopy,
    CtFill(u32),
    LeCopy,
    LeForceCopy,
    LeFill(u32),
    RmFilled,
}

/// Runs one [`PatchCommand`] against `dest`. Commands that merge from another
/// store (`Set`, range-copy passes) require `source`; standalone commands
/// (`Format`, `Regex`, `Id`, …) ignore it.
pub fn execute(dest: &mut Bmg, source: Option<&Bmg>, cmd: &PatchCommand) -> Result<Vec<String>, PatchError> {
    match cmd {
        PatchCommand::Set(op) => {
            let source = source.ok_or_else(|| PatchError::MissingSource("a set operation".to_string()))?;
            Ok(apply_set_op(dest, source, *op))
        }
        PatchCommand::Format(template) => {
            apply_format(dest, template);
            Ok(Vec::new())
        }
        PatchCommand::Regex(spec) => {
            apply_regex(dest, spec, false)?;
            Ok(Vec::new())
        }
        PatchCommand::RmRegex(spec) => {
            apply_regex(dest, spec, true)?;
            Ok(Vec::new())
        }
        PatchCommand::Generic { small, medium, large } => {
            let source = source.ok_or_else(|| PatchError::MissingSource("GENERIC".to_string()))?;
            apply_generic(dest, source, (*small, *medium, *large));
            Ok(Vec::new())
        }
        PatchCommand::Id => {
            apply_id(dest, false);
            Ok(Vec::new())
        }
        PatchCommand::IdAll => {
            apply_id(dest, true);
            Ok(Vec::new())
        }
        PatchCommand::Unicode => {
            normalize_escapes(dest, false);
            Ok(Vec::new())
        }
        PatchCommand::RmEscapes => {
            normalize_escapes(dest, true);
            Ok(Vec::new())
        }
        PatchCommand::XCopy | PatchCommand::XForceCopy => {
            let source = source.ok_or_else(|| PatchError::MissingSource("X-COPY".to_string()))?;
            copy_ranges(dest, source, &classic_ranges(), matches!(cmd, PatchCommand::XForceCopy));
            Ok(Vec::new())
        }
        PatchCommand::CtCopy | PatchCommand::CtForceCopy => {
            let source = source.ok_or_else(|| PatchError::MissingSource("CT-COPY".to_string()))?;
            copy_ranges(dest, source, &ct_ranges(), matches!(cmd, PatchCommand::CtForceCopy));
            Ok(Vec::new())
        }
        PatchCommand::CtFill(limit) => {
            for ((_, dst), prefix) in ct_ranges().into_iter().zip(FILL_PREFIXES) {
                fill_placeholders(dest, dst, prefix, *limit);
            }
            Ok(Vec::new())
        }
        PatchCommand::LeCopy | PatchCommand::LeForceCopy => {
            let source = source.ok_or_else(|| PatchError::MissingSource("LE-COPY".to_string()))?;
            copy_ranges(dest, source, &le_ranges(), matches!(cmd, PatchCommand::LeForceCopy));
            Ok(Vec::new())
        }
        PatchCommand::LeFill(limit) => {
            for ((_, dst), prefix) in le_ranges().into_iter().zip(FILL_PREFIXES) {
                fill_placeholders(dest, dst, prefix, *limit);
            }
            Ok(Vec::new())
        }
        PatchCommand::RmFilled => {
            remove_filled(dest);
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BmgConfig;

    fn store(pairs: &[(Mid, &str)]) -> Bmg {
        let mut bmg = Bmg::new_with(BmgConfig::default());
        for &(mid, text) in pairs {
            let item = bmg.insert(mid);
            item.text = text.encode_utf16().collect();
        }
        bmg
    }

    #[test]
    fn overwrite_respects_condition_gating() {
        let mut dest = store(&[(0x100, "x")]);
        let mut source = store(&[(0x100, "y"), (0x300, "z")]);
        source.find_mut(0x100).unwrap().condition = 0x200;
        source.find_mut(0x300).unwrap().condition = 0x100;

        apply_set_op(&mut dest, &source, SetOp::Overwrite);

        assert_eq!(dest.encoding.units_to_string(&dest.find(0x100).unwrap().text), "x");
        assert_eq!(dest.encoding.units_to_string(&dest.find(0x300).unwrap().text), "z");
    }

    #[test]
    fn equal_then_not_equal_deletes_everything() {
        let mut dest = store(&[(0x1, "same"), (0x2, "left"), (0x3, "only-a")]);
        let source = store(&[(0x1, "same"), (0x2, "right")]);

        apply_set_op(&mut dest, &source, SetOp::Equal);
        apply_set_op(&mut dest, &source, SetOp::NotEqual);

        assert!(dest.items().is_empty());
    }

    #[test]
    fn format_template_slices_line_and_pads_mid() {
        let out = format_item("%I: %l1", 0x42, "Foo\nBar\nBaz", "");
        assert_eq!(out, "0042: Bar");
    }

    #[test]
    fn format_marker_group_drops_when_tail_is_empty() {
        let out = format_item("%m[prefix] %M%l5", 0x1, "Foo\nBar\nBaz", "");
        assert_eq!(out, "");
    }

    #[test]
    fn rm_regex_deletes_items_emptied_by_substitution() {
        let mut dest = store(&[(0x1, "drop-me"), (0x2, "keep")]);
        apply_regex(&mut dest, "s/drop-me//", true).unwrap();
        assert!(dest.find(0x1).is_none());
        assert!(dest.find(0x2).is_some());
    }

    #[test]
    fn rm_filled_removes_synthesised_placeholders_only() {
        let mut dest = store(&[(0x1, "_T0_"), (0x2, "real text")]);
        remove_filled(&mut dest);
        assert!(dest.find(0x1).is_none());
        assert!(dest.find(0x2).is_some());
    }
}
