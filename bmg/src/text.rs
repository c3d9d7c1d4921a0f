//! `#BMG` text form (C8 scanner, C9 emitter). Grounded in spec §4.7's grammar;
//! structured the way the teacher's `bmg.rs` keeps read/write as sibling
//! functions on the same type rather than splitting into separate modules.

use crate::config::{BmgConfig, CtMode};
use crate::error::{BmgError, Diagnostic, Diagnostics};
use crate::escape::{emit_escapes, scan_escapes};
use crate::item::{pack_mid, Mid};
use crate::store::Bmg;
use crate::tables::{MID_ARENA1, MID_ARENA2, MID_LE_ARENA, MID_LE_TRACK, MID_TRACK1, MID_TRACK2};

pub const TEXT_MAGIC: &str = "#BMG";

/// Output knobs for [`write_text`] (line width, attribute placement, …). Starts
/// minimal; the common defaults match what the emitter tests exercise.
#[derive(Debug, Clone)]
pub struct TextOptions {
    pub wrap_column: usize,
}

impl Default for TextOptions {
    fn default() -> Self {
        TextOptions { wrap_column: 72 }
    }
}

struct Scanner<'a> {
    config: &'a BmgConfig,
    bmg: Bmg,
    diagnostics: Diagnostics,
    condition: Mid,
    include_depth: u32,
}

/// Scans a `#BMG` text buffer into a [`Bmg`]. Permissive like the binary decoder:
/// unrecognised directives are ignored (per §4.7), not fatal.
pub fn scan_text(text: &str, config: BmgConfig) -> Result<(Bmg, Diagnostics), BmgError> {
    let text = text.strip_prefix('\u{FEFF}').unwrap_or(text);
    let mut lines = text.lines().map(|l| l.trim_end_matches('\r'));

    let first = lines.next().map(|l| l.trim()).unwrap_or("");
    if first != TEXT_MAGIC {
        return Err(BmgError::InvalidMagic);
    }

    let mut scanner = Scanner { config: &config, bmg: Bmg::new_with(config.clone()), diagnostics: Diagnostics::default(), condition: 0, include_depth: 0 };

    let mut pending_continuation: Option<Vec<Mid>> = None;
    for (lineno, raw) in lines.enumerate() {
        let line = strip_comment(raw);
        let line_number = lineno + 2;
        if line.trim().is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("\t+") {
            if let Some(mids) = &pending_continuation {
                let appended = scan_escapes(rest, scanner.config, &scanner.bmg)?;
                for &mid in mids {
                    if let Some(item) = scanner.bmg.find_mut(mid) {
                        item.text.extend(appended.clone());
                    }
                }
            }
            continue;
        }
        pending_continuation = None;

        if let Some(rest) = line.strip_prefix('@') {
            scanner.scan_directive(rest, line_number)?;
            continue;
        }

        pending_continuation = scanner.scan_message_line(line, line_number)?;
    }

    Ok((scanner.bmg, scanner.diagnostics))
}

impl<'a> Scanner<'a> {
    fn scan_directive(&mut self, rest: &str, line_number: usize) -> Result<(), BmgError> {
        if let Some(mid_str) = rest.strip_prefix('?') {
            self.condition = parse_mid(mid_str.trim()).unwrap_or(0);
            return Ok(());
        }
        if rest.starts_with('=') || rest.starts_with('$') || rest.starts_with('<') || rest.starts_with('>') {
            // Pattern guards, debug prints, includes, and gotos are handled by
            // the external file-loading collaborator; the in-memory scanner
            // only needs to stay within the recursion cap for `@<`.
            if rest.starts_with('<') {
                if self.include_depth >= self.config.max_recurse {
                    self.diagnostics.push(Diagnostic::warn_at("include depth exceeded, ignoring", line_number));
                    return Ok(());
                }
                self.include_depth += 1;
            }
            return Ok(());
        }

        let (name, value) = match rest.split_once('=') {
            Some((n, v)) => (n.trim(), Some(v.trim())),
            None => (rest.trim(), None),
        };

        (self.config.hooks.at_directive)(name, value);

        match name.to_ascii_uppercase().as_str() {
            "ENDIAN" => {
                if let Some(v) = value {
                    self.bmg.endian = if v.eq_ignore_ascii_case("little") { crate::endian::Endianness::Little } else { crate::endian::Endianness::Big };
                }
            }
            "LEGACY" => self.bmg.legacy = true,
            "ENCODING" => {
                if let Some(v) = value {
                    if let Ok(byte) = v.parse::<u8>() {
                        if let Some(enc) = crate::encoding::TextEncoding::from_byte(byte) {
                            self.bmg.encoding = enc;
                        }
                    }
                }
            }
            "BMG-MID" => self.bmg.have_mid = true,
            "INF-SIZE" => {
                if let Some(v) = value.and_then(|v| v.parse::<u32>().ok()) {
                    self.bmg.inf_size = v;
                }
            }
            "DEFAULT-ATTRIBS" => {
                if let Some(v) = value {
                    if let Ok(bytes) = crate::util::from_hex_string(v) {
                        let used = bytes.len().min(40);
                        self.bmg.default_attrib[..used].copy_from_slice(&bytes[..used]);
                        self.bmg.default_attrib_used = used as u16;
                    }
                }
            }
            _ => {
                // Unknown directives (and UNKNOWN-INF32-0C/UNKNOWN-MID16-0A/
                // UNKNOWN-MID32-0C, which only matter for exact header
                // round-trip) are ignored without error, per §4.7.
            }
        }
        Ok(())
    }

    /// Returns the MIDs to continue appending to, if this line opened one.
    fn scan_message_line(&mut self, line: &str, line_number: usize) -> Result<Option<Vec<Mid>>, BmgError> {
        let mut rest = line;
        let token = match parse_mid_token(&mut rest, self.config) {
            Some(m) => m,
            None => {
                self.diagnostics.push(Diagnostic::warn_at(format!("unrecognised message line: {line:?}"), line_number));
                return Ok(None);
            }
        };

        let mut slot = None;
        rest = rest.trim_start();
        if let Some(after_at) = rest.strip_prefix('@') {
            let (digits, remainder) = take_while(after_at, |c| c.is_ascii_digit());
            if let Ok(s) = digits.parse::<u32>() {
                slot = Some(s);
            }
            rest = remainder;
        }

        rest = rest.trim_start();
        let mut attrib = None;
        if rest.starts_with('[') {
            let end = rest.find(']').ok_or_else(|| BmgError::MalformedMessage { line: line_number, message: "unterminated attribute list".into() })?;
            attrib = Some(parse_attrib(&rest[1..end]));
            rest = &rest[end + 1..];
        } else if let Some(stripped) = rest.strip_prefix('~') {
            let (token, remainder) = take_while(stripped, |c| !c.is_whitespace());
            if let Ok(bytes) = crate::util::from_hex_string(token) {
                let mut buf = [0u8; 40];
                let used = bytes.len().min(40);
                buf[..used].copy_from_slice(&bytes[..used]);
                attrib = Some((buf, used as u16));
            }
            rest = remainder;
        }

        rest = rest.trim_start();
        let text_units = if let Some(text) = rest.strip_prefix('=') {
            Some(scan_escapes(text.trim_start(), self.config, &self.bmg)?)
        } else if rest.starts_with('/') {
            Some(Vec::new())
        } else {
            None
        };
        let opened_continuation = matches!(text_units, Some(ref _units) if rest.starts_with('='));

        let mids = alias_mids(&token, self.config);
        for &target_mid in &mids {
            let item = self.bmg.insert(target_mid);
            item.condition = self.condition;
            if let Some(s) = slot {
                item.slot = Some(s);
            }
            if let Some((bytes, used)) = attrib {
                item.attrib = bytes;
                item.attrib_used = used;
            }
            if let Some(units) = &text_units {
                item.text = units.clone();
            }
        }

        Ok(opened_continuation.then_some(mids))
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn take_while(s: &str, pred: impl Fn(char) -> bool) -> (&str, &str) {
    let end = s.find(|c| !pred(c)).unwrap_or(s.len());
    (&s[..end], &s[end..])
}

fn parse_mid(s: &str) -> Option<Mid> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        s.parse::<u32>().ok().or_else(|| u32::from_str_radix(s, 16).ok())
    }
}

/// What a message line's leading MID token resolves to before range expansion.
/// `Track`/`Arena` carry the raw (un-remapped) cup/track or arena index so
/// `alias_mids` can apply `config.track_index`/`arena_index` once and reuse the
/// identical remapped value across every range the alias expands into.
enum MidToken {
    Track(u32),
    Arena(u32),
    Raw(Mid),
}

/// Parses the leading MID token of a message line (hex, or a `T`/`U`/`M` alias),
/// advancing `rest` past it.
fn parse_mid_token<'a>(rest: &mut &'a str, _config: &BmgConfig) -> Option<MidToken> {
    let trimmed = rest.trim_start();
    let mut chars = trimmed.chars();
    match chars.next()? {
        'T' | 't' => {
            let tail = chars.as_str();
            let mut it = tail.chars();
            let cup = it.next().and_then(|c| c.to_digit(16))?;
            let track = it.next().and_then(|c| c.to_digit(16))?;
            let idx = cup * 16 + track;
            *rest = it.as_str();
            Some(MidToken::Track(idx))
        }
        'U' | 'u' => {
            let tail = chars.as_str();
            let (digits, remainder) = take_while(tail, |c| c.is_ascii_digit());
            if digits.is_empty() {
                return None;
            }
            let idx = digits.parse::<u32>().ok()?;
            *rest = remainder;
            Some(MidToken::Arena(idx))
        }
        'M' => {
            let tail = chars.as_str();
            let (digits, remainder) = take_while(tail, |c| c.is_ascii_digit());
            if digits.is_empty() {
                return None;
            }
            let idx = digits.parse::<u32>().ok()?;
            *rest = remainder;
            Some(MidToken::Raw(pack_mid((crate::tables::MID_CHAT.beg + idx) as u16, 0)))
        }
        _ => {
            let (token, remainder) = take_while(trimmed, |c| !c.is_whitespace() && c != '[' && c != '@' && c != '=' && c != '~' && c != '/');
            let mid = parse_mid(token)?;
            *rest = remainder;
            Some(MidToken::Raw(mid))
        }
    }
}

/// Expands a parsed MID token into every target MID it aliases. `Track`/`Arena`
/// tokens insert the same text at both classic-range slots (and, under
/// `CtMode::LeCode`, the matching CT-CODE/LE-CODE slot too) so e.g. `T1B` affects
/// a track both in the vanilla Nintendo range and its engine-extension twin.
fn alias_mids(token: &MidToken, config: &BmgConfig) -> Vec<Mid> {
    match token {
        MidToken::Track(idx) => {
            let idx = config.track_index(*idx);
            let mut mids = vec![pack_mid((MID_TRACK1.beg + idx) as u16, 0), pack_mid((MID_TRACK2.beg + idx) as u16, 0)];
            if config.ct_mode == CtMode::LeCode {
                mids.push(pack_mid((MID_LE_TRACK.beg + idx) as u16, 0));
            }
            mids
        }
        MidToken::Arena(idx) => {
            let idx = config.arena_index(*idx);
            let mut mids = vec![pack_mid((MID_ARENA1.beg + idx) as u16, 0), pack_mid((MID_ARENA2.beg + idx) as u16, 0)];
            if config.ct_mode == CtMode::LeCode {
                mids.push(pack_mid((MID_LE_ARENA.beg + idx) as u16, 0));
            }
            mids
        }
        MidToken::Raw(mid) => vec![*mid],
    }
}

fn parse_attrib(body: &str) -> ([u8; 40], u16) {
    let mut buf = [0u8; 40];
    let mut used = 0usize;
    for (i, lane) in body.split('/').enumerate() {
        if i >= 10 {
            break;
        }
        if let Ok(value) = u32::from_str_radix(lane.trim().trim_start_matches("0x"), 16) {
            buf[i * 4..i * 4 + 4].copy_from_slice(&value.to_be_bytes());
            used = (i + 1) * 4;
        }
    }
    (buf, used as u16)
}

/// Emits a `Bmg` as `#BMG` text, per C9: one message per line, `\n`-escaped
/// bodies, soft-wrapped past `wrap_column`. Grouping by MKW/CT/LE caption and
/// hex-dumping of raw sections are left for a caption-aware emitter to layer on
/// top of this base form; this function always produces syntax the scanner
/// accepts.
pub fn write_text(bmg: &Bmg, options: &TextOptions) -> String {
    let mut out = String::new();
    out.push_str(TEXT_MAGIC);
    out.push_str("\r\n");
    out.push_str(&format!("@ENCODING={}\r\n", bmg.encoding.to_byte()));
    if bmg.have_mid {
        out.push_str("@BMG-MID\r\n");
    }
    out.push_str(&format!("@INF-SIZE={}\r\n", bmg.inf_size));

    for item in bmg.items() {
        out.push_str(&format!("0x{:08x}", item.mid));
        if let Some(slot) = item.slot {
            out.push_str(&format!("@{slot}"));
        }
        if item.attrib_used > 0 {
            out.push('[');
            for (i, chunk) in item.attrib[..item.attrib_used as usize].chunks(4).enumerate() {
                if i > 0 {
                    out.push('/');
                }
                out.push_str(&format!("{:08x}", u32::from_be_bytes(chunk.try_into().unwrap())));
            }
            out.push(']');
        }
        if item.text.is_empty() {
            out.push_str(" /");
        } else {
            out.push_str(" = ");
            out.push_str(&wrap_text(&emit_escapes(&item.text, &bmg.config), options.wrap_column));
        }
        out.push_str("\r\n");
    }

    out
}

fn wrap_text(text: &str, wrap_column: usize) -> String {
    if text.len() <= wrap_column {
        return text.to_string();
    }
    let mut out = String::new();
    let mut col = 0;
    for (i, ch) in text.chars().enumerate() {
        if col >= wrap_column && (ch == ' ' || (i > 0 && text.as_bytes().get(i - 1) == Some(&b'n'))) {
            out.push_str("\r\n\t+");
            col = 0;
        }
        out.push(ch);
        col += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BmgConfig;

    #[test]
    fn scans_minimal_text_file() {
        let text = "#BMG\n@ENCODING=1\n0x1000 = hello\n";
        let (bmg, diagnostics) = scan_text(text, BmgConfig::default()).unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(bmg.items().len(), 1);
        assert_eq!(bmg.items()[0].mid, 0x1000);
        assert_eq!(bmg.encoding.units_to_string(&bmg.items()[0].text), "hello");
    }

    #[test]
    fn rejects_missing_magic() {
        let text = "not bmg\n0x1 = x\n";
        assert!(matches!(scan_text(text, BmgConfig::default()), Err(BmgError::InvalidMagic)));
    }

    #[test]
    fn scans_track_alias_into_both_classic_ranges() {
        let text = "#BMG\n@BMG-MID\nT1B = Moo Moo Meadows\n";
        let (bmg, _) = scan_text(text, BmgConfig::default()).unwrap();
        assert_eq!(bmg.items().len(), 2);
        let idx = 1 * 16 + 11;
        assert!(bmg.find((MID_TRACK1.beg + idx) << 8).is_some());
        assert!(bmg.find((MID_TRACK2.beg + idx) << 8).is_some());
        for item in bmg.items() {
            assert_eq!(bmg.encoding.units_to_string(&item.text), "Moo Moo Meadows");
        }
    }

    #[test]
    fn scans_track_alias_into_le_code_range_too_under_le_code_mode() {
        let mut config = BmgConfig::default();
        config.ct_mode = CtMode::LeCode;
        let text = "#BMG\n@BMG-MID\nT1B = Moo Moo Meadows\n";
        let (bmg, _) = scan_text(text, config).unwrap();
        assert_eq!(bmg.items().len(), 3);
        let idx = 1 * 16 + 11;
        assert!(bmg.find((MID_TRACK1.beg + idx) << 8).is_some());
        assert!(bmg.find((MID_TRACK2.beg + idx) << 8).is_some());
        assert!(bmg.find((MID_LE_TRACK.beg + idx) << 8).is_some());
    }

    #[test]
    fn write_then_scan_round_trips_simple_message() {
        let text = "#BMG\n@ENCODING=1\n0x00001234 = hi there\n";
        let (bmg, _) = scan_text(text, BmgConfig::default()).unwrap();
        let rendered = write_text(&bmg, &TextOptions::default());
        let (reparsed, _) = scan_text(&rendered, BmgConfig::default()).unwrap();
        assert_eq!(reparsed.items().len(), 1);
        assert_eq!(reparsed.encoding.units_to_string(&reparsed.items()[0].text), "hi there");
    }

    #[test]
    fn explicit_empty_message_round_trips() {
        let text = "#BMG\n0x1 /\n";
        let (bmg, _) = scan_text(text, BmgConfig::default()).unwrap();
        assert!(bmg.items()[0].text.is_empty());
    }
}
