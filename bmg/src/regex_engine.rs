//! The regex engine the patch engine's `REGEX`/`RM-REGEX` commands consume.
//! Exposed as a trait (per spec §1's "consumed through a trait with
//! compile/replace/erase methods") with a default implementation backed by the
//! `regex` crate, the same crate already present in the wider example corpus.

use regex::Regex;

use crate::error::PatchError;

/// One `s/pattern/replacement/flags` step of a `;`-separated pipeline.
#[derive(Debug, Clone)]
pub struct Substitution {
    pub pattern: String,
    pub replacement: String,
    pub global: bool,
    pub case_insensitive: bool,
}

pub trait RegexEngine {
    /// Parses a `;`-separated `s/…/…/flags` pipeline.
    fn parse_pipeline(&self, spec: &str) -> Result<Vec<Substitution>, PatchError>;
    /// Applies one substitution to `text`, returning the rewritten string.
    fn replace(&self, text: &str, sub: &Substitution) -> Result<String, PatchError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRegexEngine;

impl RegexEngine for DefaultRegexEngine {
    fn parse_pipeline(&self, spec: &str) -> Result<Vec<Substitution>, PatchError> {
        spec.split(';').filter(|s| !s.trim().is_empty()).map(parse_substitution).collect()
    }

    fn replace(&self, text: &str, sub: &Substitution) -> Result<String, PatchError> {
        let mut pattern = sub.pattern.clone();
        if sub.case_insensitive {
            pattern = format!("(?i){}", pattern);
        }
        let re = Regex::new(&pattern).map_err(|e| PatchError::Regex(e.to_string()))?;
        let replacement = translate_backrefs(&sub.replacement);
        Ok(if sub.global {
            re.replace_all(text, replacement.as_str()).into_owned()
        } else {
            re.replace(text, replacement.as_str()).into_owned()
        })
    }
}

/// Parses `s/pattern/replacement/flags`, honouring `\/` as an escaped delimiter.
fn parse_substitution(chunk: &str) -> Result<Substitution, PatchError> {
    let chunk = chunk.trim();
    let rest = chunk.strip_prefix('s').ok_or_else(|| PatchError::Regex(format!("expected 's/…' in {chunk:?}")))?;
    let mut chars = rest.chars();
    let delim = chars.next().ok_or_else(|| PatchError::Regex("empty regex command".to_string()))?;
    let body: String = chars.collect();
    let parts = split_unescaped(&body, delim);
    if parts.len() < 3 {
        return Err(PatchError::Regex(format!("malformed substitution {chunk:?}")));
    }
    let flags = parts[2];
    Ok(Substitution {
        pattern: parts[0].replace(&format!("\\{delim}"), &delim.to_string()),
        replacement: parts[1].replace(&format!("\\{delim}"), &delim.to_string()),
        global: flags.contains('g'),
        case_insensitive: flags.contains('i'),
    })
}

fn split_unescaped(body: &str, delim: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut part_start = 0;
    let mut chars = body.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if c == '\\' {
            if let Some(&(_, next)) = chars.peek() {
                if next == delim {
                    chars.next();
                    continue;
                }
            }
        }
        if c == delim {
            parts.push(&body[part_start..idx]);
            part_start = idx + delim.len_utf8();
        }
    }
    parts.push(&body[part_start..]);
    parts
}

fn translate_backrefs(replacement: &str) -> String {
    // `regex`'s replacement syntax already uses `$1`; Wiimm-style patterns use
    // `\1`. Translate the common case.
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&d) = chars.peek() {
                if d.is_ascii_digit() {
                    out.push('$');
                    out.push(d);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_substitution() {
        let engine = DefaultRegexEngine;
        let subs = engine.parse_pipeline("s/foo/bar/g").unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].pattern, "foo");
        assert_eq!(subs[0].replacement, "bar");
        assert!(subs[0].global);
    }

    #[test]
    fn replace_applies_substitution() {
        let engine = DefaultRegexEngine;
        let sub = Substitution { pattern: "o+".to_string(), replacement: "0".to_string(), global: true, case_insensitive: false };
        assert_eq!(engine.replace("foobar", &sub).unwrap(), "f0bar");
    }

    #[test]
    fn pipeline_runs_multiple_steps() {
        let engine = DefaultRegexEngine;
        let subs = engine.parse_pipeline("s/a/b/;s/c/d/").unwrap();
        assert_eq!(subs.len(), 2);
    }
}
