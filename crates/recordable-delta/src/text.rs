#![forbid(unsafe_code)]

//! Character-level text patches.
//!
//! A patch is a list of hunks in unidiff-like text form:
//!
//! ```text
//! @@ -7,5 +7,6 @@
//! -world
//! +there!
//! ```
//!
//! Offsets count Unicode scalar values and are 1-based in the text form.
//! Hunk bodies escape `%` as `%25` and newlines as `%0A` so each body stays
//! on one line.

use std::fmt;
use std::str::FromStr;

/// One replaced span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// Char offset of the span in the original text.
    pub old_start: usize,
    /// Char offset of the replacement in the patched text.
    pub new_start: usize,
    /// Text removed from the original.
    pub removed: String,
    /// Text inserted in its place.
    pub inserted: String,
}

/// An ordered list of non-overlapping hunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPatch {
    hunks: Vec<Hunk>,
}

/// Why a text patch could not be parsed or applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextPatchError {
    /// The text form was not understood.
    Syntax(String),
    /// The original text does not contain the span a hunk removes.
    Mismatch { offset: usize },
}

impl fmt::Display for TextPatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax(msg) => write!(f, "invalid text patch: {msg}"),
            Self::Mismatch { offset } => {
                write!(f, "text patch does not match the original at char {offset}")
            }
        }
    }
}

impl std::error::Error for TextPatchError {}

impl TextPatch {
    /// Build a patch from explicit hunks.
    #[must_use]
    pub fn from_hunks(hunks: Vec<Hunk>) -> Self {
        Self { hunks }
    }

    /// Compute the patch turning `old` into `new`.
    ///
    /// The shared prefix and suffix are trimmed and the remainder becomes a
    /// single hunk. Returns `None` when the texts are equal.
    #[must_use]
    pub fn diff(old: &str, new: &str) -> Option<Self> {
        if old == new {
            return None;
        }
        let old_chars: Vec<char> = old.chars().collect();
        let new_chars: Vec<char> = new.chars().collect();

        let prefix = old_chars
            .iter()
            .zip(&new_chars)
            .take_while(|(a, b)| a == b)
            .count();
        let max_suffix = old_chars.len().min(new_chars.len()) - prefix;
        let suffix = old_chars
            .iter()
            .rev()
            .zip(new_chars.iter().rev())
            .take(max_suffix)
            .take_while(|(a, b)| a == b)
            .count();

        Some(Self {
            hunks: vec![Hunk {
                old_start: prefix,
                new_start: prefix,
                removed: old_chars[prefix..old_chars.len() - suffix].iter().collect(),
                inserted: new_chars[prefix..new_chars.len() - suffix].iter().collect(),
            }],
        })
    }

    /// The hunks, in ascending offset order.
    #[must_use]
    pub fn hunks(&self) -> &[Hunk] {
        &self.hunks
    }

    /// Apply to `text`, verifying every removed span.
    pub fn apply(&self, text: &str) -> Result<String, TextPatchError> {
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for hunk in &self.hunks {
            let removed_len = hunk.removed.chars().count();
            let Some(end) = hunk.old_start.checked_add(removed_len) else {
                return Err(TextPatchError::Mismatch {
                    offset: hunk.old_start,
                });
            };
            if hunk.old_start < cursor || end > chars.len() {
                return Err(TextPatchError::Mismatch {
                    offset: hunk.old_start,
                });
            }
            if !chars[hunk.old_start..end].iter().copied().eq(hunk.removed.chars()) {
                return Err(TextPatchError::Mismatch {
                    offset: hunk.old_start,
                });
            }
            out.extend(&chars[cursor..hunk.old_start]);
            out.push_str(&hunk.inserted);
            cursor = end;
        }
        out.extend(&chars[cursor..]);
        Ok(out)
    }

    /// The patch that undoes this one.
    #[must_use]
    pub fn reverse(&self) -> Self {
        Self {
            hunks: self
                .hunks
                .iter()
                .map(|hunk| Hunk {
                    old_start: hunk.new_start,
                    new_start: hunk.old_start,
                    removed: hunk.inserted.clone(),
                    inserted: hunk.removed.clone(),
                })
                .collect(),
        }
    }
}

fn escape(body: &str) -> String {
    body.replace('%', "%25").replace('\n', "%0A")
}

fn unescape(body: &str) -> Result<String, TextPatchError> {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3);
        match code {
            Some("25") => out.push('%'),
            Some("0A" | "0a") => out.push('\n'),
            _ => return Err(TextPatchError::Syntax(format!("bad escape in {body:?}"))),
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

impl fmt::Display for TextPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for hunk in &self.hunks {
            writeln!(
                f,
                "@@ -{},{} +{},{} @@",
                hunk.old_start.saturating_add(1),
                hunk.removed.chars().count(),
                hunk.new_start.saturating_add(1),
                hunk.inserted.chars().count()
            )?;
            if !hunk.removed.is_empty() {
                writeln!(f, "-{}", escape(&hunk.removed))?;
            }
            if !hunk.inserted.is_empty() {
                writeln!(f, "+{}", escape(&hunk.inserted))?;
            }
        }
        Ok(())
    }
}

fn parse_range(range: &str, sign: char) -> Result<(usize, usize), TextPatchError> {
    let bad = || TextPatchError::Syntax(format!("bad range {range:?}"));
    let range = range.strip_prefix(sign).ok_or_else(bad)?;
    let (start, len) = range.split_once(',').ok_or_else(bad)?;
    let start: usize = start.parse().map_err(|_| bad())?;
    let len: usize = len.parse().map_err(|_| bad())?;
    if start == 0 {
        return Err(bad());
    }
    Ok((start - 1, len))
}

impl FromStr for TextPatch {
    type Err = TextPatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut hunks: Vec<Hunk> = Vec::new();
        let mut expected: Option<(usize, usize)> = None;

        for line in s.split('\n') {
            if let Some(header) = line.strip_prefix("@@ ").and_then(|h| h.strip_suffix(" @@")) {
                let (old, new) = header
                    .split_once(' ')
                    .ok_or_else(|| TextPatchError::Syntax(format!("bad header {line:?}")))?;
                let (old_start, old_len) = parse_range(old, '-')?;
                let (new_start, new_len) = parse_range(new, '+')?;
                hunks.push(Hunk {
                    old_start,
                    new_start,
                    removed: String::new(),
                    inserted: String::new(),
                });
                expected = Some((old_len, new_len));
            } else if let Some(hunk) = hunks.last_mut() {
                if let Some(body) = line.strip_prefix('-') {
                    hunk.removed.push_str(&unescape(body)?);
                } else if let Some(body) = line.strip_prefix('+') {
                    hunk.inserted.push_str(&unescape(body)?);
                } else if !line.is_empty() {
                    return Err(TextPatchError::Syntax(format!("bad line {line:?}")));
                }
            } else if !line.is_empty() {
                return Err(TextPatchError::Syntax("text before first hunk".into()));
            }

            if let (Some(hunk), Some((old_len, new_len))) = (hunks.last(), expected)
                && (hunk.removed.chars().count() > old_len
                    || hunk.inserted.chars().count() > new_len)
            {
                return Err(TextPatchError::Syntax("hunk body longer than header".into()));
            }
        }

        if hunks.is_empty() {
            return Err(TextPatchError::Syntax("no hunks".into()));
        }
        Ok(Self { hunks })
    }
}
