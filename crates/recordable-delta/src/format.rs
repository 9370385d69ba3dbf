#![forbid(unsafe_code)]

//! Human-readable delta rendering.
//!
//! A single walker visits the delta alongside the original value and feeds
//! a [`Render`] implementation, one per [`ChangelogFormat`]. The original is
//! only used to check that the delta fits it and to show moved items and
//! patched text; unchanged entries are not printed.

use std::fmt::Write as _;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::delta::{ArrayRemoval, Delta};
use crate::patch::PatchError;
use crate::text::TextPatch;

/// Output style for [`format_delta`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangelogFormat {
    /// Indented tree with ANSI colours.
    #[default]
    Console,
    /// JSON-like lines with `//` annotations.
    Annotated,
    /// An HTML fragment.
    Html,
}

impl FromStr for ChangelogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "console" => Ok(Self::Console),
            "annotated" => Ok(Self::Annotated),
            "html" => Ok(Self::Html),
            other => Err(format!("unknown changelog format: {other}")),
        }
    }
}

/// Render `delta`, taken against `original`, in the requested style.
pub fn format_delta(
    original: &Value,
    delta: &Delta,
    format: ChangelogFormat,
) -> Result<String, PatchError> {
    match format {
        ChangelogFormat::Console => render(original, delta, Console::default()),
        ChangelogFormat::Annotated => render(original, delta, Annotated::default()),
        ChangelogFormat::Html => render(original, delta, Html::default()),
    }
}

fn render<R: Render>(original: &Value, delta: &Delta, mut out: R) -> Result<String, PatchError> {
    walk(Some(original), delta, Key::Root, "", 0, &mut out)?;
    Ok(out.finish())
}

#[derive(Debug, Clone, Copy)]
enum Key<'a> {
    Root,
    Property(&'a str),
    Index(usize),
    OldIndex(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

trait Render {
    fn open(&mut self, key: Key<'_>, container: Container, depth: usize);
    fn close(&mut self, key: Key<'_>, container: Container, depth: usize);
    fn added(&mut self, key: Key<'_>, value: &Value, depth: usize);
    fn deleted(&mut self, key: Key<'_>, value: &Value, depth: usize);
    fn modified(&mut self, key: Key<'_>, old: &Value, new: &Value, depth: usize);
    fn moved(&mut self, key: Key<'_>, to: usize, value: &Value, depth: usize);
    fn text(&mut self, key: Key<'_>, patch: &TextPatch, patched: &str, depth: usize);
    fn finish(self) -> String;
}

fn walk(
    original: Option<&Value>,
    delta: &Delta,
    key: Key<'_>,
    path: &str,
    depth: usize,
    out: &mut impl Render,
) -> Result<(), PatchError> {
    let mismatch = |expected| PatchError::TypeMismatch {
        path: path.to_string(),
        expected,
    };
    match delta {
        Delta::Added(value) => out.added(key, value, depth),
        Delta::Deleted(value) => out.deleted(key, value, depth),
        Delta::Modified { old, new } => out.modified(key, old, new, depth),
        Delta::Text(patch) => {
            let Some(Value::String(current)) = original else {
                return Err(mismatch("string"));
            };
            let patched = patch.apply(current).map_err(|source| PatchError::Text {
                path: path.to_string(),
                source,
            })?;
            out.text(key, patch, &patched, depth);
        }
        Delta::Object(entries) => {
            let Some(Value::Object(map)) = original else {
                return Err(mismatch("object"));
            };
            out.open(key, Container::Object, depth);
            for (name, child) in entries {
                let child_path = format!("{path}/{}", crate::delta::escape_pointer(name));
                walk(
                    map.get(name),
                    child,
                    Key::Property(name),
                    &child_path,
                    depth + 1,
                    out,
                )?;
            }
            out.close(key, Container::Object, depth);
        }
        Delta::Array(array) => {
            let Some(Value::Array(items)) = original else {
                return Err(mismatch("array"));
            };
            out.open(key, Container::Array, depth);
            for (&from, removal) in &array.before {
                match removal {
                    ArrayRemoval::Deleted(value) => out.deleted(Key::OldIndex(from), value, depth + 1),
                    ArrayRemoval::Moved { to, value } => {
                        let shown = value.as_ref().or_else(|| items.get(from)).ok_or(
                            PatchError::IndexOutOfRange {
                                path: path.to_string(),
                                index: from,
                                len: items.len(),
                            },
                        )?;
                        out.moved(Key::OldIndex(from), *to, shown, depth + 1);
                    }
                }
            }
            for (&index, child) in &array.after {
                let child_original = array.original_index(index).and_then(|i| items.get(i));
                walk(
                    child_original,
                    child,
                    Key::Index(index),
                    &format!("{path}/{index}"),
                    depth + 1,
                    out,
                )?;
            }
            out.close(key, Container::Array, depth);
        }
    }
    Ok(())
}

fn compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn quoted(text: &str) -> String {
    compact(&Value::String(text.to_string()))
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const GRAY: &str = "\x1b[90m";
const RESET: &str = "\x1b[0m";

#[derive(Default)]
struct Console {
    buf: String,
}

impl Console {
    fn label(key: Key<'_>) -> String {
        match key {
            Key::Root => String::new(),
            Key::Property(name) => format!("{name}: "),
            Key::Index(index) => format!("{index}: "),
            Key::OldIndex(index) => format!("_{index}: "),
        }
    }

    fn line(&mut self, depth: usize, body: &str) {
        let _ = writeln!(self.buf, "{}{body}", "  ".repeat(depth));
    }
}

impl Render for Console {
    fn open(&mut self, key: Key<'_>, container: Container, depth: usize) {
        let bracket = if container == Container::Object { "{" } else { "[" };
        self.line(depth, &format!("{}{bracket}", Self::label(key)));
    }

    fn close(&mut self, _key: Key<'_>, container: Container, depth: usize) {
        self.line(depth, if container == Container::Object { "}" } else { "]" });
    }

    fn added(&mut self, key: Key<'_>, value: &Value, depth: usize) {
        let body = format!("{GREEN}+ {}{}{RESET}", Self::label(key), compact(value));
        self.line(depth, &body);
    }

    fn deleted(&mut self, key: Key<'_>, value: &Value, depth: usize) {
        let body = format!("{RED}- {}{}{RESET}", Self::label(key), compact(value));
        self.line(depth, &body);
    }

    fn modified(&mut self, key: Key<'_>, old: &Value, new: &Value, depth: usize) {
        let body = format!(
            "  {}{RED}{}{RESET} => {GREEN}{}{RESET}",
            Self::label(key),
            compact(old),
            compact(new)
        );
        self.line(depth, &body);
    }

    fn moved(&mut self, key: Key<'_>, to: usize, value: &Value, depth: usize) {
        let body = format!("{GRAY}~ {}{} => {to}{RESET}", Self::label(key), compact(value));
        self.line(depth, &body);
    }

    fn text(&mut self, key: Key<'_>, patch: &TextPatch, _patched: &str, depth: usize) {
        let mut body = format!("  {}", Self::label(key));
        for hunk in patch.hunks() {
            let _ = write!(body, "{GRAY}@{}{RESET} ", hunk.old_start);
            if !hunk.removed.is_empty() {
                let _ = write!(body, "{RED}{}{RESET} ", quoted(&hunk.removed));
            }
            if !hunk.inserted.is_empty() {
                let _ = write!(body, "{GREEN}{}{RESET} ", quoted(&hunk.inserted));
            }
        }
        self.line(depth, body.trim_end());
    }

    fn finish(self) -> String {
        self.buf
    }
}

// ---------------------------------------------------------------------------
// Annotated
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Annotated {
    buf: String,
}

impl Annotated {
    fn prefix(key: Key<'_>) -> String {
        match key {
            Key::Property(name) => format!("{}: ", quoted(name)),
            _ => String::new(),
        }
    }

    fn line(&mut self, depth: usize, body: &str, note: Option<String>) {
        let indent = "  ".repeat(depth);
        let _ = match note {
            Some(note) => writeln!(self.buf, "{indent}{body}  // {note}"),
            None => writeln!(self.buf, "{indent}{body}"),
        };
    }
}

impl Render for Annotated {
    fn open(&mut self, key: Key<'_>, container: Container, depth: usize) {
        let bracket = if container == Container::Object { "{" } else { "[" };
        let note = match key {
            Key::Index(index) => Some(format!("changes at index {index}")),
            _ => None,
        };
        self.line(depth, &format!("{}{bracket}", Self::prefix(key)), note);
    }

    fn close(&mut self, _key: Key<'_>, container: Container, depth: usize) {
        self.line(depth, if container == Container::Object { "}" } else { "]" }, None);
    }

    fn added(&mut self, key: Key<'_>, value: &Value, depth: usize) {
        let note = match key {
            Key::Property(name) => format!("add property {}", quoted(name)),
            Key::Index(index) | Key::OldIndex(index) => format!("insert at index {index}"),
            Key::Root => "add value".to_string(),
        };
        self.line(depth, &format!("{}{}", Self::prefix(key), compact(value)), Some(note));
    }

    fn deleted(&mut self, key: Key<'_>, value: &Value, depth: usize) {
        let note = match key {
            Key::Property(name) => format!("remove property {}", quoted(name)),
            Key::Index(index) | Key::OldIndex(index) => format!("remove index {index}"),
            Key::Root => "remove value".to_string(),
        };
        self.line(depth, &format!("{}{}", Self::prefix(key), compact(value)), Some(note));
    }

    fn modified(&mut self, key: Key<'_>, old: &Value, new: &Value, depth: usize) {
        let target = match key {
            Key::Property(name) => quoted(name),
            Key::Index(index) | Key::OldIndex(index) => format!("index {index}"),
            Key::Root => "value".to_string(),
        };
        let note = format!("modify {target}, was {}", compact(old));
        self.line(depth, &format!("{}{}", Self::prefix(key), compact(new)), Some(note));
    }

    fn moved(&mut self, key: Key<'_>, to: usize, value: &Value, depth: usize) {
        let from = match key {
            Key::OldIndex(index) | Key::Index(index) => index.to_string(),
            _ => "?".to_string(),
        };
        let note = format!("move from index {from} to index {to}");
        self.line(depth, &compact(value), Some(note));
    }

    fn text(&mut self, key: Key<'_>, patch: &TextPatch, patched: &str, depth: usize) {
        let headers: Vec<String> = patch
            .to_string()
            .lines()
            .filter(|line| line.starts_with("@@"))
            .map(str::to_string)
            .collect();
        let note = format!("text diff {}", headers.join(" "));
        self.line(depth, &format!("{}{}", Self::prefix(key), quoted(patched)), Some(note));
    }

    fn finish(self) -> String {
        self.buf
    }
}

// ---------------------------------------------------------------------------
// Html
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Html {
    buf: String,
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

impl Html {
    fn key_span(key: Key<'_>) -> String {
        let label = match key {
            Key::Root => return String::new(),
            Key::Property(name) => escape_html(name),
            Key::Index(index) => index.to_string(),
            Key::OldIndex(index) => format!("_{index}"),
        };
        format!(r#"<span class="recordable-key">{label}</span>"#)
    }

    fn value_pre(class: &str, value: &Value) -> String {
        format!(r#"<pre class="{class}">{}</pre>"#, escape_html(&compact(value)))
    }

    fn item(&mut self, key: Key<'_>, class: &str, body: &str) {
        let li = format!(r#"<li class="{class}">{}{body}</li>"#, Self::key_span(key));
        if matches!(key, Key::Root) {
            let _ = writeln!(self.buf, r#"<ul class="recordable-root">{li}</ul>"#);
        } else {
            let _ = writeln!(self.buf, "{li}");
        }
    }
}

impl Render for Html {
    fn open(&mut self, key: Key<'_>, container: Container, _depth: usize) {
        let class = match container {
            Container::Object => "recordable-object",
            Container::Array => "recordable-array",
        };
        if !matches!(key, Key::Root) {
            let _ = write!(
                self.buf,
                r#"<li class="recordable-node">{}"#,
                Self::key_span(key)
            );
        }
        let _ = writeln!(self.buf, r#"<ul class="{class}">"#);
    }

    fn close(&mut self, key: Key<'_>, _container: Container, _depth: usize) {
        if matches!(key, Key::Root) {
            let _ = writeln!(self.buf, "</ul>");
        } else {
            let _ = writeln!(self.buf, "</ul></li>");
        }
    }

    fn added(&mut self, key: Key<'_>, value: &Value, _depth: usize) {
        let body = Self::value_pre("recordable-value", value);
        self.item(key, "recordable-added", &body);
    }

    fn deleted(&mut self, key: Key<'_>, value: &Value, _depth: usize) {
        let body = Self::value_pre("recordable-value", value);
        self.item(key, "recordable-deleted", &body);
    }

    fn modified(&mut self, key: Key<'_>, old: &Value, new: &Value, _depth: usize) {
        let body = format!(
            "{}{}",
            Self::value_pre("recordable-left", old),
            Self::value_pre("recordable-right", new)
        );
        self.item(key, "recordable-modified", &body);
    }

    fn moved(&mut self, key: Key<'_>, to: usize, value: &Value, _depth: usize) {
        let body = format!(
            r#"{}<span class="recordable-move-target">{to}</span>"#,
            Self::value_pre("recordable-value", value)
        );
        self.item(key, "recordable-moved", &body);
    }

    fn text(&mut self, key: Key<'_>, patch: &TextPatch, _patched: &str, _depth: usize) {
        let mut body = String::from(r#"<pre class="recordable-text-diff">"#);
        for hunk in patch.hunks() {
            let _ = write!(
                body,
                r#"<span class="recordable-hunk">@{}</span>"#,
                hunk.old_start
            );
            if !hunk.removed.is_empty() {
                let _ = write!(body, "<del>{}</del>", escape_html(&hunk.removed));
            }
            if !hunk.inserted.is_empty() {
                let _ = write!(body, "<ins>{}</ins>", escape_html(&hunk.inserted));
            }
        }
        body.push_str("</pre>");
        self.item(key, "recordable-text", &body);
    }

    fn finish(self) -> String {
        format!("<div class=\"recordable-delta\">\n{}</div>", self.buf)
    }
}
