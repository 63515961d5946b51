//! Redaction of secret values from log text.
//!
//! The set only grows. Each value is stored together with its JSON-escaped
//! encodings so secrets are caught both in plain messages and inside
//! serialized protocol payloads.

use std::fmt::Write as _;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use regex::{NoExpand, Regex, RegexBuilder};

/// Placeholder substituted for plain secret values.
pub const REDACTED: &str = "REDACTED";

/// Placeholder substituted for JSON-escaped secret values.
pub const REDACTED_JSON: &str = "\"REDACTED\"";

/// Values longer than this skip the regex and use [`Matcher::Literal`].
const MAX_PATTERN_LEN: usize = 4096;

/// Finds one redacted value in log text, ignoring case.
enum Matcher {
    /// Escaped literal compiled with Unicode case folding.
    Pattern(Regex),
    /// ASCII case-insensitive byte search, for values too large to compile.
    Literal(String),
}

impl Matcher {
    fn new(value: &str) -> Self {
        if value.len() > MAX_PATTERN_LEN {
            return Self::Literal(value.to_string());
        }
        match RegexBuilder::new(&regex::escape(value))
            .case_insensitive(true)
            .build()
        {
            Ok(pattern) => Self::Pattern(pattern),
            Err(e) => {
                tracing::debug!(error = %e, "redaction pattern falls back to literal matching");
                Self::Literal(value.to_string())
            },
        }
    }

    /// `text` with every match replaced, or `None` when nothing matched.
    fn replace_all(&self, text: &str, placeholder: &str) -> Option<String> {
        match self {
            Self::Pattern(pattern) => pattern
                .is_match(text)
                .then(|| pattern.replace_all(text, NoExpand(placeholder)).into_owned()),
            Self::Literal(needle) => replace_ignore_ascii_case(text, needle, placeholder),
        }
    }
}

/// Non-overlapping, ASCII case-insensitive replace.
///
/// A match starts and ends on char boundaries: only ASCII bytes compare
/// loosely, every other byte of the needle must match exactly.
fn replace_ignore_ascii_case(text: &str, needle: &str, placeholder: &str) -> Option<String> {
    let (hay, pat) = (text.as_bytes(), needle.as_bytes());
    if pat.is_empty() {
        return None;
    }

    let mut out = String::new();
    let mut copied = 0;
    let mut at: usize = 0;
    while let Some(window) = hay.get(at..at.saturating_add(pat.len())) {
        if window.eq_ignore_ascii_case(pat) {
            out.push_str(text.get(copied..at).unwrap_or_default());
            out.push_str(placeholder);
            at = at.saturating_add(pat.len());
            copied = at;
        } else {
            at = at.saturating_add(1);
        }
    }

    if copied == 0 {
        return None;
    }
    out.push_str(text.get(copied..).unwrap_or_default());
    Some(out)
}

struct RedactedValue {
    is_json: bool,
    matcher: Matcher,
}

/// Concurrent, monotonically growing set of values to redact.
pub struct RedactionSet {
    enabled: bool,
    values: DashMap<String, RedactedValue>,
}

impl std::fmt::Debug for RedactionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the values themselves.
        f.debug_struct("RedactionSet")
            .field("enabled", &self.enabled)
            .field("len", &self.values.len())
            .finish()
    }
}

impl RedactionSet {
    /// Create an empty set. When `enabled` is false, [`redact`](Self::redact)
    /// returns its input unchanged.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            values: DashMap::new(),
        }
    }

    /// Whether redaction is applied.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of stored patterns, including JSON-escaped forms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing has been added yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether `value` is stored (in exactly this form).
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        self.values.contains_key(value)
    }

    /// Add a secret value and its JSON-escaped forms. Idempotent; blank
    /// values are ignored.
    ///
    /// Every form is inserted on every call, so a caller never returns while
    /// a concurrent caller has stored only part of the forms.
    pub fn add(&self, value: &str) {
        if value.trim().is_empty() {
            return;
        }

        self.insert(value, false);
        if let Ok(json) = serde_json::to_string(value) {
            self.insert(&json, true);
        }
        self.insert(&ascii_json_string(value), true);
    }

    fn insert(&self, value: &str, is_json: bool) {
        if self.values.contains_key(value) {
            return;
        }
        let matcher = Matcher::new(value);
        if let Entry::Vacant(slot) = self.values.entry(value.to_string()) {
            slot.insert(RedactedValue { is_json, matcher });
        }
    }

    /// Replace every stored value in `message` with its placeholder.
    ///
    /// JSON-escaped forms are replaced first so a quoted secret collapses to
    /// a single quoted placeholder.
    #[must_use]
    pub fn redact(&self, message: &str) -> String {
        let mut output = message.to_string();
        if !self.enabled {
            return output;
        }

        for pass_is_json in [true, false] {
            for entry in &self.values {
                let value = entry.value();
                if value.is_json != pass_is_json {
                    continue;
                }
                let placeholder = if value.is_json { REDACTED_JSON } else { REDACTED };
                if let Some(replaced) = value.matcher.replace_all(&output, placeholder) {
                    output = replaced;
                }
            }
        }

        output
    }
}

/// JSON string encoding that escapes everything outside printable ASCII
/// plus HTML-sensitive characters as `\uXXXX`.
///
/// Other serializers on the host side emit this form, so it is redacted in
/// addition to the `serde_json` encoding.
fn ascii_json_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len().saturating_add(2));
    out.push('"');
    for unit in value.encode_utf16() {
        match unit {
            0x08 => out.push_str("\\b"),
            0x09 => out.push_str("\\t"),
            0x0A => out.push_str("\\n"),
            0x0C => out.push_str("\\f"),
            0x0D => out.push_str("\\r"),
            0x5C => out.push_str("\\\\"),
            0x22 | 0x26 | 0x27 | 0x2B | 0x3C | 0x3E | 0x60 => {
                let _ = write!(out, "\\u{unit:04X}");
            },
            0x20..=0x7E => {
                // Printable ASCII maps 1:1 onto a char.
                out.push(char::from(u8::try_from(unit).unwrap_or(b'?')));
            },
            _ => {
                let _ = write!(out, "\\u{unit:04X}");
            },
        }
    }
    out.push('"');
    out
}
