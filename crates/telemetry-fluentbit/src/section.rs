//! Writer for a single Fluent Bit section
//!
//! Output is byte-stable: keys are sorted ascending (stable, so repeated keys
//! keep their insertion order), values are aligned one column past the
//! longest key and the section ends with a blank line.

use std::fmt::Write;

/// Kind of a Fluent Bit section
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionKind {
    /// `[INPUT]`
    Input,
    /// `[FILTER]`
    Filter,
    /// `[OUTPUT]`
    Output,
}

impl SectionKind {
    /// Header line without the trailing newline
    pub fn header(self) -> &'static str {
        match self {
            Self::Input => "[INPUT]",
            Self::Filter => "[FILTER]",
            Self::Output => "[OUTPUT]",
        }
    }
}

/// Builder for one section
#[derive(Clone, Debug)]
pub struct SectionBuilder {
    kind: SectionKind,
    params: Vec<(String, String)>,
}

impl SectionBuilder {
    /// Start an empty section of the given kind
    pub fn new(kind: SectionKind) -> Self {
        Self {
            kind,
            params: Vec::new(),
        }
    }

    /// Start an `[INPUT]` section
    pub fn input() -> Self {
        Self::new(SectionKind::Input)
    }

    /// Start a `[FILTER]` section
    pub fn filter() -> Self {
        Self::new(SectionKind::Filter)
    }

    /// Start an `[OUTPUT]` section
    pub fn output() -> Self {
        Self::new(SectionKind::Output)
    }

    /// Add a parameter
    pub fn add(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Add a parameter unless the value is empty
    pub fn add_if_not_empty(self, key: impl Into<String>, value: &str) -> Self {
        if value.is_empty() {
            return self;
        }
        self.add(key, value)
    }

    /// Add a parameter, substituting `default` for an empty value
    pub fn add_if_not_empty_or_default(
        self,
        key: impl Into<String>,
        value: &str,
        default: &str,
    ) -> Self {
        let value = if value.is_empty() { default } else { value };
        self.add(key, value)
    }

    /// Add every pair in order
    pub fn extend<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Render the section text
    pub fn build(mut self) -> String {
        self.params.sort_by(|a, b| a.0.cmp(&b.0));
        let width = self.params.iter().map(|(k, _)| k.len()).max().unwrap_or(0);

        let mut out = String::new();
        out.push_str(self.kind.header());
        out.push('\n');
        for (key, value) in &self.params {
            // writing into a String cannot fail
            let _ = writeln!(out, "    {:<width$} {}", key, value, width = width);
        }
        out.push('\n');
        out
    }
}
