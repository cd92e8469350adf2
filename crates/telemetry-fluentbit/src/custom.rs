//! Parser for user-provided Fluent Bit sections
//!
//! Custom filters and outputs are written as one `key value` pair per line.
//! Parameter order is kept because some plugins (multiline, grep) evaluate
//! repeated keys in the order given.

use thiserror::Error;

/// Filter plugins that would break the synthesized chain
pub const FORBIDDEN_FILTER_PLUGINS: &[&str] = &["kubernetes", "rewrite_tag"];

/// Errors from parsing a custom section
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CustomSectionError {
    /// A line has a key without a value
    #[error("could not parse line {line}: '{content}' is not a 'key value' pair")]
    MalformedLine {
        /// 1-based line number inside the block
        line: usize,
        /// Offending line, trimmed
        content: String,
    },

    /// The block does not name a plugin
    #[error("configuration section must have name attribute")]
    MissingName,

    /// The block sets a key the renderer owns
    #[error("plugin '{plugin}' contains forbidden configuration key '{key}'")]
    ForbiddenKey {
        /// Plugin name from the block
        plugin: String,
        /// The forbidden key
        key: String,
    },

    /// The filter plugin is not allowed
    #[error("filter plugin '{plugin}' is forbidden")]
    ForbiddenPlugin {
        /// Plugin name from the block
        plugin: String,
    },
}

/// One parameter of a custom section
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param {
    /// Lowercased key
    pub key: String,
    /// Value, trimmed
    pub value: String,
}

/// Ordered parameter list of a custom section
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CustomParams(Vec<Param>);

impl CustomParams {
    /// True when any parameter uses `key` (case-insensitive)
    pub fn contains_key(&self, key: &str) -> bool {
        self.get_by_key(key).is_some()
    }

    /// First parameter with `key` (case-insensitive)
    pub fn get_by_key(&self, key: &str) -> Option<&Param> {
        self.0.iter().find(|p| p.key.eq_ignore_ascii_case(key))
    }

    /// Plugin name, empty if unset
    pub fn plugin_name(&self) -> &str {
        self.get_by_key("name").map(|p| p.value.as_str()).unwrap_or("")
    }

    /// Parameters in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.0.iter()
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no parameters were given
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `(key, value)` pairs, ready for a section builder
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|p| (p.key.as_str(), p.value.as_str()))
    }
}

/// Split a block into parameters without any semantic checks.
///
/// Blank lines and `[SECTION]` headers are skipped so rendered sections can
/// be read back.
pub fn parse_params(text: &str) -> Result<CustomParams, CustomSectionError> {
    let mut params = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || (line.starts_with('[') && line.ends_with(']')) {
            continue;
        }

        let malformed = || CustomSectionError::MalformedLine {
            line: idx + 1,
            content: line.to_string(),
        };
        let (key, value) = line.split_once(char::is_whitespace).ok_or_else(malformed)?;
        let value = value.trim();
        if value.is_empty() {
            return Err(malformed());
        }

        params.push(Param {
            key: key.to_lowercase(),
            value: value.to_string(),
        });
    }
    Ok(CustomParams(params))
}

/// Parse a custom block: `name` is required and `match` is forbidden
pub fn parse_custom_section(text: &str) -> Result<CustomParams, CustomSectionError> {
    let params = parse_params(text)?;
    if !params.contains_key("name") {
        return Err(CustomSectionError::MissingName);
    }
    reject_key(&params, "match")?;
    Ok(params)
}

/// Parse a custom filter; also rejects plugins on the deny-list
pub fn parse_custom_filter(text: &str) -> Result<CustomParams, CustomSectionError> {
    let params = parse_custom_section(text)?;
    let plugin = params.plugin_name();
    if FORBIDDEN_FILTER_PLUGINS
        .iter()
        .any(|f| f.eq_ignore_ascii_case(plugin))
    {
        return Err(CustomSectionError::ForbiddenPlugin {
            plugin: plugin.to_string(),
        });
    }
    Ok(params)
}

/// Parse a custom output; also rejects `storage.total_limit_size`
pub fn parse_custom_output(text: &str) -> Result<CustomParams, CustomSectionError> {
    let params = parse_custom_section(text)?;
    reject_key(&params, "storage.total_limit_size")?;
    Ok(params)
}

fn reject_key(params: &CustomParams, key: &str) -> Result<(), CustomSectionError> {
    if params.contains_key(key) {
        return Err(CustomSectionError::ForbiddenKey {
            plugin: params.plugin_name().to_string(),
            key: key.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Lexical parsing
    // =========================================================================

    #[test]
    fn parses_indented_block_in_order() {
        let params = parse_params(
            r#"
            name    grep
            Regex   log error
            regex	log warn
            "#,
        )
        .unwrap();

        let pairs: Vec<_> = params.pairs().collect();
        assert_eq!(
            pairs,
            vec![
                ("name", "grep"),
                ("regex", "log error"),
                ("regex", "log warn")
            ]
        );
    }

    #[test]
    fn key_without_value_is_rejected_with_line_number() {
        let err = parse_params("name stdout\nformat").unwrap_err();
        assert_eq!(
            err,
            CustomSectionError::MalformedLine {
                line: 2,
                content: "format".to_string()
            }
        );
    }

    #[test]
    fn section_headers_are_skipped() {
        let params = parse_params("[OUTPUT]\n    name  stdout\n    match foo.*\n\n").unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params.get_by_key("MATCH").unwrap().value, "foo.*");
    }

    // =========================================================================
    // Semantic checks
    // =========================================================================

    #[test]
    fn name_is_required() {
        assert_eq!(
            parse_custom_section("regex log x").unwrap_err(),
            CustomSectionError::MissingName
        );
    }

    #[test]
    fn match_is_forbidden_everywhere() {
        let err = parse_custom_filter("name grep\nmatch *").unwrap_err();
        assert!(matches!(err, CustomSectionError::ForbiddenKey { ref key, .. } if key == "match"));

        let err = parse_custom_output("name stdout\nMatch *").unwrap_err();
        assert!(err.to_string().contains("stdout"));
    }

    #[test]
    fn storage_limit_is_forbidden_in_outputs_only() {
        assert!(parse_custom_output("name stdout\nstorage.total_limit_size 1G").is_err());
        assert!(parse_custom_filter("name grep\nstorage.total_limit_size 1G").is_ok());
    }

    #[test]
    fn deny_listed_filters_are_rejected() {
        for plugin in ["kubernetes", "Rewrite_Tag"] {
            let err = parse_custom_filter(&format!("name {plugin}")).unwrap_err();
            assert!(matches!(err, CustomSectionError::ForbiddenPlugin { .. }));
        }
        assert!(parse_custom_output("name kubernetes").is_ok());
    }

    #[test]
    fn empty_block_has_no_name() {
        assert!(parse_params("   \n  ").unwrap().is_empty());
        assert!(parse_custom_section("").is_err());
    }
}
