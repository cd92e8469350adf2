//! Structural checks on a LogPipeline spec

use std::collections::HashSet;

use telemetry_common::crd::{LogPipelineSpec, ValueType};
use telemetry_fluentbit::custom::{parse_custom_filter, parse_custom_output};
use telemetry_fluentbit::CustomSectionError;
use thiserror::Error;

/// A spec rule violation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpecError {
    /// Neither or both output variants are set
    #[error("exactly one output plugin must be defined")]
    OutputCount,

    /// A custom filter is rejected by the parser
    #[error("invalid custom filter #{index}: {source}")]
    CustomFilter {
        /// 0-based position in `filters`
        index: usize,
        /// Parser error
        #[source]
        source: CustomSectionError,
    },

    /// The custom output is rejected by the parser
    #[error("invalid custom output: {source}")]
    CustomOutput {
        /// Parser error
        #[source]
        source: CustomSectionError,
    },

    /// HTTP output URI without a leading slash
    #[error("HTTP output URI must start with '/': {0}")]
    InvalidUri(String),

    /// HTTP output port is not a number
    #[error("HTTP output port must be numeric: {0}")]
    InvalidPort(String),

    /// A value sets both `value` and `valueFrom`
    #[error("{0} must set either value or valueFrom, not both")]
    AmbiguousValue(&'static str),

    /// More than one namespace selector is set
    #[error("only one of namespaces include, exclude or system can be defined")]
    NamespaceSelectors,

    /// Both container selectors are set
    #[error("only one of containers include or exclude can be defined")]
    ContainerSelectors,

    /// Two files share a name
    #[error("duplicate file name: {0}")]
    DuplicateFile(String),

    /// Custom outputs are switched off for this operator
    #[error("custom output plugins are not allowed")]
    CustomOutputNotAllowed,
}

fn check_value(field: &'static str, value: &ValueType) -> Result<(), SpecError> {
    if !value.value.is_empty() && value.value_from.is_some() {
        return Err(SpecError::AmbiguousValue(field));
    }
    Ok(())
}

/// Reject output kinds the operator is configured to refuse
pub fn check_output_allowed(
    spec: &LogPipelineSpec,
    allow_custom_outputs: bool,
) -> Result<(), SpecError> {
    if spec.output.custom.is_some() && !allow_custom_outputs {
        return Err(SpecError::CustomOutputNotAllowed);
    }
    Ok(())
}

/// Check every structural rule, stopping at the first violation
pub fn validate_spec(spec: &LogPipelineSpec) -> Result<(), SpecError> {
    if spec.output.defined_count() != 1 {
        return Err(SpecError::OutputCount);
    }

    for (index, filter) in spec.filters.iter().enumerate() {
        parse_custom_filter(&filter.custom)
            .map_err(|source| SpecError::CustomFilter { index, source })?;
    }

    if let Some(custom) = spec.output.custom.as_deref() {
        parse_custom_output(custom).map_err(|source| SpecError::CustomOutput { source })?;
    }

    if let Some(http) = &spec.output.http {
        if !http.uri.is_empty() && !http.uri.starts_with('/') {
            return Err(SpecError::InvalidUri(http.uri.clone()));
        }
        if !http.port.is_empty() && http.port.parse::<u16>().is_err() {
            return Err(SpecError::InvalidPort(http.port.clone()));
        }
        check_value("host", &http.host)?;
        check_value("user", &http.user)?;
        check_value("password", &http.password)?;
        for (field, value) in [
            ("tls.ca", &http.tls.ca),
            ("tls.cert", &http.tls.cert),
            ("tls.key", &http.tls.key),
        ] {
            if let Some(value) = value {
                check_value(field, value)?;
            }
        }
    }

    if let Some(app) = &spec.input.application {
        let ns = &app.namespaces;
        let selectors = usize::from(!ns.include.is_empty())
            + usize::from(!ns.exclude.is_empty())
            + usize::from(ns.system);
        if selectors > 1 {
            return Err(SpecError::NamespaceSelectors);
        }
        if !app.containers.include.is_empty() && !app.containers.exclude.is_empty() {
            return Err(SpecError::ContainerSelectors);
        }
    }

    let mut seen = HashSet::new();
    for file in &spec.files {
        if !seen.insert(file.name.as_str()) {
            return Err(SpecError::DuplicateFile(file.name.clone()));
        }
    }

    Ok(())
}
