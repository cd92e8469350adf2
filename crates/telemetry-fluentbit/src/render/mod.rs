//! Per-pipeline section chain
//!
//! The chain order matters to Fluent Bit and is fixed:
//!
//! 1. tail input
//! 2. user multiline filters
//! 3. record modifier (`cluster_identifier`)
//! 4. kubernetes metadata
//! 5. `@timestamp` copy (HTTP only)
//! 6. remaining user filters, in declaration order
//! 7. Lua app-name enrichment (HTTP only)
//! 8. output

mod filter;
mod input;
mod output;

use telemetry_common::crd::{LogPipelineSpec, OutputKind, ValueSource, ValueType};
use thiserror::Error;

use crate::custom::{parse_custom_filter, parse_custom_output, CustomParams, CustomSectionError};
use crate::env::{placeholder, secret_ref_env_var};

/// Cluster identifier used when none is configured; resolved by Fluent Bit
pub const DEFAULT_CLUSTER_NAME: &str = "${KUBERNETES_SERVICE_HOST}";

/// Filesystem buffer limit per output when none is configured
pub const DEFAULT_FS_BUFFER_LIMIT: &str = "1G";

/// Global defaults applied to every rendered pipeline
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderConfig {
    /// Value of the `cluster_identifier` record
    pub cluster_name: String,
    /// Collect the agent's own logs
    pub collect_agent_logs: bool,
    /// `storage.total_limit_size` of every output
    pub fs_buffer_limit: String,
    /// Allow raw custom outputs
    pub allow_custom_outputs: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            collect_agent_logs: false,
            fs_buffer_limit: DEFAULT_FS_BUFFER_LIMIT.to_string(),
            allow_custom_outputs: true,
        }
    }
}

/// Errors from rendering a pipeline
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    /// Neither or both output variants are set
    #[error("pipeline {pipeline}: exactly one output plugin must be defined")]
    MissingOutput {
        /// Pipeline name
        pipeline: String,
    },

    /// A custom filter failed to parse
    #[error("pipeline {pipeline}: invalid custom filter #{index}: {source}")]
    InvalidCustomFilter {
        /// Pipeline name
        pipeline: String,
        /// 0-based position in `spec.filters`
        index: usize,
        /// Parser error
        #[source]
        source: CustomSectionError,
    },

    /// The custom output failed to parse
    #[error("pipeline {pipeline}: invalid custom output: {source}")]
    InvalidCustomOutput {
        /// Pipeline name
        pipeline: String,
        /// Parser error
        #[source]
        source: CustomSectionError,
    },

    /// The output kind is disabled for this operator
    #[error("pipeline {pipeline}: {kind} outputs are not allowed")]
    OutputNotAllowed {
        /// Pipeline name
        pipeline: String,
        /// Output kind
        kind: &'static str,
    },
}

/// Render value for a Fluent Bit parameter: literal text, or a `${ENV}`
/// placeholder the secret projector fills.
pub fn resolve_value(value: &ValueType, pipeline: &str) -> String {
    match value.source() {
        ValueSource::Literal(v) => v.to_string(),
        ValueSource::Secret(r) => placeholder(&secret_ref_env_var(pipeline, r)),
        ValueSource::Undefined => String::new(),
    }
}

fn is_multiline(params: &CustomParams) -> bool {
    params.plugin_name().eq_ignore_ascii_case("multiline")
}

/// Render every section of one pipeline.
///
/// Nothing is returned on error; a pipeline either renders completely or
/// not at all.
pub fn render_pipeline(
    pipeline: &str,
    spec: &LogPipelineSpec,
    config: &RenderConfig,
) -> Result<String, RenderError> {
    let output = spec.output.kind().ok_or_else(|| RenderError::MissingOutput {
        pipeline: pipeline.to_string(),
    })?;

    let filters = spec
        .filters
        .iter()
        .enumerate()
        .map(|(index, f)| {
            parse_custom_filter(&f.custom).map_err(|source| RenderError::InvalidCustomFilter {
                pipeline: pipeline.to_string(),
                index,
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let (multiline, other): (Vec<_>, Vec<_>) = filters.into_iter().partition(is_multiline);

    let match_tag = format!("{}.*", pipeline);
    let app = spec.application_input();

    let output_section = match output {
        OutputKind::Http(http) => output::http(pipeline, &match_tag, http, &config.fs_buffer_limit),
        OutputKind::Custom(_) if !config.allow_custom_outputs => {
            return Err(RenderError::OutputNotAllowed {
                pipeline: pipeline.to_string(),
                kind: "custom",
            })
        }
        OutputKind::Custom(text) => {
            let params =
                parse_custom_output(text).map_err(|source| RenderError::InvalidCustomOutput {
                    pipeline: pipeline.to_string(),
                    source,
                })?;
            output::custom(pipeline, &match_tag, &params, &config.fs_buffer_limit)
        }
    };

    let mut out = input::tail_input(pipeline, &app, config.collect_agent_logs);
    for params in &multiline {
        out.push_str(&filter::custom(&match_tag, params));
    }
    out.push_str(&filter::record_modifier(&match_tag, &config.cluster_name));
    out.push_str(&filter::kubernetes(pipeline, &match_tag, &app));
    if let OutputKind::Http(_) = output {
        out.push_str(&filter::timestamp_modify(&match_tag));
    }
    for params in &other {
        out.push_str(&filter::custom(&match_tag, params));
    }
    if let OutputKind::Http(http) = output {
        out.push_str(&filter::lua_enrich(&match_tag, http.dedot));
    }
    out.push_str(&output_section);
    Ok(out)
}
