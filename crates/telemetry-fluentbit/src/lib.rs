//! Fluent Bit configuration synthesis
//!
//! Everything in this crate is pure and synchronous: it turns a
//! [`LogPipelineSpec`](telemetry_common::crd::LogPipelineSpec) plus global
//! defaults into the text Fluent Bit reads from `dynamic/<pipeline>.conf`.
//!
//! - [`section`]: writer for one `[INPUT]`/`[FILTER]`/`[OUTPUT]` block
//! - [`custom`]: parser for user-provided raw sections
//! - [`paths`]: tail include/exclude globs
//! - [`env`]: env-var names for secret placeholders
//! - [`render`]: the full per-pipeline section chain

#![deny(missing_docs)]

pub mod custom;
pub mod env;
pub mod paths;
pub mod render;
pub mod section;

pub use custom::{CustomParams, CustomSectionError, Param};
pub use env::env_var_name;
pub use render::{
    render_pipeline, RenderConfig, RenderError, DEFAULT_CLUSTER_NAME, DEFAULT_FS_BUFFER_LIMIT,
};
pub use section::{SectionBuilder, SectionKind};

/// Directory holding TLS material for outputs inside the agent container
pub const OUTPUT_TLS_CONFIG_DIR: &str = "/fluent-bit/etc/output-tls-config";

/// Lua script mounted into the agent container
pub const LUA_SCRIPT_PATH: &str = "/fluent-bit/scripts/filter-script.lua";

/// Retry limit of every output; covers roughly 72 hours of backoff
pub const RETRY_LIMIT: &str = "300";

/// File name of a pipeline's TLS CA inside [`OUTPUT_TLS_CONFIG_DIR`]
pub fn tls_ca_file_name(pipeline: &str) -> String {
    format!("{}-ca.crt", pipeline)
}

/// File name of a pipeline's TLS client certificate
pub fn tls_cert_file_name(pipeline: &str) -> String {
    format!("{}-cert.crt", pipeline)
}

/// File name of a pipeline's TLS client key
pub fn tls_key_file_name(pipeline: &str) -> String {
    format!("{}-key.key", pipeline)
}

/// Key of a pipeline's rendered sections in the sections ConfigMap
pub fn sections_key(pipeline: &str) -> String {
    format!("{}.conf", pipeline)
}
