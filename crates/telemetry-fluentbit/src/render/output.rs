//! `[OUTPUT]` sections

use telemetry_common::crd::LogPipelineHttpOutput;

use super::resolve_value;
use crate::custom::CustomParams;
use crate::section::SectionBuilder;
use crate::{
    tls_ca_file_name, tls_cert_file_name, tls_key_file_name, OUTPUT_TLS_CONFIG_DIR, RETRY_LIMIT,
};

fn tls_path(file_name: String) -> String {
    format!("{}/{}", OUTPUT_TLS_CONFIG_DIR, file_name)
}

pub(crate) fn http(
    pipeline: &str,
    match_tag: &str,
    out: &LogPipelineHttpOutput,
    fs_buffer_limit: &str,
) -> String {
    let tls = &out.tls;
    let mut section = SectionBuilder::output()
        .add("name", "http")
        .add("match", match_tag)
        .add("alias", pipeline)
        .add("allow_duplicated_headers", "true")
        .add_if_not_empty_or_default("format", &out.format, "json")
        .add_if_not_empty("host", &resolve_value(&out.host, pipeline))
        .add_if_not_empty("http_passwd", &resolve_value(&out.password, pipeline))
        .add_if_not_empty("http_user", &resolve_value(&out.user, pipeline))
        .add("json_date_format", "iso8601")
        .add_if_not_empty_or_default("port", &out.port, "443")
        .add("retry_limit", RETRY_LIMIT)
        .add("storage.total_limit_size", fs_buffer_limit)
        .add("tls", if tls.disabled { "off" } else { "on" })
        .add(
            "tls.verify",
            if tls.skip_certificate_validation {
                "off"
            } else {
                "on"
            },
        )
        .add_if_not_empty("uri", &out.uri)
        .add_if_not_empty("compress", &out.compress);

    if tls.ca().is_some() {
        section = section.add("tls.ca_file", tls_path(tls_ca_file_name(pipeline)));
    }
    if tls.cert_key_pair().is_some() {
        section = section
            .add("tls.crt_file", tls_path(tls_cert_file_name(pipeline)))
            .add("tls.key_file", tls_path(tls_key_file_name(pipeline)));
    }
    section.build()
}

pub(crate) fn custom(
    pipeline: &str,
    match_tag: &str,
    params: &CustomParams,
    fs_buffer_limit: &str,
) -> String {
    let mut section = SectionBuilder::output()
        .extend(params.pairs())
        .add("match", match_tag);
    if !params.contains_key("alias") {
        section = section.add("alias", pipeline);
    }
    section
        .add("retry_limit", RETRY_LIMIT)
        .add("storage.total_limit_size", fs_buffer_limit)
        .build()
}
