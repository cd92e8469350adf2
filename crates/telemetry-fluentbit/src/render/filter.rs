//! `[FILTER]` sections of the synthesized chain

use telemetry_common::crd::LogPipelineApplicationInput;

use crate::custom::CustomParams;
use crate::section::SectionBuilder;
use crate::LUA_SCRIPT_PATH;

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

pub(crate) fn record_modifier(match_tag: &str, cluster_name: &str) -> String {
    SectionBuilder::filter()
        .add("name", "record_modifier")
        .add("match", match_tag)
        .add("record", format!("cluster_identifier {}", cluster_name))
        .build()
}

pub(crate) fn kubernetes(
    pipeline: &str,
    match_tag: &str,
    app: &LogPipelineApplicationInput,
) -> String {
    let annotations = app.keep_annotations.unwrap_or(false);
    let labels = !app.drop_labels.unwrap_or(false);
    let keep_log = app.keep_original_body.unwrap_or(true);

    SectionBuilder::filter()
        .add("name", "kubernetes")
        .add("match", match_tag)
        .add("annotations", on_off(annotations))
        .add("buffer_size", "1MB")
        .add("k8s-logging.exclude", "off")
        .add("k8s-logging.parser", "on")
        .add("keep_log", on_off(keep_log))
        .add("kube_tag_prefix", format!("{}.var.log.containers.", pipeline))
        .add("labels", on_off(labels))
        .add("merge_log", "on")
        .build()
}

pub(crate) fn timestamp_modify(match_tag: &str) -> String {
    SectionBuilder::filter()
        .add("name", "modify")
        .add("match", match_tag)
        .add("copy", "time @timestamp")
        .build()
}

pub(crate) fn lua_enrich(match_tag: &str, dedot: bool) -> String {
    let call = if dedot {
        "dedot_and_enrich_app_name"
    } else {
        "enrich_app_name"
    };
    SectionBuilder::filter()
        .add("name", "lua")
        .add("match", match_tag)
        .add("call", call)
        .add("script", LUA_SCRIPT_PATH)
        .build()
}

pub(crate) fn custom(match_tag: &str, params: &CustomParams) -> String {
    SectionBuilder::filter()
        .extend(params.pairs())
        .add("match", match_tag)
        .build()
}
