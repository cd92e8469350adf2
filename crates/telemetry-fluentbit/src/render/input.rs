//! `[INPUT]` tail section

use telemetry_common::crd::LogPipelineApplicationInput;

use crate::paths::{exclude_path, include_path};
use crate::section::SectionBuilder;

pub(crate) fn tail_input(
    pipeline: &str,
    app: &LogPipelineApplicationInput,
    collect_agent_logs: bool,
) -> String {
    SectionBuilder::input()
        .add("name", "tail")
        .add("alias", pipeline)
        .add("db", format!("/data/flb_{}.db", pipeline))
        .add_if_not_empty("exclude_path", &exclude_path(app, collect_agent_logs))
        .add("mem_buf_limit", "5MB")
        .add("multiline.parser", "cri")
        .add("path", include_path(app))
        .add("read_from_head", "true")
        .add("skip_long_lines", "on")
        .add("storage.type", "filesystem")
        .add("tag", format!("{}.*", pipeline))
        .build()
}
