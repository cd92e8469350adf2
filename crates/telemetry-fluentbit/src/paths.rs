//! Tail include/exclude globs for container log files
//!
//! Kubelet writes container logs as
//! `/var/log/containers/<pod>_<namespace>_<container>-<id>.log`.

use telemetry_common::crd::LogPipelineApplicationInput;

const CONTAINER_LOG_DIR: &str = "/var/log/containers";

/// Namespaces skipped unless a pipeline opts into system logs
pub const SYSTEM_NAMESPACES: &[&str] = &["kyma-system", "kube-system", "istio-system", "compass-system"];

/// The agent's own log files
const AGENT_SELF_EXCLUDE: &str =
    "/var/log/containers/telemetry-fluent-bit-*_kyma-system_fluent-bit-*.log";

/// Sibling collectors in the system namespace, never collected
const COLLECTOR_EXCLUDES: &[&str] = &[
    "/var/log/containers/*system-logs-agent-*_kyma-system_collector-*.log",
    "/var/log/containers/*system-logs-collector-*_kyma-system_collector-*.log",
    "/var/log/containers/telemetry-log-agent-*_kyma-system_collector-*.log",
];

/// Comma-separated include globs, one per namespace and container pair
pub fn include_path(input: &LogPipelineApplicationInput) -> String {
    let wildcard = ["*".to_string()];
    let namespaces: &[String] = if input.namespaces.include.is_empty() {
        &wildcard
    } else {
        &input.namespaces.include
    };
    let containers: &[String] = if input.containers.include.is_empty() {
        &wildcard
    } else {
        &input.containers.include
    };

    namespaces
        .iter()
        .flat_map(|ns| {
            containers
                .iter()
                .map(move |c| format!("{}/*_{}_{}-*.log", CONTAINER_LOG_DIR, ns, c))
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Comma-separated exclude globs
///
/// System namespaces are only excluded when the pipeline sets no namespace
/// selector at all.
pub fn exclude_path(input: &LogPipelineApplicationInput, collect_agent_logs: bool) -> String {
    let mut paths: Vec<String> = Vec::new();
    if !collect_agent_logs {
        paths.push(AGENT_SELF_EXCLUDE.to_string());
    }
    paths.extend(COLLECTOR_EXCLUDES.iter().map(|p| p.to_string()));

    let namespaces = &input.namespaces;
    let mut excluded: Vec<&str> = namespaces.exclude.iter().map(String::as_str).collect();
    if namespaces.include.is_empty() && namespaces.exclude.is_empty() && !namespaces.system {
        excluded.extend(SYSTEM_NAMESPACES);
    }
    paths.extend(
        excluded
            .into_iter()
            .map(|ns| format!("{}/*_{}_*-*.log", CONTAINER_LOG_DIR, ns)),
    );
    paths.extend(
        input
            .containers
            .exclude
            .iter()
            .map(|c| format!("{}/*_*_{}-*.log", CONTAINER_LOG_DIR, c)),
    );

    paths.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_common::crd::{LogPipelineContainerSelector, LogPipelineNamespaceSelector};

    fn input(
        namespaces: LogPipelineNamespaceSelector,
        containers: LogPipelineContainerSelector,
    ) -> LogPipelineApplicationInput {
        LogPipelineApplicationInput {
            namespaces,
            containers,
            ..Default::default()
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn split(s: &str) -> Vec<&str> {
        s.split(',').collect()
    }

    fn fixed_excludes(with_self: bool) -> Vec<&'static str> {
        let mut v = Vec::new();
        if with_self {
            v.push(AGENT_SELF_EXCLUDE);
        }
        v.extend(COLLECTOR_EXCLUDES);
        v
    }

    #[test]
    fn defaults_collect_everything_but_system_namespaces() {
        let app = LogPipelineApplicationInput::default();
        assert_eq!(include_path(&app), "/var/log/containers/*_*_*-*.log");

        let mut expected = fixed_excludes(true);
        expected.extend([
            "/var/log/containers/*_kyma-system_*-*.log",
            "/var/log/containers/*_kube-system_*-*.log",
            "/var/log/containers/*_istio-system_*-*.log",
            "/var/log/containers/*_compass-system_*-*.log",
        ]);
        assert_eq!(split(&exclude_path(&app, false)), expected);
    }

    #[test]
    fn system_flag_keeps_system_namespaces() {
        let app = input(
            LogPipelineNamespaceSelector {
                system: true,
                ..Default::default()
            },
            LogPipelineContainerSelector {
                exclude: strings(&["foo"]),
                ..Default::default()
            },
        );
        let mut expected = fixed_excludes(true);
        expected.push("/var/log/containers/*_*_foo-*.log");
        assert_eq!(split(&exclude_path(&app, false)), expected);
    }

    #[test]
    fn includes_are_namespace_major() {
        let app = input(
            LogPipelineNamespaceSelector {
                include: strings(&["foo", "bar"]),
                ..Default::default()
            },
            LogPipelineContainerSelector {
                include: strings(&["istio-proxy", "app"]),
                ..Default::default()
            },
        );
        assert_eq!(
            split(&include_path(&app)),
            vec![
                "/var/log/containers/*_foo_istio-proxy-*.log",
                "/var/log/containers/*_foo_app-*.log",
                "/var/log/containers/*_bar_istio-proxy-*.log",
                "/var/log/containers/*_bar_app-*.log",
            ]
        );
        assert_eq!(split(&exclude_path(&app, false)), fixed_excludes(true));
    }

    #[test]
    fn excluded_namespaces_replace_system_defaults() {
        let app = input(
            LogPipelineNamespaceSelector {
                exclude: strings(&["foo"]),
                ..Default::default()
            },
            LogPipelineContainerSelector {
                exclude: strings(&["bar"]),
                ..Default::default()
            },
        );
        let mut expected = fixed_excludes(true);
        expected.extend([
            "/var/log/containers/*_foo_*-*.log",
            "/var/log/containers/*_*_bar-*.log",
        ]);
        assert_eq!(split(&exclude_path(&app, false)), expected);
    }

    #[test]
    fn collecting_agent_logs_drops_self_exclusion() {
        let app = input(
            LogPipelineNamespaceSelector {
                system: true,
                ..Default::default()
            },
            LogPipelineContainerSelector::default(),
        );
        assert_eq!(split(&exclude_path(&app, true)), fixed_excludes(false));
    }
}
