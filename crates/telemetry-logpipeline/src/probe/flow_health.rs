//! Flow health from self-monitor alerts
//!
//! The self-monitor is a Prometheus instance evaluating alert rules on the
//! agent metrics. A pipeline's flow health is derived from which of those
//! alerts are firing with its `pipeline_name` label.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use telemetry_common::Error;

/// Every log read by a pipeline is dropped
pub const ALERT_ALL_DATA_DROPPED: &str = "LogFluentBitAllDataDropped";
/// Some logs read by a pipeline are dropped
pub const ALERT_SOME_DATA_DROPPED: &str = "LogFluentBitSomeDataDropped";
/// The filesystem buffer of a pipeline is in use
pub const ALERT_BUFFER_IN_USE: &str = "LogFluentBitBufferInUse";
/// Logs are read but nothing is delivered
pub const ALERT_NO_LOGS_DELIVERED: &str = "LogFluentBitNoLogsDelivered";

/// Alert label carrying the pipeline name
pub const LABEL_PIPELINE_NAME: &str = "pipeline_name";

const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Health signals for one pipeline
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlowHealthProbeResult {
    /// Nothing is wrong
    pub healthy: bool,
    /// Logs are dropped and none are delivered
    pub all_data_dropped: bool,
    /// Logs are dropped while others are delivered
    pub some_data_dropped: bool,
    /// Logs are read but none are delivered
    pub no_logs_delivered: bool,
    /// Buffer is filling up
    pub buffer_filling_up: bool,
}

/// Source of flow health signals
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FlowHealthProber: Send + Sync {
    /// Probe the flow of `pipeline`
    async fn probe(&self, pipeline: &str) -> Result<FlowHealthProbeResult, Error>;
}

/// Alert as returned by the Prometheus alerts API
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Alert {
    /// Alert labels, `alertname` among them
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// `firing`, `pending` or `inactive`
    #[serde(default)]
    pub state: String,
}

#[derive(Deserialize)]
struct AlertsResponse {
    data: AlertsData,
}

#[derive(Deserialize)]
struct AlertsData {
    #[serde(default)]
    alerts: Vec<Alert>,
}

/// An alert without a pipeline label concerns every pipeline
fn firing_for(alerts: &[Alert], name: &str, pipeline: &str) -> bool {
    alerts.iter().any(|a| {
        a.state == "firing"
            && a.labels.get("alertname").map(String::as_str) == Some(name)
            && a.labels
                .get(LABEL_PIPELINE_NAME)
                .map_or(true, |p| p == pipeline)
    })
}

/// Derive the probe result of `pipeline` from the current alerts
pub fn evaluate_alerts(alerts: &[Alert], pipeline: &str) -> FlowHealthProbeResult {
    let all_data_dropped = firing_for(alerts, ALERT_ALL_DATA_DROPPED, pipeline);
    let some_data_dropped = firing_for(alerts, ALERT_SOME_DATA_DROPPED, pipeline);
    let no_logs_delivered = firing_for(alerts, ALERT_NO_LOGS_DELIVERED, pipeline);
    let buffer_filling_up = firing_for(alerts, ALERT_BUFFER_IN_USE, pipeline);

    FlowHealthProbeResult {
        healthy: !(all_data_dropped || some_data_dropped || no_logs_delivered || buffer_filling_up),
        all_data_dropped,
        some_data_dropped,
        no_logs_delivered,
        buffer_filling_up,
    }
}

/// Prober querying the self-monitor Prometheus
pub struct PrometheusFlowHealthProber {
    http_client: reqwest::Client,
    alerts_url: String,
}

impl PrometheusFlowHealthProber {
    /// Prober for the self-monitor at `base_url`
    pub fn new(base_url: &str) -> Result<Self, Error> {
        let http_client = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::internal_with_context("flow_health", format!("failed to create HTTP client: {e}"))
            })?;
        Ok(Self {
            http_client,
            alerts_url: format!("{}/api/v1/alerts", base_url.trim_end_matches('/')),
        })
    }

    async fn alerts(&self) -> Result<Vec<Alert>, reqwest::Error> {
        let response: AlertsResponse = self
            .http_client
            .get(&self.alerts_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.data.alerts)
    }
}

#[async_trait]
impl FlowHealthProber for PrometheusFlowHealthProber {
    async fn probe(&self, pipeline: &str) -> Result<FlowHealthProbeResult, Error> {
        let alerts = self.alerts().await.map_err(|e| {
            Error::internal_with_context("flow_health", format!("failed to query alerts: {e}"))
        })?;
        let result = evaluate_alerts(&alerts, pipeline);
        debug!(pipeline = %pipeline, ?result, "probed flow health");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn firing(name: &str, pipeline: &str) -> Alert {
        Alert {
            labels: [
                ("alertname".to_string(), name.to_string()),
                (LABEL_PIPELINE_NAME.to_string(), pipeline.to_string()),
            ]
            .into(),
            state: "firing".to_string(),
        }
    }

    #[test]
    fn no_alerts_is_healthy() {
        let result = evaluate_alerts(&[], "foo");
        assert_eq!(
            result,
            FlowHealthProbeResult {
                healthy: true,
                ..Default::default()
            }
        );
    }

    #[test]
    fn each_rule_maps_to_its_signal() {
        let cases: [(&str, fn(&FlowHealthProbeResult) -> bool); 4] = [
            (ALERT_ALL_DATA_DROPPED, |r| r.all_data_dropped),
            (ALERT_SOME_DATA_DROPPED, |r| r.some_data_dropped),
            (ALERT_BUFFER_IN_USE, |r| r.buffer_filling_up),
            (ALERT_NO_LOGS_DELIVERED, |r| r.no_logs_delivered),
        ];
        for (rule, signal) in cases {
            let result = evaluate_alerts(&[firing(rule, "foo")], "foo");
            assert!(signal(&result), "{rule}");
            assert!(!result.healthy, "{rule}");
        }
    }

    #[test]
    fn all_data_dropped_rule_by_name() {
        let result = evaluate_alerts(&[firing("LogFluentBitAllDataDropped", "foo")], "foo");
        assert_eq!(
            result,
            FlowHealthProbeResult {
                all_data_dropped: true,
                ..Default::default()
            }
        );
    }

    #[test]
    fn buffer_in_use_and_no_delivery_are_reported() {
        let alerts = [
            firing(ALERT_BUFFER_IN_USE, "foo"),
            firing(ALERT_NO_LOGS_DELIVERED, "foo"),
        ];
        let result = evaluate_alerts(&alerts, "foo");
        assert!(result.buffer_filling_up);
        assert!(result.no_logs_delivered);
        assert!(!result.healthy);
    }

    #[test]
    fn alerts_of_other_pipelines_and_pending_alerts_are_ignored() {
        let mut pending = firing(ALERT_ALL_DATA_DROPPED, "foo");
        pending.state = "pending".to_string();
        let alerts = [firing(ALERT_ALL_DATA_DROPPED, "bar"), pending];
        assert!(evaluate_alerts(&alerts, "foo").healthy);
    }

    #[test]
    fn unprefixed_and_unrelated_rules_are_ignored() {
        let alerts = [
            firing("FluentBitAllDataDropped", "foo"),
            firing("MetricAgentAllDataDropped", "foo"),
        ];
        assert!(evaluate_alerts(&alerts, "foo").healthy);
    }

    #[test]
    fn alert_without_pipeline_label_applies_to_every_pipeline() {
        let mut alert = firing(ALERT_SOME_DATA_DROPPED, "foo");
        alert.labels.remove(LABEL_PIPELINE_NAME);
        assert!(evaluate_alerts(&[alert], "bar").some_data_dropped);
    }

    #[test]
    fn parses_prometheus_alerts_response() {
        let body = r#"{
            "status": "success",
            "data": {
                "alerts": [
                    {
                        "labels": {"alertname": "LogFluentBitBufferInUse", "pipeline_name": "foo"},
                        "annotations": {},
                        "state": "firing",
                        "activeAt": "2024-01-01T00:00:00Z",
                        "value": "1e+00"
                    }
                ]
            }
        }"#;
        let response: AlertsResponse = serde_json::from_str(body).unwrap();
        assert!(evaluate_alerts(&response.data.alerts, "foo").buffer_filling_up);
    }

    #[test]
    fn alerts_url_is_normalized() {
        let prober = PrometheusFlowHealthProber::new("http://self-monitor:9090/").unwrap();
        assert_eq!(prober.alerts_url, "http://self-monitor:9090/api/v1/alerts");
    }
}
