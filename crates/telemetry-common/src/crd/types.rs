//! Shared types used by the LogPipeline CRD
//!
//! Holds the literal-or-secret [`ValueType`] used for credentials and TLS
//! material, and the Kubernetes-style [`Condition`] written to status.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to one key of a Secret
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Name of the Secret
    pub name: String,
    /// Namespace of the Secret
    pub namespace: String,
    /// Key inside the Secret's data
    pub key: String,
}

/// Source for a value that is read from somewhere else
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValueFromSource {
    /// Secret key holding the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<SecretKeyRef>,
}

/// Either a literal value or a reference to a secret key.
///
/// Example:
/// ```yaml
/// password:
///   valueFrom:
///     secretKeyRef:
///       name: backend-credentials
///       namespace: default
///       key: password
/// ```
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValueType {
    /// Literal value
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,

    /// Indirect value source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ValueFromSource>,
}

/// Where a [`ValueType`] gets its content from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueSource<'a> {
    /// Neither a literal nor a secret reference is set
    Undefined,
    /// Literal value written in the pipeline spec
    Literal(&'a str),
    /// Value read from a secret key
    Secret(&'a SecretKeyRef),
}

impl ValueType {
    /// Literal value
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            value_from: None,
        }
    }

    /// Value resolved from a secret key
    pub fn from_secret(
        namespace: impl Into<String>,
        name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            value: String::new(),
            value_from: Some(ValueFromSource {
                secret_key_ref: Some(SecretKeyRef {
                    name: name.into(),
                    namespace: namespace.into(),
                    key: key.into(),
                }),
            }),
        }
    }

    /// The secret reference, if any
    pub fn secret_key_ref(&self) -> Option<&SecretKeyRef> {
        self.value_from.as_ref()?.secret_key_ref.as_ref()
    }

    /// Classify the value. A literal wins over a secret reference; specs
    /// carrying both are rejected by validation before they get here.
    pub fn source(&self) -> ValueSource<'_> {
        if !self.value.is_empty() {
            return ValueSource::Literal(&self.value);
        }
        match self.secret_key_ref() {
            Some(r) => ValueSource::Secret(r),
            None => ValueSource::Undefined,
        }
    }

    /// True when either a literal or a secret reference is set
    pub fn is_defined(&self) -> bool {
        !matches!(self.source(), ValueSource::Undefined)
    }

    /// True when neither a literal nor a secret reference is set
    pub fn is_empty(&self) -> bool {
        !self.is_defined()
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., ConfigurationGenerated)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Generation of the pipeline the condition was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            observed_generation: None,
            last_transition_time: Utc::now(),
        }
    }

    /// Attach the generation this condition was derived from
    pub fn observed(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    /// True when type, status, reason, message and generation all match
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
            && self.observed_generation == other.observed_generation
    }
}

/// Insert or update a condition in place.
///
/// The transition time of an existing condition is kept unless its status
/// changes, matching how the API machinery treats conditions.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn literal_wins_over_secret_reference() {
        let mut v = ValueType::from_secret("ns", "name", "key");
        assert!(matches!(v.source(), ValueSource::Secret(r) if r.key == "key"));

        v.value = "plain".to_string();
        assert_eq!(v.source(), ValueSource::Literal("plain"));
    }

    #[test]
    fn empty_value_is_undefined() {
        let v = ValueType::default();
        assert_eq!(v.source(), ValueSource::Undefined);
        assert!(v.is_empty());
        assert!(!ValueType::literal("x").is_empty());
    }

    #[test]
    fn value_type_parses_secret_ref_yaml() {
        let yaml = r#"
valueFrom:
  secretKeyRef:
    name: creds
    namespace: default
    key: user
"#;
        let v: ValueType = serde_yaml::from_str(yaml).unwrap();
        let r = v.secret_key_ref().unwrap();
        assert_eq!(r.name, "creds");
        assert_eq!(r.namespace, "default");
        assert_eq!(r.key, "user");
    }

    #[test]
    fn set_condition_keeps_transition_time_when_status_is_unchanged() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut old = Condition::new("AgentHealthy", ConditionStatus::True, "AgentReady", "");
        old.last_transition_time = t0;
        let mut conditions = vec![old];

        let update = Condition::new(
            "AgentHealthy",
            ConditionStatus::True,
            "RolloutInProgress",
            "rolling",
        );
        set_condition(&mut conditions, update);

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].reason, "RolloutInProgress");
        assert_eq!(conditions[0].last_transition_time, t0);
    }

    #[test]
    fn set_condition_moves_transition_time_on_status_change() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut old = Condition::new("AgentHealthy", ConditionStatus::True, "AgentReady", "");
        old.last_transition_time = t0;
        let mut conditions = vec![old];

        set_condition(
            &mut conditions,
            Condition::new("AgentHealthy", ConditionStatus::False, "AgentNotReady", ""),
        );

        assert_ne!(conditions[0].last_transition_time, t0);
        assert_eq!(conditions[0].status, ConditionStatus::False);
    }

    #[test]
    fn set_condition_appends_new_types() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            Condition::new("A", ConditionStatus::True, "R", ""),
        );
        set_condition(
            &mut conditions,
            Condition::new("B", ConditionStatus::False, "R", ""),
        );
        assert_eq!(conditions.len(), 2);
        assert!(find_condition(&conditions, "B").is_some());
        assert!(find_condition(&conditions, "C").is_none());
    }

    #[test]
    fn condition_serializes_type_field() {
        let c = Condition::new("FlowHealthy", ConditionStatus::Unknown, "X", "m").observed(Some(3));
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["type"], "FlowHealthy");
        assert_eq!(json["status"], "Unknown");
        assert_eq!(json["observedGeneration"], 3);
        assert!(json.get("lastTransitionTime").is_some());
    }
}
