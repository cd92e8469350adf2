//! Pipeline validation
//!
//! Checks run in a fixed order and stop at the first failure: spec rules,
//! referenced secrets, the HTTP endpoint, then TLS material. Each failure
//! maps to the `ConfigurationGenerated` reason and message it produces.

pub mod endpoint;
pub mod secret_ref;
pub mod spec;
pub mod tls;

use chrono::{DateTime, Utc};
use thiserror::Error;

use telemetry_common::conditions::{
    message_for, REASON_ENDPOINT_INVALID, REASON_REFERENCED_SECRET_MISSING,
    REASON_TLS_CERTIFICATE_ABOUT_TO_EXPIRE, REASON_TLS_CERTIFICATE_EXPIRED,
    REASON_TLS_CONFIGURATION_INVALID, REASON_VALIDATION_FAILED,
};
use telemetry_common::crd::{LogPipeline, OutputKind};
use telemetry_fluentbit::RenderConfig;

use crate::client::LogPipelineKubeClient;
use crate::secrets::{resolve_value, unescape_newlines, SecretError};

pub use endpoint::EndpointError;
pub use spec::SpecError;
pub use tls::{TlsError, TlsMaterial};

/// First check a pipeline failed
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Spec rule violation
    #[error(transparent)]
    Spec(#[from] SpecError),

    /// A referenced secret could not be read
    #[error(transparent)]
    Secret(#[from] SecretError),

    /// HTTP output host is unusable
    #[error("HTTP output host invalid: {0}")]
    Endpoint(#[from] EndpointError),

    /// TLS material is unusable or expiring
    #[error(transparent)]
    Tls(#[from] TlsError),
}

impl ValidationError {
    /// `ConfigurationGenerated` reason for this failure
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Spec(_) => REASON_VALIDATION_FAILED,
            Self::Secret(e) if e.is_missing() => REASON_REFERENCED_SECRET_MISSING,
            Self::Secret(_) => REASON_VALIDATION_FAILED,
            Self::Endpoint(_) => REASON_ENDPOINT_INVALID,
            Self::Tls(e) if e.is_expired() => REASON_TLS_CERTIFICATE_EXPIRED,
            Self::Tls(e) if e.is_about_to_expire() => REASON_TLS_CERTIFICATE_ABOUT_TO_EXPIRE,
            Self::Tls(_) => REASON_TLS_CONFIGURATION_INVALID,
        }
    }

    /// User-facing condition message
    pub fn message(&self) -> String {
        if self.is_api_failure() {
            return message_for(REASON_VALIDATION_FAILED).to_string();
        }
        capitalize(&self.to_string())
    }

    /// Reported in status but the pipeline stays reconcilable
    pub fn is_informative(&self) -> bool {
        matches!(self, Self::Tls(e) if e.is_about_to_expire())
    }

    /// Validation could not finish because an API request failed
    pub fn is_api_failure(&self) -> bool {
        matches!(self, Self::Secret(e) if !e.is_missing())
    }
}

fn capitalize(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Run every check against `pipeline` at `now`
pub async fn validate(
    kube: &dyn LogPipelineKubeClient,
    pipeline: &LogPipeline,
    render: &RenderConfig,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    spec::validate_spec(&pipeline.spec)?;
    spec::check_output_allowed(&pipeline.spec, render.allow_custom_outputs)?;
    secret_ref::validate_secret_refs(kube, pipeline).await?;

    let Some(OutputKind::Http(http)) = pipeline.spec.output.kind() else {
        return Ok(());
    };

    let host = resolve_value(kube, &http.host).await?;
    endpoint::validate_host(&String::from_utf8_lossy(&host))?;

    tls::check_pairing(&http.tls)?;
    let mut material = TlsMaterial::default();
    if let Some(ca) = http.tls.ca() {
        material.ca = Some(unescape_newlines(&resolve_value(kube, ca).await?));
    }
    if let Some((cert, key)) = http.tls.cert_key_pair() {
        material.cert = Some(unescape_newlines(&resolve_value(kube, cert).await?));
        material.key = Some(unescape_newlines(&resolve_value(kube, key).await?));
    }
    tls::validate_tls(&material, now)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockLogPipelineKubeClient;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;
    use telemetry_common::crd::{LogPipelineHttpOutput, LogPipelineSpec, ValueType};
    use telemetry_common::Error;

    fn http_pipeline(host: ValueType) -> LogPipeline {
        let mut spec = LogPipelineSpec::default();
        spec.output.http = Some(LogPipelineHttpOutput {
            host,
            ..Default::default()
        });
        LogPipeline::new("foo", spec)
    }

    fn render() -> RenderConfig {
        RenderConfig::default()
    }

    fn secret(key: &str, value: &[u8]) -> Secret {
        Secret {
            data: Some([(key.to_string(), ByteString(value.to_vec()))].into()),
            ..Default::default()
        }
    }

    // =========================================================================
    // Story Tests
    // =========================================================================

    /// Story: A minimal HTTP pipeline passes every check
    #[tokio::test]
    async fn story_minimal_pipeline_is_valid() {
        let kube = MockLogPipelineKubeClient::new();
        validate(&kube, &http_pipeline(ValueType::literal("localhost")), &render(), Utc::now())
            .await
            .unwrap();
    }

    /// Story: A host read from a secret is validated after resolution
    #[tokio::test]
    async fn story_host_from_secret_is_checked() {
        let mut kube = MockLogPipelineKubeClient::new();
        kube.expect_get_secret()
            .returning(|_, _| Ok(Some(secret("host", b"https://logs.example.com"))));

        let pipeline = http_pipeline(ValueType::from_secret("ns", "backend", "host"));
        let err = validate(&kube, &pipeline, &render(), Utc::now()).await.unwrap_err();
        assert_eq!(err.reason(), REASON_ENDPOINT_INVALID);
        assert_eq!(
            err.message(),
            "HTTP output host invalid: 'https://logs.example.com' is not a valid hostname or IP address"
        );
    }

    /// Story: A missing secret is a status problem, not an API failure
    #[tokio::test]
    async fn story_missing_secret_is_referenced_secret_missing() {
        let mut kube = MockLogPipelineKubeClient::new();
        kube.expect_get_secret().returning(|_, _| Ok(None));

        let pipeline = http_pipeline(ValueType::from_secret("ns", "backend", "host"));
        let err = validate(&kube, &pipeline, &render(), Utc::now()).await.unwrap_err();
        assert_eq!(err.reason(), REASON_REFERENCED_SECRET_MISSING);
        assert!(!err.is_api_failure());
        assert!(!err.is_informative());
        assert_eq!(
            err.message(),
            "Unable to read secret 'backend' from namespace 'ns'"
        );
    }

    /// Story: An API failure while reading secrets reports the generic message
    #[tokio::test]
    async fn story_api_failure_uses_default_message() {
        let mut kube = MockLogPipelineKubeClient::new();
        kube.expect_get_secret()
            .returning(|_, _| Err(Error::internal("connection reset")));

        let pipeline = http_pipeline(ValueType::from_secret("ns", "backend", "host"));
        let err = validate(&kube, &pipeline, &render(), Utc::now()).await.unwrap_err();
        assert!(err.is_api_failure());
        assert_eq!(err.reason(), REASON_VALIDATION_FAILED);
        assert_eq!(err.message(), message_for(REASON_VALIDATION_FAILED));
    }

    /// Story: Spec rules run before anything touches the API
    #[tokio::test]
    async fn story_spec_errors_come_first() {
        let mut kube = MockLogPipelineKubeClient::new();
        kube.expect_get_secret().never();

        let mut pipeline = http_pipeline(ValueType::from_secret("ns", "backend", "host"));
        pipeline.spec.output.custom = Some("name stdout".to_string());
        let err = validate(&kube, &pipeline, &render(), Utc::now()).await.unwrap_err();
        assert_eq!(err.reason(), REASON_VALIDATION_FAILED);
        assert_eq!(err.message(), "Exactly one output plugin must be defined");
    }

    /// Story: A lone certificate without its key is a TLS configuration error
    #[tokio::test]
    async fn story_unpaired_certificate_is_invalid() {
        let kube = MockLogPipelineKubeClient::new();
        let mut pipeline = http_pipeline(ValueType::literal("localhost"));
        if let Some(http) = pipeline.spec.output.http.as_mut() {
            http.tls.cert = Some(ValueType::literal("-----BEGIN CERTIFICATE-----"));
        }
        let err = validate(&kube, &pipeline, &render(), Utc::now()).await.unwrap_err();
        assert_eq!(err.reason(), REASON_TLS_CONFIGURATION_INVALID);
        assert_eq!(
            err.message(),
            "A certificate and private key must either both be provided or both be missing"
        );
    }

    /// Story: A custom output is refused when custom outputs are off
    #[tokio::test]
    async fn story_refused_custom_output_fails_validation() {
        let kube = MockLogPipelineKubeClient::new();
        let mut spec = LogPipelineSpec::default();
        spec.output.custom = Some("name stdout".to_string());
        let pipeline = LogPipeline::new("foo", spec);
        let render = RenderConfig {
            allow_custom_outputs: false,
            ..Default::default()
        };

        let err = validate(&kube, &pipeline, &render, Utc::now()).await.unwrap_err();
        assert_eq!(err.reason(), REASON_VALIDATION_FAILED);
        assert!(!err.is_informative());
        assert_eq!(err.message(), "Custom output plugins are not allowed");
    }

    #[test]
    fn about_to_expire_is_informative() {
        let err = ValidationError::Tls(TlsError::CertAboutToExpire(Utc::now()));
        assert!(err.is_informative());
        assert_eq!(err.reason(), REASON_TLS_CERTIFICATE_ABOUT_TO_EXPIRE);
    }

    #[test]
    fn expired_is_not_informative() {
        let err = ValidationError::Tls(TlsError::CaExpired(Utc::now()));
        assert!(!err.is_informative());
        assert_eq!(err.reason(), REASON_TLS_CERTIFICATE_EXPIRED);
    }
}
