//! Referenced secret check

use telemetry_common::crd::{LogPipeline, SecretKeyRef};

use crate::client::LogPipelineKubeClient;
use crate::secrets::{read_secret_key, SecretError};

/// Every secret key the pipeline references, in spec order
pub fn secret_refs(pipeline: &LogPipeline) -> Vec<&SecretKeyRef> {
    let spec = &pipeline.spec;
    spec.secret_values()
        .into_iter()
        .filter_map(|v| v.secret_key_ref())
        .chain(
            spec.variables
                .iter()
                .filter_map(|v| v.value_from.secret_key_ref.as_ref()),
        )
        .collect()
}

/// Fail on the first reference whose secret or key cannot be read
pub async fn validate_secret_refs(
    kube: &dyn LogPipelineKubeClient,
    pipeline: &LogPipeline,
) -> Result<(), SecretError> {
    for secret_ref in secret_refs(pipeline) {
        read_secret_key(kube, secret_ref).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockLogPipelineKubeClient;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;
    use telemetry_common::crd::{
        LogPipelineHttpOutput, LogPipelineSpec, LogPipelineVariableRef, ValueFromSource, ValueType,
    };

    fn pipeline() -> LogPipeline {
        let mut spec = LogPipelineSpec::default();
        spec.output.http = Some(LogPipelineHttpOutput {
            host: ValueType::literal("localhost"),
            password: ValueType::from_secret("my-namespace", "creds", "password"),
            ..Default::default()
        });
        spec.variables = vec![LogPipelineVariableRef {
            name: "TOKEN".to_string(),
            value_from: ValueFromSource {
                secret_key_ref: Some(SecretKeyRef {
                    name: "tokens".to_string(),
                    namespace: "my-namespace".to_string(),
                    key: "token".to_string(),
                }),
            },
        }];
        LogPipeline::new("foo", spec)
    }

    fn secret(key: &str) -> Secret {
        Secret {
            data: Some([(key.to_string(), ByteString(b"v".to_vec()))].into()),
            ..Default::default()
        }
    }

    #[test]
    fn collects_output_and_variable_refs() {
        let p = pipeline();
        let names: Vec<_> = secret_refs(&p).iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["creds", "tokens"]);
    }

    #[tokio::test]
    async fn all_refs_present() {
        let mut kube = MockLogPipelineKubeClient::new();
        kube.expect_get_secret().returning(|_, name| {
            Ok(Some(secret(if name == "creds" { "password" } else { "token" })))
        });
        validate_secret_refs(&kube, &pipeline()).await.unwrap();
    }

    #[tokio::test]
    async fn missing_variable_secret_is_reported() {
        let mut kube = MockLogPipelineKubeClient::new();
        kube.expect_get_secret().returning(|_, name| {
            Ok((name == "creds").then(|| secret("password")))
        });
        let err = validate_secret_refs(&kube, &pipeline()).await.unwrap_err();
        assert!(matches!(err, SecretError::SecretNotFound { ref name, .. } if name == "tokens"));
        assert!(err.is_missing());
    }

    #[tokio::test]
    async fn missing_key_is_reported() {
        let mut kube = MockLogPipelineKubeClient::new();
        kube.expect_get_secret()
            .returning(|_, _| Ok(Some(secret("other"))));
        let err = validate_secret_refs(&kube, &pipeline()).await.unwrap_err();
        assert!(matches!(err, SecretError::KeyNotFound { ref key, .. } if key == "password"));
    }
}
