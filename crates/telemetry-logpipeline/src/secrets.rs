//! Secret projection
//!
//! Copies every secret value the admitted pipelines reference into the two
//! agent secrets: scalar credentials and user variables become environment
//! entries, TLS material becomes files under the output TLS directory.

use std::collections::BTreeMap;

use telemetry_common::crd::{LogPipeline, OutputKind, SecretKeyRef, ValueSource, ValueType};
use telemetry_common::Error;
use telemetry_fluentbit::env::secret_ref_env_var;
use telemetry_fluentbit::{tls_ca_file_name, tls_cert_file_name, tls_key_file_name};
use thiserror::Error;

use crate::client::LogPipelineKubeClient;

/// Failure to read a referenced secret value
#[derive(Debug, Error)]
pub enum SecretError {
    /// The secret does not exist
    #[error("unable to read secret '{name}' from namespace '{namespace}'")]
    SecretNotFound {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
        /// Key that was to be read
        key: String,
    },

    /// The secret exists but lacks the key
    #[error("unable to find key '{key}' in secret '{name}' from namespace '{namespace}'")]
    KeyNotFound {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
        /// Missing key
        key: String,
    },

    /// The API request failed
    #[error("unable to read secret '{name}' from namespace '{namespace}': {source}")]
    Api {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
        /// Key that was to be read
        key: String,
        /// Underlying error
        #[source]
        source: Error,
    },
}

impl SecretError {
    /// True when the secret or key is absent; false for request failures
    pub fn is_missing(&self) -> bool {
        !matches!(self, Self::Api { .. })
    }
}

impl From<SecretError> for Error {
    fn from(err: SecretError) -> Self {
        match err {
            SecretError::Api { source, .. } => source,
            missing => Error::internal_with_context("secrets", missing.to_string()),
        }
    }
}

/// Read one key of a secret
pub async fn read_secret_key(
    kube: &dyn LogPipelineKubeClient,
    secret_ref: &SecretKeyRef,
) -> Result<Vec<u8>, SecretError> {
    let secret = kube
        .get_secret(&secret_ref.namespace, &secret_ref.name)
        .await
        .map_err(|source| SecretError::Api {
            namespace: secret_ref.namespace.clone(),
            name: secret_ref.name.clone(),
            key: secret_ref.key.clone(),
            source,
        })?
        .ok_or_else(|| SecretError::SecretNotFound {
            namespace: secret_ref.namespace.clone(),
            name: secret_ref.name.clone(),
            key: secret_ref.key.clone(),
        })?;

    secret
        .data
        .as_ref()
        .and_then(|data| data.get(&secret_ref.key))
        .map(|v| v.0.clone())
        .ok_or_else(|| SecretError::KeyNotFound {
            namespace: secret_ref.namespace.clone(),
            name: secret_ref.name.clone(),
            key: secret_ref.key.clone(),
        })
}

/// Resolve a value to bytes: literal text or the referenced secret key.
/// Undefined values resolve to nothing.
pub async fn resolve_value(
    kube: &dyn LogPipelineKubeClient,
    value: &ValueType,
) -> Result<Vec<u8>, SecretError> {
    match value.source() {
        ValueSource::Literal(v) => Ok(v.as_bytes().to_vec()),
        ValueSource::Secret(r) => read_secret_key(kube, r).await,
        ValueSource::Undefined => Ok(Vec::new()),
    }
}

/// Replace every literal `\n` with a newline
pub fn unescape_newlines(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] == b'\\' && data.get(i + 1) == Some(&b'n') {
            out.push(b'\n');
            i += 2;
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}

/// Contents of the env and TLS agent secrets
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProjectedSecrets {
    /// Env var name to value
    pub env: BTreeMap<String, Vec<u8>>,
    /// TLS file name to PEM bytes
    pub tls: BTreeMap<String, Vec<u8>>,
}

/// Project the secrets of every given pipeline.
///
/// The first unreadable reference aborts the projection.
pub async fn project_secrets(
    kube: &dyn LogPipelineKubeClient,
    pipelines: &[&LogPipeline],
) -> Result<ProjectedSecrets, SecretError> {
    let mut projected = ProjectedSecrets::default();
    for pipeline in pipelines {
        let name = pipeline.metadata.name.as_deref().unwrap_or_default();
        project_env(kube, name, pipeline, &mut projected.env).await?;
        project_tls(kube, name, pipeline, &mut projected.tls).await?;
    }
    Ok(projected)
}

async fn project_env(
    kube: &dyn LogPipelineKubeClient,
    name: &str,
    pipeline: &LogPipeline,
    env: &mut BTreeMap<String, Vec<u8>>,
) -> Result<(), SecretError> {
    if let Some(OutputKind::Http(http)) = pipeline.spec.output.kind() {
        for value in [&http.host, &http.user, &http.password] {
            if let ValueSource::Secret(r) = value.source() {
                let data = read_secret_key(kube, r).await?;
                env.insert(secret_ref_env_var(name, r), data);
            }
        }
    }

    for variable in &pipeline.spec.variables {
        if let Some(r) = variable.value_from.secret_key_ref.as_ref() {
            let data = read_secret_key(kube, r).await?;
            env.insert(variable.name.clone(), data);
        }
    }
    Ok(())
}

async fn project_tls(
    kube: &dyn LogPipelineKubeClient,
    name: &str,
    pipeline: &LogPipeline,
    tls_files: &mut BTreeMap<String, Vec<u8>>,
) -> Result<(), SecretError> {
    let Some(OutputKind::Http(http)) = pipeline.spec.output.kind() else {
        return Ok(());
    };
    let tls = &http.tls;

    if let Some(ca) = tls.ca() {
        let data = resolve_value(kube, ca).await?;
        tls_files.insert(tls_ca_file_name(name), unescape_newlines(&data));
    }
    if let Some((cert, key)) = tls.cert_key_pair() {
        let cert = resolve_value(kube, cert).await?;
        let key = resolve_value(kube, key).await?;
        tls_files.insert(tls_cert_file_name(name), unescape_newlines(&cert));
        tls_files.insert(tls_key_file_name(name), unescape_newlines(&key));
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
        LogPipelineHttpOutput, LogPipelineOutput, LogPipelineOutputTls, LogPipelineSpec,
        LogPipelineVariableRef, ValueFromSource,
    };

    fn secret(data: &[(&str, &str)]) -> Secret {
        Secret {
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn http_pipeline(name: &str, http: LogPipelineHttpOutput) -> LogPipeline {
        LogPipeline::new(
            name,
            LogPipelineSpec {
                output: LogPipelineOutput {
                    http: Some(http),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
    }

    fn mock_with_secret(ns: &'static str, name: &'static str, data: Secret) -> MockLogPipelineKubeClient {
        let mut mock = MockLogPipelineKubeClient::new();
        mock.expect_get_secret().returning(move |n, s| {
            if n == ns && s == name {
                Ok(Some(data.clone()))
            } else {
                Ok(None)
            }
        });
        mock
    }

    #[test]
    fn unescapes_only_backslash_n() {
        assert_eq!(unescape_newlines(b"a\\nb"), b"a\nb");
        assert_eq!(unescape_newlines(b"a\\tb\\"), b"a\\tb\\");
        assert_eq!(unescape_newlines(b"\\n\\n"), b"\n\n");
    }

    #[tokio::test]
    async fn secret_password_lands_under_encoded_env_name() {
        let kube = mock_with_secret("my-namespace", "secret", secret(&[("key", "s3cr3t")]));
        let pipeline = http_pipeline(
            "foo",
            LogPipelineHttpOutput {
                host: ValueType::literal("localhost"),
                password: ValueType::from_secret("my-namespace", "secret", "key"),
                ..Default::default()
            },
        );

        let projected = project_secrets(&kube, &[&pipeline]).await.unwrap();
        assert_eq!(
            projected.env.get("FOO_MY_NAMESPACE_SECRET_KEY").map(Vec::as_slice),
            Some(&b"s3cr3t"[..])
        );
        assert_eq!(projected.env.len(), 1);
        assert!(projected.tls.is_empty());
    }

    #[tokio::test]
    async fn variables_use_their_own_names() {
        let kube = mock_with_secret("default", "creds", secret(&[("token", "t")]));
        let mut pipeline = http_pipeline(
            "foo",
            LogPipelineHttpOutput {
                host: ValueType::literal("localhost"),
                ..Default::default()
            },
        );
        pipeline.spec.variables = vec![LogPipelineVariableRef {
            name: "API_TOKEN".to_string(),
            value_from: ValueFromSource {
                secret_key_ref: Some(SecretKeyRef {
                    name: "creds".to_string(),
                    namespace: "default".to_string(),
                    key: "token".to_string(),
                }),
            },
        }];

        let projected = project_secrets(&kube, &[&pipeline]).await.unwrap();
        assert_eq!(projected.env["API_TOKEN"], b"t");
    }

    #[tokio::test]
    async fn literal_tls_material_is_unescaped() {
        let kube = MockLogPipelineKubeClient::new();
        let pipeline = http_pipeline(
            "foo",
            LogPipelineHttpOutput {
                host: ValueType::literal("localhost"),
                tls: LogPipelineOutputTls {
                    cert: Some(ValueType::literal(
                        "-----BEGIN CERT-----\\nabc\\n-----END CERT-----",
                    )),
                    key: Some(ValueType::literal("-----BEGIN KEY-----\\nxyz\\n-----END KEY-----")),
                    ..Default::default()
                },
                ..Default::default()
            },
        );

        let projected = project_secrets(&kube, &[&pipeline]).await.unwrap();
        assert_eq!(
            projected.tls["foo-cert.crt"],
            b"-----BEGIN CERT-----\nabc\n-----END CERT-----"
        );
        assert_eq!(
            projected.tls["foo-key.key"],
            b"-----BEGIN KEY-----\nxyz\n-----END KEY-----"
        );
        assert!(!projected.tls.contains_key("foo-ca.crt"));
    }

    #[tokio::test]
    async fn lone_client_cert_is_not_projected() {
        let kube = mock_with_secret("ns", "tls", secret(&[("ca", "CA\\nDATA")]));
        let pipeline = http_pipeline(
            "foo",
            LogPipelineHttpOutput {
                host: ValueType::literal("localhost"),
                tls: LogPipelineOutputTls {
                    ca: Some(ValueType::from_secret("ns", "tls", "ca")),
                    cert: Some(ValueType::literal("cert")),
                    ..Default::default()
                },
                ..Default::default()
            },
        );

        let projected = project_secrets(&kube, &[&pipeline]).await.unwrap();
        assert_eq!(projected.tls.len(), 1);
        assert_eq!(projected.tls["foo-ca.crt"], b"CA\nDATA");
    }

    #[tokio::test]
    async fn missing_key_names_its_coordinates() {
        let kube = mock_with_secret("ns", "creds", secret(&[("other", "x")]));
        let pipeline = http_pipeline(
            "foo",
            LogPipelineHttpOutput {
                host: ValueType::from_secret("ns", "creds", "host"),
                ..Default::default()
            },
        );

        let err = project_secrets(&kube, &[&pipeline]).await.unwrap_err();
        assert!(err.is_missing());
        assert_eq!(
            err.to_string(),
            "unable to find key 'host' in secret 'creds' from namespace 'ns'"
        );
    }

    #[tokio::test]
    async fn missing_secret_and_api_failures_are_distinguished() {
        let mut kube = MockLogPipelineKubeClient::new();
        kube.expect_get_secret()
            .returning(|_, name| match name {
                "gone" => Ok(None),
                _ => Err(Error::internal("connection refused")),
            });

        let gone = SecretKeyRef {
            name: "gone".to_string(),
            namespace: "ns".to_string(),
            key: "k".to_string(),
        };
        let err = read_secret_key(&kube, &gone).await.unwrap_err();
        assert!(matches!(
            err,
            SecretError::SecretNotFound { ref namespace, ref name, ref key }
                if namespace == "ns" && name == "gone" && key == "k"
        ));

        let broken = SecretKeyRef {
            name: "broken".to_string(),
            ..gone
        };
        let err = read_secret_key(&kube, &broken).await.unwrap_err();
        assert!(!err.is_missing());
        assert!(Error::from(err).is_retryable());
    }
}
