//! Environment variable names for secret-backed values
//!
//! The renderer writes `${NAME}` and the secret projector stores the value
//! under `NAME`, so both sides must use [`env_var_name`].

use telemetry_common::crd::SecretKeyRef;

/// Encode `prefix_namespace_name_key` as an env-var name: uppercased with
/// `.` and `-` mapped to `_`.
pub fn env_var_name(prefix: &str, namespace: &str, name: &str, key: &str) -> String {
    [prefix, namespace, name, key]
        .join("_")
        .chars()
        .map(|c| match c {
            '.' | '-' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

/// Env-var name for a secret reference used by `pipeline`
pub fn secret_ref_env_var(pipeline: &str, secret_ref: &SecretKeyRef) -> String {
    env_var_name(
        pipeline,
        &secret_ref.namespace,
        &secret_ref.name,
        &secret_ref.key,
    )
}

/// `${NAME}` placeholder for Fluent Bit substitution
pub fn placeholder(name: &str) -> String {
    format!("${{{}}}", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_secret_coordinates() {
        assert_eq!(
            env_var_name("foo", "my-namespace", "secret", "key"),
            "FOO_MY_NAMESPACE_SECRET_KEY"
        );
        assert_eq!(
            env_var_name("pipeline", "test-namespace", "test-name", "test-key"),
            "PIPELINE_TEST_NAMESPACE_TEST_NAME_TEST_KEY"
        );
    }

    #[test]
    fn dots_and_dashes_become_underscores() {
        assert_eq!(
            env_var_name("a.b-c", "ns-1", "tls.crt", "ca.pem"),
            "A_B_C_NS_1_TLS_CRT_CA_PEM"
        );
    }

    #[test]
    fn encoding_is_stable_for_mixed_input() {
        let cases = [
            ("p", "n", "s", "k"),
            ("Pipe-1", "kyma.system", "Creds", "pass-word"),
            ("x9", "0-0", "a.b.c", "Z"),
        ];
        for (p, n, s, k) in cases {
            let encoded = env_var_name(p, n, s, k);
            let expected = format!("{p}_{n}_{s}_{k}")
                .to_uppercase()
                .replace(['.', '-'], "_");
            assert_eq!(encoded, expected);
            assert_eq!(encoded, env_var_name(p, n, s, k));
        }
    }

    #[test]
    fn placeholder_wraps_name() {
        let r = SecretKeyRef {
            name: "secret".into(),
            namespace: "my-namespace".into(),
            key: "key".into(),
        };
        assert_eq!(
            placeholder(&secret_ref_env_var("foo", &r)),
            "${FOO_MY_NAMESPACE_SECRET_KEY}"
        );
    }
}
