// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decryption of a KMS encrypted API key.

use crate::constants::{ENCRYPTION_CONTEXT_KEY, FUNCTION_NAME_ENV_VAR};
use crate::errors::MetricsError;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_kms::error::DisplayErrorContext;
use aws_sdk_kms::primitives::Blob;
use base64::Engine;
use std::env;
use std::fmt::Debug;
use tokio::sync::OnceCell;
use tracing::debug;

/// Turns ciphertext into a plaintext credential with a remote call.
#[async_trait]
pub trait Decrypter: Send + Sync + Debug {
    async fn decrypt(&self, ciphertext: &str) -> Result<String, MetricsError>;
}

/// Decrypts base64 ciphertext with AWS KMS.
///
/// Keys encrypted from the Lambda console are bound to an encryption context naming
/// the function, so that context is tried first and a context-free decrypt second.
#[derive(Debug, Default)]
pub struct KmsDecrypter {
    client: OnceCell<aws_sdk_kms::Client>,
    function_name: Option<String>,
}

impl KmsDecrypter {
    pub fn new() -> Self {
        Self {
            client: OnceCell::new(),
            function_name: env::var(FUNCTION_NAME_ENV_VAR)
                .ok()
                .filter(|name| !name.is_empty()),
        }
    }

    pub fn with_client(client: aws_sdk_kms::Client, function_name: Option<String>) -> Self {
        Self {
            client: OnceCell::new_with(Some(client)),
            function_name,
        }
    }

    async fn client(&self) -> &aws_sdk_kms::Client {
        self.client
            .get_or_init(|| async {
                let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
                aws_sdk_kms::Client::new(&config)
            })
            .await
    }

    async fn decrypt_blob(
        &self,
        ciphertext: Vec<u8>,
        function_name: Option<&str>,
    ) -> Result<Vec<u8>, String> {
        let mut request = self
            .client()
            .await
            .decrypt()
            .ciphertext_blob(Blob::new(ciphertext));
        if let Some(function_name) = function_name {
            request = request.encryption_context(ENCRYPTION_CONTEXT_KEY, function_name);
        }

        let output = request
            .send()
            .await
            .map_err(|e| DisplayErrorContext(e).to_string())?;

        output
            .plaintext()
            .map(|plaintext| plaintext.as_ref().to_vec())
            .ok_or_else(|| "KMS response carried no plaintext".to_string())
    }
}

#[async_trait]
impl Decrypter for KmsDecrypter {
    async fn decrypt(&self, ciphertext: &str) -> Result<String, MetricsError> {
        let blob = decode_ciphertext(ciphertext)?;

        let plaintext = match self.function_name.as_deref() {
            Some(function_name) => {
                match self.decrypt_blob(blob.clone(), Some(function_name)).await {
                    Ok(plaintext) => plaintext,
                    Err(e) => {
                        debug!("KMS decrypt with encryption context failed, retrying without it: {e}");
                        self.decrypt_blob(blob, None)
                            .await
                            .map_err(MetricsError::DecryptionFailed)?
                    }
                }
            }
            None => self
                .decrypt_blob(blob, None)
                .await
                .map_err(MetricsError::DecryptionFailed)?,
        };

        String::from_utf8(plaintext).map_err(|e| {
            MetricsError::DecryptionFailed(format!("plaintext is not valid UTF-8: {e}"))
        })
    }
}

pub(crate) fn decode_ciphertext(ciphertext: &str) -> Result<Vec<u8>, MetricsError> {
    base64::engine::general_purpose::STANDARD
        .decode(ciphertext.trim())
        .map_err(|e| MetricsError::DecryptionFailed(format!("ciphertext is not valid base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_kms::operation::decrypt::{DecryptError, DecryptOutput};
    use aws_sdk_kms::types::error::InvalidCiphertextException;
    use aws_smithy_mocks::{mock, mock_client, RuleMode};

    #[test]
    fn test_decode_ciphertext() {
        assert_eq!(decode_ciphertext("c2VjcmV0").unwrap(), b"secret".to_vec());
        assert_eq!(decode_ciphertext(" c2VjcmV0\n").unwrap(), b"secret".to_vec());
    }

    #[test]
    fn test_decode_ciphertext_invalid() {
        assert!(matches!(
            decode_ciphertext("not base64!"),
            Err(MetricsError::DecryptionFailed(_))
        ));
    }

    fn decrypt_output(plaintext: &str) -> DecryptOutput {
        DecryptOutput::builder()
            .plaintext(Blob::new(plaintext.as_bytes().to_vec()))
            .build()
    }

    fn invalid_ciphertext() -> DecryptError {
        DecryptError::InvalidCiphertextException(
            InvalidCiphertextException::builder()
                .message("ciphertext does not match the context")
                .build(),
        )
    }

    #[tokio::test]
    async fn test_decrypt_with_encryption_context() {
        let with_context = mock!(aws_sdk_kms::Client::decrypt)
            .match_requests(|req| {
                req.encryption_context()
                    .and_then(|context| context.get(ENCRYPTION_CONTEXT_KEY))
                    .map(String::as_str)
                    == Some("my-function")
            })
            .then_output(|| decrypt_output("api-key"));
        let without_context = mock!(aws_sdk_kms::Client::decrypt)
            .match_requests(|req| req.encryption_context().is_none())
            .then_output(|| decrypt_output("wrong-key"));
        let client = mock_client!(
            aws_sdk_kms,
            RuleMode::MatchAny,
            [&with_context, &without_context]
        );
        let decrypter = KmsDecrypter::with_client(client, Some("my-function".to_string()));

        assert_eq!(decrypter.decrypt("c2VjcmV0").await.unwrap(), "api-key");
        assert_eq!(with_context.num_calls(), 1);
        assert_eq!(without_context.num_calls(), 0);
    }

    #[tokio::test]
    async fn test_decrypt_falls_back_to_no_encryption_context() {
        let with_context = mock!(aws_sdk_kms::Client::decrypt)
            .match_requests(|req| req.encryption_context().is_some())
            .then_error(invalid_ciphertext);
        let without_context = mock!(aws_sdk_kms::Client::decrypt)
            .match_requests(|req| req.encryption_context().is_none())
            .then_output(|| decrypt_output("api-key"));
        let client = mock_client!(
            aws_sdk_kms,
            RuleMode::MatchAny,
            [&with_context, &without_context]
        );
        let decrypter = KmsDecrypter::with_client(client, Some("my-function".to_string()));

        assert_eq!(decrypter.decrypt("c2VjcmV0").await.unwrap(), "api-key");
        assert_eq!(with_context.num_calls(), 1);
        assert_eq!(without_context.num_calls(), 1);
    }

    #[tokio::test]
    async fn test_decrypt_fails_when_both_attempts_fail() {
        let with_context = mock!(aws_sdk_kms::Client::decrypt)
            .match_requests(|req| req.encryption_context().is_some())
            .then_error(invalid_ciphertext);
        let without_context = mock!(aws_sdk_kms::Client::decrypt)
            .match_requests(|req| req.encryption_context().is_none())
            .then_error(invalid_ciphertext);
        let client = mock_client!(
            aws_sdk_kms,
            RuleMode::MatchAny,
            [&with_context, &without_context]
        );
        let decrypter = KmsDecrypter::with_client(client, Some("my-function".to_string()));

        let result = decrypter.decrypt("c2VjcmV0").await;

        assert!(matches!(result, Err(MetricsError::DecryptionFailed(_))));
        assert_eq!(with_context.num_calls(), 1);
        assert_eq!(without_context.num_calls(), 1);
    }

    #[tokio::test]
    async fn test_decrypt_without_function_name_skips_context() {
        let with_context = mock!(aws_sdk_kms::Client::decrypt)
            .match_requests(|req| req.encryption_context().is_some())
            .then_output(|| decrypt_output("wrong-key"));
        let without_context = mock!(aws_sdk_kms::Client::decrypt)
            .match_requests(|req| req.encryption_context().is_none())
            .then_output(|| decrypt_output("api-key"));
        let client = mock_client!(
            aws_sdk_kms,
            RuleMode::MatchAny,
            [&with_context, &without_context]
        );
        let decrypter = KmsDecrypter::with_client(client, None);

        assert_eq!(decrypter.decrypt("c2VjcmV0").await.unwrap(), "api-key");
        assert_eq!(with_context.num_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_ciphertext_fails_before_remote_call() {
        let decrypter = KmsDecrypter::default();
        let result = decrypter.decrypt("%%%").await;
        assert!(matches!(result, Err(MetricsError::DecryptionFailed(_))));
        assert!(decrypter.client.get().is_none());
    }
}
