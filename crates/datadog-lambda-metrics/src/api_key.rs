// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::MetricsError;
use crate::kms::Decrypter;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error};

/// Source of the API key attached to every metrics submission.
///
/// An encrypted key is decrypted on first use and the outcome, success or failure,
/// is kept for the lifetime of the factory. Concurrent first callers wait on the same
/// decryption instead of racing their own.
#[derive(Clone)]
pub enum ApiKeyFactory {
    Static(String),
    Encrypted {
        ciphertext: String,
        decrypter: Arc<dyn Decrypter>,
        api_key: Arc<OnceCell<Result<String, MetricsError>>>,
    },
    Missing,
}

impl ApiKeyFactory {
    pub fn new_from_static_key(api_key: &str) -> Self {
        Self::Static(api_key.to_string())
    }

    pub fn new_from_encrypted_key(ciphertext: &str, decrypter: Arc<dyn Decrypter>) -> Self {
        Self::Encrypted {
            ciphertext: ciphertext.to_string(),
            decrypter,
            api_key: Arc::new(OnceCell::new()),
        }
    }

    /// Picks the plaintext key when both are configured.
    pub fn from_keys(
        api_key: Option<&str>,
        kms_api_key: Option<&str>,
        decrypter: Arc<dyn Decrypter>,
    ) -> Self {
        match (
            api_key.filter(|key| !key.is_empty()),
            kms_api_key.filter(|key| !key.is_empty()),
        ) {
            (Some(api_key), _) => Self::new_from_static_key(api_key),
            (None, Some(ciphertext)) => Self::new_from_encrypted_key(ciphertext, decrypter),
            (None, None) => Self::Missing,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub async fn get_api_key(&self) -> Result<&str, MetricsError> {
        match self {
            Self::Static(api_key) => Ok(api_key),
            Self::Encrypted {
                ciphertext,
                decrypter,
                api_key,
            } => api_key
                .get_or_init(|| async {
                    debug!("Decrypting KMS API key");
                    let decrypted = decrypter.decrypt(ciphertext).await;
                    if let Err(e) = &decrypted {
                        error!("{e}. Metrics will not be delivered until the API key is fixed");
                    }
                    decrypted
                })
                .await
                .as_deref()
                .map_err(Clone::clone),
            Self::Missing => Err(MetricsError::ConfigurationMissing),
        }
    }
}

impl Debug for ApiKeyFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKeyFactory")
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingDecrypter {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Decrypter for CountingDecrypter {
        async fn decrypt(&self, ciphertext: &str) -> Result<String, MetricsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail {
                Err(MetricsError::DecryptionFailed("AccessDenied".to_string()))
            } else {
                Ok(format!("plain-{ciphertext}"))
            }
        }
    }

    #[tokio::test]
    async fn new_from_static_key() {
        let api_key_factory = ApiKeyFactory::new_from_static_key("mock-api-key");
        assert_eq!(api_key_factory.get_api_key().await, Ok("mock-api-key"));
    }

    #[tokio::test]
    async fn encrypted_key_is_decrypted_once() {
        let decrypter = Arc::new(CountingDecrypter::default());
        let api_key_factory = ApiKeyFactory::new_from_encrypted_key("cipher", decrypter.clone());

        assert_eq!(api_key_factory.get_api_key().await, Ok("plain-cipher"));
        assert_eq!(api_key_factory.get_api_key().await, Ok("plain-cipher"));

        // clones share the cache
        let cloned = api_key_factory.clone();
        assert_eq!(cloned.get_api_key().await, Ok("plain-cipher"));

        assert_eq!(decrypter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_first_use_decrypts_once() {
        let decrypter = Arc::new(CountingDecrypter::default());
        let api_key_factory = Arc::new(ApiKeyFactory::new_from_encrypted_key(
            "cipher",
            decrypter.clone(),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let factory = Arc::clone(&api_key_factory);
            handles.push(tokio::spawn(async move {
                factory.get_api_key().await.map(str::to_string)
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok("plain-cipher".to_string()));
        }
        assert_eq!(decrypter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn decryption_failure_is_cached() {
        let decrypter = Arc::new(CountingDecrypter {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let api_key_factory = ApiKeyFactory::new_from_encrypted_key("cipher", decrypter.clone());

        for _ in 0..3 {
            assert!(matches!(
                api_key_factory.get_api_key().await,
                Err(MetricsError::DecryptionFailed(_))
            ));
        }
        assert_eq!(decrypter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn from_keys_prefers_plaintext() {
        let decrypter = Arc::new(CountingDecrypter::default());

        let factory = ApiKeyFactory::from_keys(Some("plain"), Some("cipher"), decrypter.clone());
        assert_eq!(factory.get_api_key().await, Ok("plain"));

        let factory = ApiKeyFactory::from_keys(Some(""), Some("cipher"), decrypter.clone());
        assert_eq!(factory.get_api_key().await, Ok("plain-cipher"));

        let factory = ApiKeyFactory::from_keys(None, Some(""), decrypter);
        assert!(factory.is_missing());
        assert_eq!(
            factory.get_api_key().await,
            Err(MetricsError::ConfigurationMissing)
        );
    }
}
