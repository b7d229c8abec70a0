//! Provider credentials: one capability, two backings.
//!
//! - `StaticApiKey`: key taken from configuration.
//! - `MetadataServerCredentials`: ambient OAuth token from the cloud metadata
//!   server, cached until shortly before it expires.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::RecaptchaConfig;
use crate::error::TransportError;

/// Tokens are refreshed this long before the server says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// A credential the provider client can attach to a request.
#[derive(Debug, Clone)]
pub enum ProviderCredential {
    /// Sent as the `key` query parameter.
    ApiKey(SecretString),
    /// Sent as `Authorization: Bearer`.
    Bearer(SecretString),
}

/// Obtain a credential for the risk-assessment provider.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self) -> Result<ProviderCredential, TransportError>;
}

/// Static API key from configuration.
pub struct StaticApiKey {
    key: SecretString,
}

impl StaticApiKey {
    pub fn new(key: SecretString) -> Self {
        Self { key }
    }
}

#[async_trait]
impl CredentialProvider for StaticApiKey {
    async fn credential(&self) -> Result<ProviderCredential, TransportError> {
        Ok(ProviderCredential::ApiKey(self.key.clone()))
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    token: SecretString,
    refresh_at: DateTime<Utc>,
}

/// Ambient credentials from the metadata server of the hosting instance.
pub struct MetadataServerCredentials {
    client: reqwest::Client,
    host: String,
    cached: RwLock<Option<CachedToken>>,
}

impl MetadataServerCredentials {
    pub fn new(client: reqwest::Client, host: impl Into<String>) -> Self {
        Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            cached: RwLock::new(None),
        }
    }

    fn token_url(&self) -> String {
        format!(
            "{}/computeMetadata/v1/instance/service-accounts/default/token",
            self.host
        )
    }

    async fn fetch(&self) -> Result<TokenResponse, TransportError> {
        let url = self.token_url();
        let resp = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| TransportError::Credential(format!("{url}: {e}")))?;

        if !resp.status().is_success() {
            return Err(TransportError::Credential(format!(
                "metadata server returned HTTP {}",
                resp.status().as_u16()
            )));
        }

        resp.json::<TokenResponse>()
            .await
            .map_err(|e| TransportError::Credential(format!("Invalid token response: {e}")))
    }
}

#[async_trait]
impl CredentialProvider for MetadataServerCredentials {
    async fn credential(&self) -> Result<ProviderCredential, TransportError> {
        {
            let cached = self.cached.read().await;
            if let Some(c) = cached.as_ref()
                && Utc::now() < c.refresh_at
            {
                return Ok(ProviderCredential::Bearer(c.token.clone()));
            }
        }

        let mut cached = self.cached.write().await;
        // Another task may have refreshed while we waited for the write lock
        if let Some(c) = cached.as_ref()
            && Utc::now() < c.refresh_at
        {
            return Ok(ProviderCredential::Bearer(c.token.clone()));
        }

        let fresh = self.fetch().await?;
        let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_MARGIN);
        let refresh_at = Utc::now()
            + chrono::Duration::from_std(lifetime).unwrap_or_else(|_| chrono::Duration::zero());
        let token = SecretString::from(fresh.access_token);
        debug!(expires_in = fresh.expires_in, "Fetched metadata server token");

        *cached = Some(CachedToken {
            token: token.clone(),
            refresh_at,
        });
        Ok(ProviderCredential::Bearer(token))
    }
}

/// Pick the credential backing from configuration.
pub fn credentials_from_config(
    config: &RecaptchaConfig,
    client: reqwest::Client,
) -> Arc<dyn CredentialProvider> {
    match &config.api_key {
        Some(key) => {
            info!("Using static API key credentials");
            Arc::new(StaticApiKey::new(key.clone()))
        }
        None => {
            info!(host = %config.metadata_host, "Using metadata server credentials");
            Arc::new(MetadataServerCredentials::new(
                client,
                config.metadata_host.clone(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{Json, Router, extract::State, http::HeaderMap, http::StatusCode, routing::get};
    use secrecy::ExposeSecret;
    use tokio::net::TcpListener;

    use super::*;

    async fn start_metadata_server(expires_in: u64) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/computeMetadata/v1/instance/service-accounts/default/token",
                get(
                    move |State(hits): State<Arc<AtomicUsize>>, headers: HeaderMap| async move {
                        if headers.get("Metadata-Flavor").map(|v| v.as_bytes()) != Some(b"Google".as_slice()) {
                            return Err(StatusCode::FORBIDDEN);
                        }
                        let n = hits.fetch_add(1, Ordering::SeqCst);
                        Ok(Json(serde_json::json!({
                            "access_token": format!("token-{n}"),
                            "expires_in": expires_in,
                            "token_type": "Bearer",
                        })))
                    },
                ),
            )
            .with_state(Arc::clone(&hits));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://127.0.0.1:{port}"), hits)
    }

    fn bearer(cred: ProviderCredential) -> String {
        match cred {
            ProviderCredential::Bearer(t) => t.expose_secret().to_string(),
            ProviderCredential::ApiKey(_) => panic!("expected bearer credential"),
        }
    }

    #[tokio::test]
    async fn static_key_is_returned_as_api_key() {
        let provider = StaticApiKey::new(SecretString::from("k-123"));
        match provider.credential().await.unwrap() {
            ProviderCredential::ApiKey(k) => assert_eq!(k.expose_secret(), "k-123"),
            ProviderCredential::Bearer(_) => panic!("expected api key"),
        }
    }

    #[tokio::test]
    async fn metadata_token_is_cached() {
        let (host, hits) = start_metadata_server(3600).await;
        let creds = MetadataServerCredentials::new(reqwest::Client::new(), host);

        let first = bearer(creds.credential().await.unwrap());
        let second = bearer(creds.credential().await.unwrap());

        assert_eq!(first, "token-0");
        assert_eq!(second, "token-0");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn short_lived_token_is_refetched() {
        // Lifetime below the expiry margin means every call refreshes
        let (host, hits) = start_metadata_server(30).await;
        let creds = MetadataServerCredentials::new(reqwest::Client::new(), host);

        let first = bearer(creds.credential().await.unwrap());
        let second = bearer(creds.credential().await.unwrap());

        assert_eq!(first, "token-0");
        assert_eq!(second, "token-1");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unreachable_metadata_server_is_credential_error() {
        let creds = MetadataServerCredentials::new(reqwest::Client::new(), "http://127.0.0.1:1");
        let err = creds.credential().await.unwrap_err();
        assert!(matches!(err, TransportError::Credential(_)));
    }
}
