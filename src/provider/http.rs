//! HTTP Provider
//!
//! Talks to an extraction/transcription service over JSON HTTP. Errors are
//! classified by HTTP status so the queue can tell retryable failures
//! (429, 5xx) from terminal ones (auth, bad request).

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::{
    AnalysisProvider, EvidenceExtraction, EvidenceExtractionRequest, InsightSynthesis,
    InsightSynthesisRequest, ProviderConfig, TranscriptionProvider,
};
use crate::constants::network;
use crate::types::{ErrorClassifier, Result, TranscriptBundle, UpshotError};

const DEFAULT_API_BASE: &str = "http://localhost:8089";

const PROVIDER_NAME: &str = "http";

/// Shared client setup for both provider roles
struct HttpClient {
    client: reqwest::Client,
    base: Url,
    /// API key stored securely, never exposed in logs or debug output
    api_key: Option<SecretString>,
}

impl HttpClient {
    fn new(config: ProviderConfig) -> Result<Self> {
        let base_raw = config
            .api_base
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let base = Url::parse(&base_raw)
            .map_err(|e| UpshotError::Config(format!("Invalid provider base URL: {}", e)))?;

        let api_key = config
            .api_key
            .or_else(|| std::env::var("UPSHOT_PROVIDER_API_KEY").ok())
            .map(SecretString::from);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(network::CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                UpshotError::Config(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base,
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| UpshotError::Config(format!("Invalid endpoint path '{}': {}", path, e)))
    }

    async fn post_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp> {
        let url = self.endpoint(path)?;
        debug!(endpoint = %url, "Sending provider request");

        let mut builder = self.client.post(url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key.expose_secret()));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ErrorClassifier::classify(&e.to_string(), PROVIDER_NAME))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Provider request failed");
            return Err(
                ErrorClassifier::classify_http_status(status.as_u16(), &body, PROVIDER_NAME).into(),
            );
        }

        response
            .json()
            .await
            .map_err(|e| {
                ErrorClassifier::classify(
                    &format!("Failed to parse provider response: {}", e),
                    PROVIDER_NAME,
                )
                .into()
            })
    }
}

// =============================================================================
// Analysis
// =============================================================================

/// HTTP-backed evidence extraction and insight synthesis
pub struct HttpAnalysisProvider {
    http: HttpClient,
}

impl HttpAnalysisProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(config)?,
        })
    }
}

#[async_trait]
impl AnalysisProvider for HttpAnalysisProvider {
    async fn extract_evidence(
        &self,
        request: &EvidenceExtractionRequest,
    ) -> Result<EvidenceExtraction> {
        self.http.post_json("/v1/extract-evidence", request).await
    }

    async fn synthesize_insights(
        &self,
        request: &InsightSynthesisRequest,
    ) -> Result<InsightSynthesis> {
        self.http.post_json("/v1/synthesize-insights", request).await
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn health_check(&self) -> Result<bool> {
        let url = self.http.endpoint("/v1/health")?;
        match self.http.client.get(url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(e) => {
                warn!("Provider health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

// =============================================================================
// Transcription
// =============================================================================

#[derive(Serialize)]
struct TranscribeRequest<'a> {
    media_ref: &'a str,
}

/// HTTP-backed transcription
pub struct HttpTranscriptionProvider {
    http: HttpClient,
}

impl HttpTranscriptionProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(config)?,
        })
    }
}

#[async_trait]
impl TranscriptionProvider for HttpTranscriptionProvider {
    async fn transcribe(&self, media_ref: &str) -> Result<TranscriptBundle> {
        self.http
            .post_json("/v1/transcribe", &TranscribeRequest { media_ref })
            .await
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_base_url() {
        let config = ProviderConfig {
            api_base: Some("not a url".to_string()),
            ..Default::default()
        };
        assert!(HttpAnalysisProvider::new(config).is_err());
    }

    #[test]
    fn test_endpoint_join() {
        let config = ProviderConfig {
            api_base: Some("https://analysis.example.com".to_string()),
            ..Default::default()
        };
        let provider = HttpAnalysisProvider::new(config).unwrap();
        let url = provider.http.endpoint("/v1/extract-evidence").unwrap();
        assert_eq!(url.as_str(), "https://analysis.example.com/v1/extract-evidence");
    }
}
