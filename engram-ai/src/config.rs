//! Provider configuration.

use engram_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Configuration shared by the embedder and the concept extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiConfig {
    /// Base URL for the embedding service API.
    pub embedding_host: String,
    /// Base URL for the classification service API.
    pub classifier_host: String,
    /// Model identifier for text embeddings.
    pub embedding_model: String,
    /// Model identifier for concept extraction.
    pub classifier_model: String,
    /// Minimum importance (1-10) an extracted concept must reach; lower
    /// scores are filtered by the provider before the engine sees them.
    pub min_importance: u8,
}

impl Default for AiConfig {
    /// Defaults targeting a local OpenAI-compatible server, with both
    /// services on the same host.
    fn default() -> Self {
        let host = "http://localhost:11434/v1".to_string();
        AiConfig {
            embedding_host: host.clone(),
            classifier_host: host,
            embedding_model: "embeddinggemma".to_string(),
            classifier_model: "qwen2.5:3b".to_string(),
            min_importance: 6,
        }
    }
}

impl AiConfig {
    /// Set both hosts to the same URL.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        let host = host.into();
        self.embedding_host = host.clone();
        self.classifier_host = host;
        self
    }

    pub fn with_embedding_host(mut self, host: impl Into<String>) -> Self {
        self.embedding_host = host.into();
        self
    }

    pub fn with_classifier_host(mut self, host: impl Into<String>) -> Self {
        self.classifier_host = host.into();
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn with_classifier_model(mut self, model: impl Into<String>) -> Self {
        self.classifier_model = model.into();
        self
    }

    pub fn with_min_importance(mut self, min: u8) -> Self {
        self.min_importance = min;
        self
    }

    /// Bring the configuration to canonical form: both hosts end with `/v1`
    /// (required by OpenAI-compatible APIs), with any trailing slash stripped
    /// before the suffix is appended.
    pub fn normalize(&mut self) {
        normalize_host(&mut self.embedding_host);
        normalize_host(&mut self.classifier_host);
    }

    /// Normalize, then check the configuration is complete.
    pub fn validate(&mut self) -> Result<()> {
        self.normalize();
        if self.embedding_host.is_empty() {
            return Err(Error::validation("ai config: embedding_host is required"));
        }
        if self.classifier_host.is_empty() {
            return Err(Error::validation("ai config: classifier_host is required"));
        }
        if self.embedding_model.is_empty() {
            return Err(Error::validation("ai config: embedding_model is required"));
        }
        if self.classifier_model.is_empty() {
            return Err(Error::validation("ai config: classifier_model is required"));
        }
        if !(1..=10).contains(&self.min_importance) {
            return Err(Error::validation(
                "ai config: min_importance must be between 1 and 10",
            ));
        }
        Ok(())
    }
}

fn normalize_host(host: &mut String) {
    if host.is_empty() || host.ends_with("/v1") {
        return;
    }
    let trimmed = host.trim_end_matches('/');
    *host = format!("{trimmed}/v1");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use engram_core::ErrorKind;

    #[test]
    fn test_normalize_appends_v1() {
        let mut config = AiConfig::default().with_host("http://localhost:9100");
        config.normalize();
        assert_eq!(config.embedding_host, "http://localhost:9100/v1");
        assert_eq!(config.classifier_host, "http://localhost:9100/v1");
    }

    #[test]
    fn test_normalize_strips_trailing_slash() {
        let mut config = AiConfig::default().with_embedding_host("http://localhost:9100/");
        config.normalize();
        assert_eq!(config.embedding_host, "http://localhost:9100/v1");
    }

    #[test]
    fn test_normalize_idempotent() {
        let mut config = AiConfig::default();
        config.normalize();
        let first = config.clone();
        config.normalize();
        assert_eq!(config, first);
    }

    #[test]
    fn test_validate_rejects_missing_model() {
        let mut config = AiConfig::default().with_embedding_model("");
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_validate_rejects_bad_min_importance() {
        let mut config = AiConfig::default().with_min_importance(0);
        assert!(config.validate().is_err());
        let mut config = AiConfig::default().with_min_importance(11);
        assert!(config.validate().is_err());
        let mut config = AiConfig::default().with_min_importance(10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_different_hosts_for_each_service() {
        let mut config = AiConfig::default()
            .with_embedding_host("http://embed:8000")
            .with_classifier_host("http://classify:8001");
        config.validate().unwrap();
        assert_eq!(config.embedding_host, "http://embed:8000/v1");
        assert_eq!(config.classifier_host, "http://classify:8001/v1");
    }
}
