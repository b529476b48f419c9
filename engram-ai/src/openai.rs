//! OpenAI-compatible provider.
//!
//! Works against any server exposing the `/v1/embeddings` and
//! `/v1/chat/completions` endpoints (Ollama, LocalAI, vLLM, the hosted
//! APIs). The extractor drives the classifier model in JSON mode with a
//! schema-bearing prompt and repairs the common failure modes locally:
//! markdown code fences around the object and occasional non-JSON output,
//! retried up to three times.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use engram_core::{Error, Result};

use crate::{AiConfig, ConceptExtractor, Embedder, ExtractedConcept, Provider, CONCEPT_TYPES};

/// Parse retries for malformed classifier output.
const EXTRACT_PARSE_ATTEMPTS: usize = 3;

/// Provider wiring an HTTP embedder and extractor to one configuration.
pub struct OpenAiProvider {
    embedder: Arc<HttpEmbedder>,
    extractor: Arc<HttpExtractor>,
}

impl OpenAiProvider {
    /// Validate the configuration and build both services. The services
    /// share one connection pool.
    pub fn new(mut config: AiConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::new();
        Ok(OpenAiProvider {
            embedder: Arc::new(HttpEmbedder {
                client: client.clone(),
                host: config.embedding_host.clone(),
                model: config.embedding_model.clone(),
            }),
            extractor: Arc::new(HttpExtractor {
                client,
                host: config.classifier_host,
                model: config.classifier_model,
                min_importance: config.min_importance,
            }),
        })
    }
}

impl Provider for OpenAiProvider {
    fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder) as Arc<dyn Embedder>
    }

    fn extractor(&self) -> Arc<dyn ConceptExtractor> {
        Arc::clone(&self.extractor) as Arc<dyn ConceptExtractor>
    }
}

struct HttpEmbedder {
    client: reqwest::Client,
    host: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    async fn request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.host))
            .json(&serde_json::json!({
                "model": self.model,
                "input": inputs,
            }))
            .send()
            .await
            .map_err(Error::external)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::external(format!(
                "embedding request failed with status {}: {}",
                status.as_u16(),
                body.chars().take(240).collect::<String>()
            )));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(Error::external)?;
        if parsed.data.len() != inputs.len() {
            return Err(Error::ResultMismatch {
                expected: inputs.len(),
                received: parsed.data.len(),
            });
        }
        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.request(&texts).await?;
        vectors.pop().ok_or(Error::ResultMismatch {
            expected: 1,
            received: 0,
        })
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}

struct HttpExtractor {
    client: reqwest::Client,
    host: String,
    model: String,
    min_importance: u8,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct Analysis {
    core_concepts: Vec<RawConcept>,
}

#[derive(Deserialize)]
struct RawConcept {
    concept: String,
    #[serde(rename = "type")]
    concept_type: String,
    importance: i64,
}

impl HttpExtractor {
    async fn complete(&self, text: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.host))
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": classification_prompt()},
                    {"role": "user", "content": text},
                ],
                "temperature": 0.0,
                "response_format": {"type": "json_object"},
            }))
            .send()
            .await
            .map_err(Error::external)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::external(format!(
                "classification request failed with status {}: {}",
                status.as_u16(),
                body.chars().take(240).collect::<String>()
            )));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(Error::external)?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::external("classifier returned no choices"))?;
        Ok(choice.message.content)
    }
}

#[async_trait]
impl ConceptExtractor for HttpExtractor {
    async fn extract(&self, text: &str) -> Result<Vec<ExtractedConcept>> {
        let mut last_err = Error::external("classifier produced no parsable output");
        for attempt in 1..=EXTRACT_PARSE_ATTEMPTS {
            let content = self.complete(text).await?;
            let cleaned = strip_code_fences(&content);
            match serde_json::from_str::<Analysis>(cleaned) {
                Ok(analysis) => {
                    return Ok(filter_concepts(analysis.core_concepts, self.min_importance));
                }
                Err(err) => {
                    tracing::warn!(
                        component = "openai-extractor",
                        attempt,
                        response = cleaned,
                        error = %err,
                        "error parsing classifier response"
                    );
                    last_err = Error::external(format!(
                        "classifier response did not parse after {attempt} attempts: {err}"
                    ));
                }
            }
        }
        Err(last_err)
    }
}

/// Drop a surrounding markdown code fence, if the model added one.
fn strip_code_fences(text: &str) -> &str {
    let mut cleaned = text.trim();
    cleaned = cleaned.strip_prefix("```json").unwrap_or(cleaned);
    cleaned = cleaned.strip_prefix("```").unwrap_or(cleaned);
    cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned);
    cleaned.trim()
}

/// Apply the importance floor, sort by importance descending, and normalize
/// type tags (spaces become underscores so "abstract concept" and
/// "abstract_concept" produce the same concept id).
fn filter_concepts(raw: Vec<RawConcept>, min_importance: u8) -> Vec<ExtractedConcept> {
    let mut extracted: Vec<ExtractedConcept> = raw
        .into_iter()
        .filter_map(|c| {
            let importance = u8::try_from(c.importance).ok()?;
            if !(1..=10).contains(&importance) || importance < min_importance {
                return None;
            }
            Some(ExtractedConcept {
                name: c.concept,
                concept_type: c.concept_type.replace(' ', "_"),
                importance,
            })
        })
        .collect();
    extracted.sort_by(|a, b| b.importance.cmp(&a.importance));
    extracted
}

/// System prompt driving the classifier model.
fn classification_prompt() -> String {
    format!(
        r#"Extract the most important concepts from the given text and return them as JSON.

Output ONLY a valid JSON object of the form:
{{"core_concepts": [{{"concept": "...", "type": "...", "importance": N}}]}}

Start your response with the opening brace and end with the closing brace.
Do not include any preamble, explanation, or markdown.

Rules:
- Concept names must be lowercase, 1-3 words, singular form only.
- The type field must be exactly one of: {types}.
- Importance is an integer from 1 (least relevant) to 10 (most central).
- Include only concepts explicitly mentioned or clearly implied by the text.
- If no concepts can be identified, return {{"core_concepts": []}}.

Example:
Input: "The Eiffel Tower is a famous landmark in Paris."
Output:
{{"core_concepts": [
  {{"concept": "eiffel tower", "type": "building", "importance": 9}},
  {{"concept": "paris", "type": "place", "importance": 8}}
]}}"#,
        types = CONCEPT_TYPES.join(", ")
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn test_filter_concepts_applies_floor_and_sort() {
        let raw = vec![
            RawConcept {
                concept: "dog".to_string(),
                concept_type: "animal".to_string(),
                importance: 6,
            },
            RawConcept {
                concept: "weather".to_string(),
                concept_type: "abstract concept".to_string(),
                importance: 9,
            },
            RawConcept {
                concept: "mud".to_string(),
                concept_type: "natural_object".to_string(),
                importance: 3,
            },
        ];
        let filtered = filter_concepts(raw, 6);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].name, "weather");
        assert_eq!(filtered[0].concept_type, "abstract_concept");
        assert_eq!(filtered[1].name, "dog");
    }

    #[test]
    fn test_filter_concepts_drops_out_of_range_importance() {
        let raw = vec![
            RawConcept {
                concept: "x".to_string(),
                concept_type: "place".to_string(),
                importance: 0,
            },
            RawConcept {
                concept: "y".to_string(),
                concept_type: "place".to_string(),
                importance: 42,
            },
        ];
        assert!(filter_concepts(raw, 1).is_empty());
    }

    #[test]
    fn test_prompt_names_every_type() {
        let prompt = classification_prompt();
        for tag in CONCEPT_TYPES {
            assert!(prompt.contains(tag), "prompt missing type {tag}");
        }
    }

    #[test]
    fn test_provider_rejects_invalid_config() {
        let config = AiConfig::default().with_classifier_model("");
        assert!(OpenAiProvider::new(config).is_err());
    }
}
