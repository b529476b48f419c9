//! Composition root: wires the backend, stores, and AI provider together.

use std::path::Path;
use std::sync::Arc;

use engram_ai::openai::OpenAiProvider;
use engram_ai::{AiConfig, Provider};
use engram_core::Result;
use engram_ingest::{Pipeline, PipelineConfig};
use engram_search::Searcher;
use engram_store::{Backend, ChatStore, CheckpointStore, ConceptStore};

/// Options for opening a [`Database`].
#[derive(Default)]
pub struct DatabaseOptions {
    /// Configuration for the default OpenAI-compatible provider. Ignored
    /// when `provider` is set.
    pub ai_config: AiConfig,
    /// Inject a custom provider instead of building one from `ai_config`.
    /// Tests use this to run against in-process doubles.
    pub provider: Option<Arc<dyn Provider>>,
    /// Keep the whole database in memory. For tests and scratch work.
    pub in_memory: bool,
}

impl DatabaseOptions {
    pub fn with_ai_config(mut self, config: AiConfig) -> Self {
        self.ai_config = config;
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }
}

/// One open engram database: the storage backend, the three stores over it,
/// and the AI provider shared by pipelines and searchers.
pub struct Database {
    backend: Backend,
    chat: Arc<ChatStore>,
    concepts: Arc<ConceptStore>,
    checkpoints: Arc<CheckpointStore>,
    provider: Arc<dyn Provider>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open the database at `path` (a directory owned by the backend).
    /// On any wiring failure everything opened so far is closed again, in
    /// reverse order.
    pub fn open(path: impl AsRef<Path>, options: DatabaseOptions) -> Result<Database> {
        let backend = Backend::open(path, options.in_memory)?;

        let chat = match ChatStore::new(&backend) {
            Ok(chat) => Arc::new(chat),
            Err(err) => {
                backend.close();
                return Err(err);
            }
        };
        let concepts = Arc::new(ConceptStore::new(&backend));
        let checkpoints = Arc::new(CheckpointStore::new(&backend));

        let provider: Arc<dyn Provider> = match options.provider {
            Some(provider) => provider,
            None => match OpenAiProvider::new(options.ai_config) {
                Ok(provider) => Arc::new(provider),
                Err(err) => {
                    let _ = chat.close();
                    backend.close();
                    return Err(err);
                }
            },
        };

        Ok(Database {
            backend,
            chat,
            concepts,
            checkpoints,
            provider,
        })
    }

    /// Close the stores, then the backend. Errors from store shutdown are
    /// returned after the backend is closed regardless.
    pub fn close(&self) -> Result<()> {
        let concepts = self.concepts.close();
        let chat = self.chat.close();
        self.backend.close();
        concepts.and(chat)
    }

    pub fn chat_store(&self) -> Arc<ChatStore> {
        Arc::clone(&self.chat)
    }

    pub fn concept_store(&self) -> Arc<ConceptStore> {
        Arc::clone(&self.concepts)
    }

    pub fn checkpoint_store(&self) -> Arc<CheckpointStore> {
        Arc::clone(&self.checkpoints)
    }

    pub fn provider(&self) -> Arc<dyn Provider> {
        Arc::clone(&self.provider)
    }

    /// Build an ingestion pipeline over this database. Runs the recovery
    /// pass before returning; see [`Pipeline`].
    pub async fn pipeline(&self, config: PipelineConfig) -> Result<Pipeline> {
        Pipeline::builder()
            .chat_store(Arc::clone(&self.chat))
            .concept_store(Arc::clone(&self.concepts))
            .checkpoint_store(Arc::clone(&self.checkpoints))
            .provider(Arc::clone(&self.provider))
            .config(config)
            .build()
            .await
    }

    /// Build a searcher over this database.
    pub fn searcher(&self) -> Searcher {
        Searcher::new(
            Arc::clone(&self.chat),
            Arc::clone(&self.concepts),
            &*self.provider,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use engram_ai::mock::MockProvider;
    use engram_core::ErrorKind;

    fn memory_database() -> Database {
        Database::open(
            "",
            DatabaseOptions::default()
                .with_provider(Arc::new(MockProvider::new()))
                .in_memory(),
        )
        .unwrap()
    }

    #[test]
    fn test_open_and_close() {
        let db = memory_database();
        db.close().unwrap();
        // The backend refuses work after close.
        let err = db.chat_store().get(engram_core::Id(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Closed);
    }

    #[test]
    fn test_open_rejects_invalid_ai_config() {
        let options = DatabaseOptions::default()
            .with_ai_config(AiConfig::default().with_embedding_model(""));
        let dir = tempfile::TempDir::new().unwrap();
        let err = Database::open(dir.path(), options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_persistent_database_reopens() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let db = Database::open(
                dir.path(),
                DatabaseOptions::default().with_provider(Arc::new(MockProvider::new())),
            )
            .unwrap();
            db.chat_store()
                .add(vec![engram_core::ChatRecord::new(
                    engram_core::Speaker::Human,
                    "durable",
                    chrono::Utc::now(),
                )])
                .unwrap();
            db.close().unwrap();
        }
        let db = Database::open(
            dir.path(),
            DatabaseOptions::default().with_provider(Arc::new(MockProvider::new())),
        )
        .unwrap();
        let records = db.chat_store().after_id(engram_core::Id::ZERO).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].contents, "durable");
        db.close().unwrap();
    }
}
