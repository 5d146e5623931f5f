//! Cached list of assist pipelines configured on the server.
//!
//! The catalog is fetched on demand and held as an immutable snapshot. A
//! successful fetch swaps the snapshot wholesale; a failed one leaves the
//! previous snapshot in place.

use crate::codec;
use crate::error::CatalogError;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// One configured pipeline. Engine fields are absent when a stage is unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub conversation_engine: Option<String>,
    #[serde(default)]
    pub conversation_language: Option<String>,
    #[serde(default)]
    pub stt_engine: Option<String>,
    #[serde(default)]
    pub stt_language: Option<String>,
    #[serde(default)]
    pub tts_engine: Option<String>,
    #[serde(default)]
    pub tts_language: Option<String>,
    #[serde(default)]
    pub tts_voice: Option<String>,
    #[serde(default)]
    pub wake_word_entity: Option<String>,
    #[serde(default)]
    pub wake_word_id: Option<String>,
}

impl Pipeline {
    /// Whether the pipeline can take speech input.
    pub fn supports_audio(&self) -> bool {
        self.stt_engine.is_some()
    }

    /// Whether the pipeline can speak responses.
    pub fn supports_tts(&self) -> bool {
        self.tts_engine.is_some()
    }
}

/// Pipelines as of the last successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub preferred_pipeline: Option<String>,
    #[serde(default)]
    pub pipelines: Vec<Pipeline>,
}

impl CatalogSnapshot {
    pub fn preferred(&self) -> Option<&Pipeline> {
        let id = self.preferred_pipeline.as_deref()?;
        self.pipelines.iter().find(|p| p.id == id)
    }

    /// Find a pipeline by exact id, then by case-insensitive name.
    pub fn resolve(&self, name_or_id: &str) -> Option<&Pipeline> {
        self.pipelines
            .iter()
            .find(|p| p.id == name_or_id)
            .or_else(|| {
                self.pipelines
                    .iter()
                    .find(|p| p.name.eq_ignore_ascii_case(name_or_id))
            })
    }
}

pub struct PipelineCatalog {
    transport: Arc<dyn Transport>,
    snapshot: RwLock<Arc<CatalogSnapshot>>,
}

impl PipelineCatalog {
    /// Empty catalog; call [`fetch`](Self::fetch) to populate it.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            snapshot: RwLock::new(Arc::new(CatalogSnapshot::default())),
        }
    }

    /// Request the pipeline list and replace the cached snapshot.
    ///
    /// # Errors
    /// On transport failure or an undecodable response the cached snapshot
    /// is left untouched.
    pub async fn fetch(&self) -> Result<Arc<CatalogSnapshot>, CatalogError> {
        let response = self
            .transport
            .send(codec::encode_pipeline_list())
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "pipeline list request failed"))?;

        let fresh: CatalogSnapshot =
            serde_json::from_value(response).map_err(|e| CatalogError::Malformed {
                message: e.to_string(),
            })?;
        let fresh = Arc::new(fresh);

        tracing::info!(
            pipelines = fresh.pipelines.len(),
            preferred = fresh.preferred_pipeline.as_deref().unwrap_or(""),
            "pipeline catalog refreshed"
        );
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::clone(&fresh);
        Ok(fresh)
    }

    /// Snapshot from the last successful fetch (empty before the first).
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        Arc::clone(
            &self
                .snapshot
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    pub fn preferred(&self) -> Option<Pipeline> {
        self.snapshot().preferred().cloned()
    }

    pub fn resolve(&self, name_or_id: &str) -> Option<Pipeline> {
        self.snapshot().resolve(name_or_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::mock::MockTransport;
    use serde_json::json;

    fn list_response() -> serde_json::Value {
        json!({
            "preferred_pipeline": "01hfv",
            "pipelines": [
                {
                    "id": "01hfv",
                    "name": "Home Assistant",
                    "language": "en",
                    "conversation_engine": "homeassistant",
                    "conversation_language": "en",
                    "stt_engine": "stt.faster_whisper",
                    "stt_language": "en",
                    "tts_engine": "tts.piper",
                    "tts_language": "en_US",
                    "tts_voice": "lessac",
                    "wake_word_entity": null,
                    "wake_word_id": null
                },
                {
                    "id": "02abc",
                    "name": "Text Only",
                    "language": "de",
                    "conversation_engine": "homeassistant"
                }
            ]
        })
    }

    fn catalog_with(transport: &Arc<MockTransport>) -> PipelineCatalog {
        PipelineCatalog::new(transport.clone())
    }

    #[tokio::test]
    async fn test_fetch_populates_snapshot() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(Ok(list_response()));
        let catalog = catalog_with(&transport);

        let snapshot = catalog.fetch().await.unwrap();
        assert_eq!(snapshot.pipelines.len(), 2);
        assert_eq!(catalog.preferred().unwrap().name, "Home Assistant");
        assert!(catalog.preferred().unwrap().supports_tts());
        assert!(!catalog.resolve("02abc").unwrap().supports_audio());

        let request = transport.requests()[0].clone();
        assert_eq!(request, codec::encode_pipeline_list());
    }

    #[tokio::test]
    async fn test_resolve_by_id_or_name() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(Ok(list_response()));
        let catalog = catalog_with(&transport);
        catalog.fetch().await.unwrap();

        assert_eq!(catalog.resolve("02abc").unwrap().name, "Text Only");
        assert_eq!(catalog.resolve("text only").unwrap().id, "02abc");
        assert!(catalog.resolve("missing").is_none());
    }

    #[tokio::test]
    async fn test_failed_fetches_keep_snapshot() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(Ok(list_response()));
        transport.push_response(Err(TransportError::SendFailed {
            message: "socket closed".to_string(),
        }));
        transport.push_response(Ok(json!({ "pipelines": "not a list" })));
        let catalog = catalog_with(&transport);

        let first = catalog.fetch().await.unwrap();
        let err = catalog.fetch().await.unwrap_err();
        assert!(matches!(err, CatalogError::Transport(_)));
        assert!(err.is_retryable());
        let err = catalog.fetch().await.unwrap_err();
        assert!(matches!(err, CatalogError::Malformed { .. }));

        assert_eq!(*catalog.snapshot(), *first);
    }

    #[tokio::test]
    async fn test_empty_before_first_fetch() {
        let transport = Arc::new(MockTransport::new());
        let catalog = catalog_with(&transport);
        assert!(catalog.snapshot().pipelines.is_empty());
        assert!(catalog.preferred().is_none());
        assert!(catalog.fetch().await.is_err());
        assert!(catalog.snapshot().pipelines.is_empty());
    }

    #[test]
    fn test_preferred_missing_from_list() {
        let snapshot = CatalogSnapshot {
            preferred_pipeline: Some("gone".to_string()),
            pipelines: Vec::new(),
        };
        assert!(snapshot.preferred().is_none());
    }
}
