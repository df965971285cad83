use std::cmp::Ordering;

use tenderflow_core::{cosine_similarity, Result, TenderError, VectorHit, VectorIndex};
use tracing::warn;

use crate::embedding::EmbeddingClient;
use crate::store::SqliteStore;

/// Brute-force cosine search over product embeddings held in SQLite.
///
/// An embedder that could not be set up is kept as its error and reported
/// by [`VectorIndex::probe`], so matching falls back to rules instead of
/// aborting the ticket.
#[derive(Clone)]
pub struct SqliteVectorIndex {
    store: SqliteStore,
    embedder: std::result::Result<EmbeddingClient, String>,
}

impl SqliteVectorIndex {
    pub fn new(store: SqliteStore, embedder: EmbeddingClient) -> Self {
        Self {
            store,
            embedder: Ok(embedder),
        }
    }

    /// Builds the embedder from `EMBEDDING_*` settings; never fails.
    pub fn from_env(store: SqliteStore) -> Self {
        Self::from_embedder(store, EmbeddingClient::from_env())
    }

    pub fn from_embedder(store: SqliteStore, embedder: anyhow::Result<EmbeddingClient>) -> Self {
        let embedder = embedder.map_err(|err| {
            let reason = format!("{err:#}");
            warn!(error = %reason, "embedding backend unavailable");
            reason
        });
        Self { store, embedder }
    }

    fn embedder(&self) -> Result<&EmbeddingClient> {
        self.embedder
            .as_ref()
            .map_err(|reason| TenderError::VectorBackend(reason.clone()))
    }
}

impl VectorIndex for SqliteVectorIndex {
    fn probe(&self) -> Result<()> {
        let embedder = self.embedder()?;
        let embeddings = self.store.product_embeddings().map_err(backend_error)?;
        let Some((sku, stored)) = embeddings.first() else {
            return Err(TenderError::VectorBackend(
                "no embedded products in catalog".to_string(),
            ));
        };
        let query = embedder.embed_query("probe").map_err(backend_error)?;
        if query.len() != stored.len() {
            return Err(TenderError::VectorBackend(format!(
                "embedding dimension mismatch: {} embedder={} vs stored {sku}={}",
                embedder.provider(),
                query.len(),
                stored.len()
            )));
        }
        Ok(())
    }

    fn search(&self, query: &str, top_k: usize) -> Result<Vec<VectorHit>> {
        let query = self.embedder()?.embed_query(query).map_err(backend_error)?;
        let mut hits: Vec<VectorHit> = self
            .store
            .product_embeddings()
            .map_err(backend_error)?
            .into_iter()
            .filter(|(_, embedding)| embedding.len() == query.len())
            .map(|(sku, embedding)| VectorHit {
                score: cosine_similarity(&query, &embedding),
                sku,
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }
}

fn backend_error(err: anyhow::Error) -> TenderError {
    TenderError::VectorBackend(format!("{err:#}"))
}
