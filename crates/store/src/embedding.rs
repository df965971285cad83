use std::env;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

use tenderflow_core::{CatalogItem, HashEmbedder, HashEmbedderConfig};

const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
const DEFAULT_HASH_DIMENSIONS: usize = 64;
/// Inputs sent per embeddings request when importing a catalog.
const OPENAI_BATCH: usize = 96;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    Hash,
    OpenAi,
}

impl EmbeddingProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingProvider::Hash => "hash",
            EmbeddingProvider::OpenAi => "openai",
        }
    }
}

impl fmt::Display for EmbeddingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbeddingProvider {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "hash" => Ok(EmbeddingProvider::Hash),
            "openai" => Ok(EmbeddingProvider::OpenAi),
            other => bail!("unknown embedding provider '{other}' (expected hash or openai)"),
        }
    }
}

/// Which backend embeds catalog items and RFP queries.
///
/// Reading settings never touches the network or credentials; that happens
/// in [`EmbeddingClient::connect`].
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub dimensions: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hash,
            model: DEFAULT_OPENAI_MODEL.to_string(),
            dimensions: DEFAULT_HASH_DIMENSIONS,
        }
    }
}

impl EmbeddingSettings {
    /// Reads `EMBEDDING_PROVIDER`, `EMBEDDING_MODEL` and `HASH_EMBED_DIMENSIONS`.
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();
        if let Ok(provider) = env::var("EMBEDDING_PROVIDER") {
            settings.provider = provider.parse()?;
        }
        if let Ok(model) = env::var("EMBEDDING_MODEL") {
            if !model.trim().is_empty() {
                settings.model = model.trim().to_string();
            }
        }
        if let Ok(dims) = env::var("HASH_EMBED_DIMENSIONS") {
            settings.dimensions = dims
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|d| *d > 0)
                .ok_or_else(|| anyhow!("HASH_EMBED_DIMENSIONS must be a positive integer, got '{dims}'"))?;
        }
        Ok(settings)
    }
}

#[derive(Clone)]
enum Backend {
    Hash(HashEmbedder),
    OpenAi(OpenAiEmbedder),
}

/// Turns catalog items and RFP queries into vectors for [`crate::SqliteVectorIndex`].
#[derive(Clone)]
pub struct EmbeddingClient {
    backend: Backend,
}

impl EmbeddingClient {
    pub fn connect(settings: &EmbeddingSettings) -> Result<Self> {
        let backend = match settings.provider {
            EmbeddingProvider::Hash => Backend::Hash(HashEmbedder::new(HashEmbedderConfig {
                dimensions: settings.dimensions,
                ..HashEmbedderConfig::default()
            })),
            EmbeddingProvider::OpenAi => Backend::OpenAi(OpenAiEmbedder::new(&settings.model)?),
        };
        Ok(Self { backend })
    }

    pub fn from_env() -> Result<Self> {
        Self::connect(&EmbeddingSettings::from_env()?)
    }

    pub fn hash() -> Self {
        Self::hash_with_dimensions(DEFAULT_HASH_DIMENSIONS)
    }

    pub fn hash_with_dimensions(dimensions: usize) -> Self {
        Self {
            backend: Backend::Hash(HashEmbedder::new(HashEmbedderConfig {
                dimensions,
                ..HashEmbedderConfig::default()
            })),
        }
    }

    pub fn provider(&self) -> EmbeddingProvider {
        match &self.backend {
            Backend::Hash(_) => EmbeddingProvider::Hash,
            Backend::OpenAi(_) => EmbeddingProvider::OpenAi,
        }
    }

    /// One vector per item, in input order, from the item's name and attributes.
    pub fn embed_catalog(&self, items: &[CatalogItem]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = items.iter().map(CatalogItem::embedding_text).collect();
        let vectors = self.embed_texts(&texts)?;
        if vectors.len() != items.len() {
            bail!(
                "{} backend returned {} vectors for {} products",
                self.provider(),
                vectors.len(),
                items.len()
            );
        }
        if let Some(first) = vectors.first() {
            if vectors.iter().any(|v| v.len() != first.len()) {
                bail!("{} backend returned vectors of mixed dimensions", self.provider());
            }
        }
        Ok(vectors)
    }

    /// Embeds a specification search query.
    pub fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embed_texts(&[query.to_string()])?
            .pop()
            .ok_or_else(|| anyhow!("{} backend returned no vector for the query", self.provider()))
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            Backend::Hash(embedder) => Ok(texts.iter().map(|t| embedder.embed_text(t)).collect()),
            Backend::OpenAi(client) => {
                let mut vectors = Vec::with_capacity(texts.len());
                for chunk in texts.chunks(OPENAI_BATCH) {
                    vectors.extend(client.request(chunk)?);
                }
                Ok(vectors)
            }
        }
    }
}

#[derive(Clone)]
struct OpenAiEmbedder {
    http: Client,
    model: String,
    api_key: String,
}

impl OpenAiEmbedder {
    fn new(model: &str) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("OPENAI_API_KEY is required for openai embeddings"))?;
        Ok(Self {
            http: Client::new(),
            model: model.to_string(),
            api_key,
        })
    }

    fn request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        debug!(model = %self.model, count = inputs.len(), "requesting embeddings");
        let payload = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });
        let response = self
            .http
            .post(OPENAI_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .context("openai embeddings request failed")?;
        if !response.status().is_success() {
            bail!("openai embeddings request failed: {}", response.status());
        }
        let parsed: EmbeddingResponse = response.json()?;
        order_by_index(parsed.data, inputs.len())
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

/// Rows may arrive in any order; `index` ties each back to its input.
fn order_by_index(rows: Vec<EmbeddingRow>, expected: usize) -> Result<Vec<Vec<f32>>> {
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for row in rows {
        let slot = slots
            .get_mut(row.index)
            .ok_or_else(|| anyhow!("embedding index {} out of range for {expected} inputs", row.index))?;
        *slot = Some(row.embedding);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(idx, slot)| slot.ok_or_else(|| anyhow!("no embedding returned for input {idx}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenderflow_core::SpecAttributes;

    fn cable(sku: &str, name: &str) -> CatalogItem {
        CatalogItem {
            sku: sku.to_string(),
            name: name.to_string(),
            category: "power_cable".to_string(),
            unit_price: 100.0,
            attributes: SpecAttributes::default(),
            datasheet_url: None,
        }
    }

    #[test]
    fn provider_names_parse() {
        assert_eq!("OpenAI".parse::<EmbeddingProvider>().unwrap(), EmbeddingProvider::OpenAi);
        assert_eq!("".parse::<EmbeddingProvider>().unwrap(), EmbeddingProvider::Hash);
        assert!("bert".parse::<EmbeddingProvider>().is_err());
    }

    #[test]
    fn hash_backend_embeds_catalog_in_order() {
        let client = EmbeddingClient::hash_with_dimensions(32);
        let items = [cable("A", "11kV XLPE copper"), cable("B", "LT PVC aluminium")];
        let vectors = client.embed_catalog(&items).unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|v| v.len() == 32));
        assert_eq!(vectors[0], client.embed_query(&items[0].embedding_text()).unwrap());
        assert_eq!(client.provider(), EmbeddingProvider::Hash);
    }

    #[test]
    fn response_rows_are_reordered_by_index() {
        let rows = vec![
            EmbeddingRow { index: 1, embedding: vec![2.0] },
            EmbeddingRow { index: 0, embedding: vec![1.0] },
        ];
        assert_eq!(order_by_index(rows, 2).unwrap(), vec![vec![1.0], vec![2.0]]);
        let short = vec![EmbeddingRow { index: 0, embedding: vec![1.0] }];
        assert!(order_by_index(short, 2).is_err());
    }
}
