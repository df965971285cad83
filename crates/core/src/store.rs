use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::Result;
use crate::metrics::RunRecord;
use crate::model::CatalogItem;

/// Read-only access to the product catalog. Items come back in insertion
/// order; that order breaks score ties during matching.
pub trait CatalogRepository: Send + Sync {
    fn items(&self) -> Result<Vec<CatalogItem>>;

    fn get(&self, sku: &str) -> Result<Option<CatalogItem>> {
        Ok(self.items()?.into_iter().find(|item| item.sku == sku))
    }
}

/// Historical awarded unit prices per SKU, most recent first.
pub trait PriceHistory: Send + Sync {
    fn unit_prices(&self, sku: &str, limit: usize) -> Result<Vec<f64>>;
}

/// Sink for per-ticket run records.
pub trait MetricsStore: Send + Sync {
    fn record(&self, run: &RunRecord) -> Result<()>;
    fn runs(&self) -> Result<Vec<RunRecord>>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    items: Vec<CatalogItem>,
}

impl InMemoryCatalog {
    pub fn new(items: Vec<CatalogItem>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl CatalogRepository for InMemoryCatalog {
    fn items(&self) -> Result<Vec<CatalogItem>> {
        Ok(self.items.clone())
    }

    fn get(&self, sku: &str) -> Result<Option<CatalogItem>> {
        Ok(self.items.iter().find(|item| item.sku == sku).cloned())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryPriceHistory {
    prices: HashMap<String, Vec<f64>>,
}

impl InMemoryPriceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prices(mut self, sku: impl Into<String>, prices: Vec<f64>) -> Self {
        self.prices.insert(sku.into(), prices);
        self
    }

    pub fn push(&mut self, sku: &str, unit_price: f64) {
        self.prices.entry(sku.to_string()).or_default().push(unit_price);
    }
}

impl PriceHistory for InMemoryPriceHistory {
    fn unit_prices(&self, sku: &str, limit: usize) -> Result<Vec<f64>> {
        Ok(self
            .prices
            .get(sku)
            .map(|prices| prices.iter().copied().take(limit).collect())
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    runs: Mutex<Vec<RunRecord>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsStore for InMemoryMetrics {
    fn record(&self, run: &RunRecord) -> Result<()> {
        self.runs.lock().push(run.clone());
        Ok(())
    }

    fn runs(&self) -> Result<Vec<RunRecord>> {
        Ok(self.runs.lock().clone())
    }
}
