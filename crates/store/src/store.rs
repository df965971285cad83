use anyhow::{anyhow, Context, Result};
use bytemuck::{cast_slice, pod_collect_to_vec};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::{Path, PathBuf};
use tracing::debug;

use tenderflow_core::{
    CatalogItem, CatalogRepository, MetricsStore, PriceHistory, Recommendation, RunRecord,
    StrategyKind, TenderError, TicketStatus,
};

use crate::embedding::EmbeddingClient;

/// SQLite-backed catalog, price history and run log.
///
/// Every call opens its own connection, so clones can be shared across
/// threads freely.
#[derive(Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalPrice {
    pub sku: String,
    pub unit_price: f64,
    pub awarded_at: Option<DateTime<Utc>>,
    pub rfp_id: Option<String>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        store.init()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn connection(&self) -> Result<Connection> {
        Connection::open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))
    }

    pub fn init(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS products (
                position INTEGER PRIMARY KEY AUTOINCREMENT,
                sku TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT '',
                unit_price REAL NOT NULL,
                attributes TEXT NOT NULL,
                datasheet_url TEXT,
                embedding BLOB,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS historical_prices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sku TEXT NOT NULL,
                unit_price REAL NOT NULL,
                awarded_at TEXT,
                rfp_id TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS pipeline_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rfp_id TEXT NOT NULL,
                status TEXT NOT NULL,
                strategy TEXT,
                fallback INTEGER NOT NULL,
                best_match_score REAL NOT NULL,
                recommended_sku TEXT,
                recommendation TEXT,
                duration_ms INTEGER NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_sku ON historical_prices(sku);
            CREATE INDEX IF NOT EXISTS idx_runs_rfp ON pipeline_runs(rfp_id);
            "#,
        )?;
        Ok(())
    }

    /// Inserts or replaces catalog items. Existing SKUs keep their first
    /// catalog position. Items are embedded when an embedder is given;
    /// otherwise a stored vector survives only if the embedded text is unchanged.
    pub fn upsert_products(
        &self,
        items: &[CatalogItem],
        embedder: Option<&EmbeddingClient>,
    ) -> Result<usize> {
        let embeddings: Vec<Option<Vec<f32>>> = match embedder {
            Some(client) => client
                .embed_catalog(items)?
                .into_iter()
                .map(Some)
                .collect(),
            None => vec![None; items.len()],
        };

        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        for (item, embedding) in items.iter().zip(embeddings.iter()) {
            let attributes = serde_json::to_string(&item.attributes)?;
            let blob: Option<&[u8]> = embedding.as_deref().map(cast_slice::<f32, u8>);
            tx.execute(
                r#"
                INSERT INTO products (sku, name, category, unit_price, attributes, datasheet_url, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(sku) DO UPDATE SET
                    name = excluded.name,
                    category = excluded.category,
                    unit_price = excluded.unit_price,
                    attributes = excluded.attributes,
                    datasheet_url = excluded.datasheet_url,
                    embedding = CASE
                        WHEN excluded.embedding IS NOT NULL THEN excluded.embedding
                        WHEN products.name = excluded.name
                            AND products.category = excluded.category
                            AND products.attributes = excluded.attributes
                            THEN products.embedding
                        ELSE NULL
                    END,
                    updated_at = CURRENT_TIMESTAMP
                "#,
                params![
                    item.sku,
                    item.name,
                    item.category,
                    item.unit_price,
                    attributes,
                    item.datasheet_url,
                    blob
                ],
            )?;
        }
        tx.commit()?;
        debug!(count = items.len(), embedded = embedder.is_some(), "upserted products");
        Ok(items.len())
    }

    pub fn products(&self) -> Result<Vec<CatalogItem>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT sku, name, category, unit_price, attributes, datasheet_url FROM products ORDER BY position",
        )?;
        let mut rows = stmt.query([])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(product_from_row(row)?);
        }
        Ok(items)
    }

    pub fn product_count(&self) -> Result<usize> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// `(sku, embedding)` for every embedded product, in catalog order.
    pub fn product_embeddings(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT sku, embedding FROM products WHERE embedding IS NOT NULL ORDER BY position",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let sku: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            if blob.len() % std::mem::size_of::<f32>() != 0 {
                return Err(anyhow!("invalid embedding for {sku}"));
            }
            out.push((sku, pod_collect_to_vec::<u8, f32>(&blob)));
        }
        Ok(out)
    }

    pub fn add_prices(&self, prices: &[HistoricalPrice]) -> Result<usize> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        for price in prices {
            tx.execute(
                "INSERT INTO historical_prices (sku, unit_price, awarded_at, rfp_id) VALUES (?1, ?2, ?3, ?4)",
                params![
                    price.sku,
                    price.unit_price,
                    price.awarded_at.map(|t| t.to_rfc3339()),
                    price.rfp_id
                ],
            )?;
        }
        tx.commit()?;
        Ok(prices.len())
    }

    /// Most recent first; undated rows sort after dated ones.
    pub fn recent_prices(&self, sku: &str, limit: usize) -> Result<Vec<f64>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT unit_price FROM historical_prices
            WHERE sku = ?1
            ORDER BY awarded_at IS NULL, awarded_at DESC, id DESC
            LIMIT ?2
            "#,
        )?;
        let prices = stmt
            .query_map(params![sku, limit as i64], |row| row.get::<_, f64>(0))?
            .collect::<rusqlite::Result<Vec<f64>>>()?;
        Ok(prices)
    }

    pub fn insert_run(&self, run: &RunRecord) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            r#"
            INSERT INTO pipeline_runs
                (rfp_id, status, strategy, fallback, best_match_score, recommended_sku, recommendation, duration_ms, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                run.rfp_id,
                run.status.as_str(),
                run.strategy.map(|s| s.as_str()),
                run.fallback,
                run.best_match_score,
                run.recommended_sku,
                run.recommendation.map(|r| r.as_str()),
                run.duration_ms as i64,
                run.recorded_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn list_runs(&self) -> Result<Vec<RunRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT rfp_id, status, strategy, fallback, best_match_score, recommended_sku,
                   recommendation, duration_ms, recorded_at
            FROM pipeline_runs ORDER BY id
            "#,
        )?;
        let mut rows = stmt.query([])?;
        let mut runs = Vec::new();
        while let Some(row) = rows.next()? {
            runs.push(run_from_row(row)?);
        }
        Ok(runs)
    }
}

fn product_from_row(row: &Row<'_>) -> Result<CatalogItem> {
    let sku: String = row.get(0)?;
    let attributes: String = row.get(4)?;
    let attributes = serde_json::from_str(&attributes)
        .with_context(|| format!("invalid attributes for {sku}"))?;
    Ok(CatalogItem {
        sku,
        name: row.get(1)?,
        category: row.get(2)?,
        unit_price: row.get(3)?,
        attributes,
        datasheet_url: row.get(5)?,
    })
}

fn run_from_row(row: &Row<'_>) -> Result<RunRecord> {
    let status: String = row.get(1)?;
    let strategy: Option<String> = row.get(2)?;
    let recommendation: Option<String> = row.get(6)?;
    let recorded_at: String = row.get(8)?;
    Ok(RunRecord {
        rfp_id: row.get(0)?,
        status: status.parse::<TicketStatus>()?,
        strategy: strategy.as_deref().map(str::parse::<StrategyKind>).transpose()?,
        fallback: row.get(3)?,
        best_match_score: row.get(4)?,
        recommended_sku: row.get(5)?,
        recommendation: recommendation
            .as_deref()
            .map(str::parse::<Recommendation>)
            .transpose()?,
        duration_ms: row.get::<_, i64>(7)?.max(0) as u64,
        recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
            .with_context(|| format!("invalid timestamp {recorded_at}"))?
            .with_timezone(&Utc),
    })
}

impl CatalogRepository for SqliteStore {
    fn items(&self) -> tenderflow_core::Result<Vec<CatalogItem>> {
        self.products()
            .map_err(|e| TenderError::Catalog(format!("{e:#}")))
    }
}

impl PriceHistory for SqliteStore {
    fn unit_prices(&self, sku: &str, limit: usize) -> tenderflow_core::Result<Vec<f64>> {
        self.recent_prices(sku, limit)
            .map_err(|e| TenderError::History(format!("{e:#}")))
    }
}

impl MetricsStore for SqliteStore {
    fn record(&self, run: &RunRecord) -> tenderflow_core::Result<()> {
        self.insert_run(run)
            .map_err(|e| TenderError::Other(format!("{e:#}")))
    }

    fn runs(&self) -> tenderflow_core::Result<Vec<RunRecord>> {
        self.list_runs()
            .map_err(|e| TenderError::Other(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;
    use tenderflow_core::SpecAttributes;

    fn item(sku: &str, price: f64) -> CatalogItem {
        CatalogItem {
            sku: sku.to_string(),
            name: format!("{sku} cable"),
            category: "power_cable".to_string(),
            unit_price: price,
            attributes: SpecAttributes {
                voltage: Some("11kV".to_string()),
                ..Default::default()
            },
            datasheet_url: None,
        }
    }

    #[test]
    fn upsert_keeps_catalog_order() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("t.sqlite")).unwrap();
        store
            .upsert_products(&[item("B", 1.0), item("A", 2.0)], None)
            .unwrap();
        store.upsert_products(&[item("B", 5.0)], None).unwrap();
        let items = store.items().unwrap();
        assert_eq!(
            items.iter().map(|i| i.sku.as_str()).collect::<Vec<_>>(),
            vec!["B", "A"]
        );
        assert_eq!(items[0].unit_price, 5.0);
        assert_eq!(items[0].attributes.voltage.as_deref(), Some("11kV"));
        assert_eq!(store.product_count().unwrap(), 2);
    }

    #[test]
    fn history_is_most_recent_first() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("t.sqlite")).unwrap();
        let at = |day: u32| Some(Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap());
        let price = |value: f64, awarded_at| HistoricalPrice {
            sku: "A".to_string(),
            unit_price: value,
            awarded_at,
            rfp_id: None,
        };
        store
            .add_prices(&[price(100.0, at(1)), price(120.0, at(20)), price(90.0, None)])
            .unwrap();
        assert_eq!(store.unit_prices("A", 10).unwrap(), vec![120.0, 100.0, 90.0]);
        assert_eq!(store.unit_prices("A", 1).unwrap(), vec![120.0]);
        assert!(store.unit_prices("B", 10).unwrap().is_empty());
    }

    #[test]
    fn runs_round_trip() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("t.sqlite")).unwrap();
        let run = RunRecord {
            rfp_id: "RFP-1".to_string(),
            status: TicketStatus::Done,
            strategy: Some(StrategyKind::Vector),
            fallback: false,
            best_match_score: 0.8,
            recommended_sku: Some("A".to_string()),
            recommendation: Some(Recommendation::Review),
            duration_ms: 12,
            recorded_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
        };
        store.record(&run).unwrap();
        assert_eq!(store.runs().unwrap(), vec![run]);
    }

    #[test]
    fn embeddings_are_stored_when_requested() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("t.sqlite")).unwrap();
        store.upsert_products(&[item("A", 1.0)], None).unwrap();
        assert!(store.product_embeddings().unwrap().is_empty());
        let client = EmbeddingClient::hash_with_dimensions(16);
        store.upsert_products(&[item("A", 1.0)], Some(&client)).unwrap();
        let embeddings = store.product_embeddings().unwrap();
        assert_eq!(embeddings.len(), 1);
        assert_eq!(embeddings[0].1.len(), 16);
    }

    #[test]
    fn changed_attributes_drop_stale_embedding() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("t.sqlite")).unwrap();
        let client = EmbeddingClient::hash_with_dimensions(16);
        store
            .upsert_products(&[item("A", 1.0), item("B", 1.0)], Some(&client))
            .unwrap();

        let mut rewired = item("A", 1.0);
        rewired.attributes.voltage = Some("33kV".to_string());
        store
            .upsert_products(&[rewired, item("B", 2.0)], None)
            .unwrap();

        let embedded: Vec<String> = store
            .product_embeddings()
            .unwrap()
            .into_iter()
            .map(|(sku, _)| sku)
            .collect();
        assert_eq!(embedded, vec!["B".to_string()]);
    }
}
