pub mod embedding;
pub mod store;
pub mod vector;

pub use embedding::{EmbeddingClient, EmbeddingProvider, EmbeddingSettings};
pub use store::{HistoricalPrice, SqliteStore};
pub use vector::SqliteVectorIndex;
