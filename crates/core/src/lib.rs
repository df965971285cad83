mod audit;
mod config;
mod embedding;
mod error;
mod matching;
mod metrics;
mod model;
mod normalization;
mod pipeline;
mod pricing;
mod store;

pub use audit::{
    AuditEngine, AuditInput, AuditReport, AuditRules, MatchQuality, MatchValidation, PriceLevel,
    PricingValidation, RfpValidation,
};
pub use config::EvaluationConfig;
pub use embedding::{cosine_similarity, HashEmbedder, HashEmbedderConfig};
pub use error::{Result, TenderError};
pub use matching::{
    alignment, match_score, values_match, FallbackReason, MatchEngine, MatchOutcome, MatchRules,
    MatchStrategy, RuleStrategy, StrategyKind, StrategySelection, VectorHit, VectorIndex,
    VectorStrategy,
};
pub use metrics::{summarize, PerformanceReport, RunRecord};
pub use model::{
    Alignment, AlignmentMap, Attribute, BidBand, BidBandSource, CatalogItem, PricingBreakdown,
    ProductMatch, Recommendation, RfpTicket, SpecAttributes, Specification, TestingRequirements,
};
pub use normalization::{clean_text, confidence_score, is_numeric, normalize_unit, SpecNormalizer};
pub use pipeline::{Pipeline, PipelineRun, StageFailure, TicketStatus};
pub use pricing::{
    combined_score, delivery_cost, margin_score, percentile_band, synthetic_band, testing_cost,
    urgency_adjustment, CostComponent, CostReport, PricingEngine, PricingOutcome, PricingRules,
    RecommendedBid, UrgencyTier,
};
pub use store::{
    CatalogRepository, InMemoryCatalog, InMemoryMetrics, InMemoryPriceHistory, MetricsStore,
    PriceHistory,
};
