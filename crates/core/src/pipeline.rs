use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::{AuditEngine, AuditInput, AuditReport};
use crate::config::EvaluationConfig;
use crate::error::{Result, TenderError};
use crate::matching::{MatchEngine, MatchOutcome, VectorIndex};
use crate::metrics::RunRecord;
use crate::model::{Recommendation, RfpTicket, Specification};
use crate::normalization::SpecNormalizer;
use crate::pricing::{PricingEngine, PricingOutcome};
use crate::store::{CatalogRepository, MetricsStore, PriceHistory};

/// Ticket lifecycle. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Received,
    Specifying,
    Matching,
    Pricing,
    Auditing,
    Done,
    Failed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Received => "received",
            TicketStatus::Specifying => "specifying",
            TicketStatus::Matching => "matching",
            TicketStatus::Pricing => "pricing",
            TicketStatus::Auditing => "auditing",
            TicketStatus::Done => "done",
            TicketStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TicketStatus::Done | TicketStatus::Failed)
    }
}

impl FromStr for TicketStatus {
    type Err = TenderError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "received" => Ok(TicketStatus::Received),
            "specifying" => Ok(TicketStatus::Specifying),
            "matching" => Ok(TicketStatus::Matching),
            "pricing" => Ok(TicketStatus::Pricing),
            "auditing" => Ok(TicketStatus::Auditing),
            "done" => Ok(TicketStatus::Done),
            "failed" => Ok(TicketStatus::Failed),
            other => Err(TenderError::Other(format!("unknown ticket status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: TicketStatus,
    pub message: String,
}

/// Everything one ticket produced, including how far it got.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub rfp_id: String,
    pub status: TicketStatus,
    pub transitions: Vec<TicketStatus>,
    pub specification: Option<Specification>,
    pub matches: Option<MatchOutcome>,
    pub pricing: Option<PricingOutcome>,
    pub audit: Option<AuditReport>,
    pub failure: Option<StageFailure>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl PipelineRun {
    fn new(rfp_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            rfp_id: rfp_id.to_string(),
            status: TicketStatus::Received,
            transitions: vec![TicketStatus::Received],
            specification: None,
            matches: None,
            pricing: None,
            audit: None,
            failure: None,
            started_at,
            duration_ms: 0,
        }
    }

    fn advance(&mut self, status: TicketStatus) {
        self.status = status;
        self.transitions.push(status);
    }

    fn fail(&mut self, err: &TenderError) {
        self.failure = Some(StageFailure {
            stage: self.status,
            message: err.to_string(),
        });
        self.advance(TicketStatus::Failed);
    }

    pub fn recommendation(&self) -> Option<Recommendation> {
        self.audit.as_ref().map(|a| a.recommendation)
    }

    pub fn recommended_sku(&self) -> Option<&str> {
        self.pricing
            .as_ref()?
            .recommendation
            .as_ref()
            .map(|r| r.sku.as_str())
    }

    pub fn to_record(&self) -> RunRecord {
        RunRecord {
            rfp_id: self.rfp_id.clone(),
            status: self.status,
            strategy: self.matches.as_ref().map(|m| m.strategy),
            fallback: self
                .matches
                .as_ref()
                .map(|m| m.fallback.is_some())
                .unwrap_or(false),
            best_match_score: self.matches.as_ref().map(|m| m.best_score()).unwrap_or(0.0),
            recommended_sku: self.recommended_sku().map(str::to_string),
            recommendation: self.recommendation(),
            duration_ms: self.duration_ms,
            recorded_at: self.started_at,
        }
    }
}

/// Runs tickets through normalization, matching, pricing and audit.
///
/// Holds only read-only collaborators, so one instance can serve many
/// tickets concurrently.
pub struct Pipeline {
    normalizer: SpecNormalizer,
    matcher: MatchEngine,
    pricer: PricingEngine,
    auditor: AuditEngine,
    catalog: Arc<dyn CatalogRepository>,
    metrics: Arc<dyn MetricsStore>,
    config: EvaluationConfig,
}

impl Pipeline {
    pub fn new(
        config: EvaluationConfig,
        catalog: Arc<dyn CatalogRepository>,
        history: Arc<dyn PriceHistory>,
        metrics: Arc<dyn MetricsStore>,
    ) -> Self {
        Self {
            normalizer: SpecNormalizer::new(),
            matcher: MatchEngine::new(config.matching),
            pricer: PricingEngine::new(config.pricing.clone(), history),
            auditor: AuditEngine::new(config.audit.clone()),
            catalog,
            metrics,
            config,
        }
    }

    /// Enables vector matching; the backend is probed here, once.
    pub fn with_vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.matcher = MatchEngine::with_vector(self.config.matching, index);
        self
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    pub fn normalizer(&self) -> &SpecNormalizer {
        &self.normalizer
    }

    pub fn matcher(&self) -> &MatchEngine {
        &self.matcher
    }

    pub fn pricer(&self) -> &PricingEngine {
        &self.pricer
    }

    pub fn run(&self, ticket: &RfpTicket) -> PipelineRun {
        self.run_at(ticket, Utc::now())
    }

    /// Evaluates one ticket as of `now`. Never panics and never retries: a
    /// failing stage ends the run in [`TicketStatus::Failed`].
    pub fn run_at(&self, ticket: &RfpTicket, now: DateTime<Utc>) -> PipelineRun {
        let started = Instant::now();
        let mut run = PipelineRun::new(&ticket.rfp_id, now);
        match self.execute(ticket, now, &mut run) {
            Ok(()) => run.advance(TicketStatus::Done),
            Err(err) => {
                warn!(
                    rfp_id = %ticket.rfp_id,
                    stage = run.status.as_str(),
                    error = %err,
                    "ticket failed"
                );
                run.fail(&err);
            }
        }
        run.duration_ms = started.elapsed().as_millis() as u64;
        if let Err(err) = self.metrics.record(&run.to_record()) {
            warn!(rfp_id = %ticket.rfp_id, error = %err, "failed to record run metrics");
        }
        info!(
            rfp_id = %run.rfp_id,
            status = run.status.as_str(),
            duration_ms = run.duration_ms,
            "ticket finished"
        );
        run
    }

    fn execute(&self, ticket: &RfpTicket, now: DateTime<Utc>, run: &mut PipelineRun) -> Result<()> {
        run.advance(TicketStatus::Specifying);
        if ticket.rfp_id.trim().is_empty() {
            return Err(TenderError::InvalidTicket("rfp_id is empty".to_string()));
        }
        let spec = self.normalizer.extract(&ticket.rfp_id, &ticket.scope);
        run.specification = Some(spec.clone());

        run.advance(TicketStatus::Matching);
        let catalog = self.catalog.items()?;
        let outcome = self
            .matcher
            .match_products(&spec, &catalog, self.config.matching.top_k);
        run.matches = Some(outcome.clone());

        run.advance(TicketStatus::Pricing);
        let pricing = self.pricer.evaluate(
            &outcome.matches,
            ticket.quantity,
            ticket.deadline,
            &ticket.testing_requirements,
            now,
        );
        let historical = pricing
            .recommendation
            .as_ref()
            .map(|r| self.pricer.historical_prices(&r.sku))
            .unwrap_or_default();
        run.pricing = Some(pricing.clone());

        run.advance(TicketStatus::Auditing);
        let report = self.auditor.audit(
            AuditInput {
                ticket,
                specification: &spec,
                matches: &outcome.matches,
                pricing: pricing.recommended_breakdown(),
                historical_prices: &historical,
            },
            now,
        );
        run.audit = Some(report);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::StrategyKind;
    use crate::model::{CatalogItem, SpecAttributes};
    use crate::store::{InMemoryCatalog, InMemoryMetrics, InMemoryPriceHistory};
    use chrono::Duration;

    struct OfflineCatalog;

    impl CatalogRepository for OfflineCatalog {
        fn items(&self) -> Result<Vec<CatalogItem>> {
            Err(TenderError::Catalog("catalog unavailable".to_string()))
        }
    }

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::new(vec![CatalogItem {
            sku: "XLPE-11KV-240".to_string(),
            name: "11kV XLPE 3 core 240 sq mm copper".to_string(),
            category: "power_cable".to_string(),
            unit_price: 850.0,
            attributes: SpecAttributes {
                voltage: Some("11kV".to_string()),
                conductor_size: Some("240 sq mm".to_string()),
                conductor_material: Some("Copper".to_string()),
                insulation_material: Some("XLPE".to_string()),
                cable_type: Some("3 core".to_string()),
                ..Default::default()
            },
            datasheet_url: None,
        }])
    }

    fn ticket(now: DateTime<Utc>) -> RfpTicket {
        RfpTicket {
            rfp_id: "RFP-7".to_string(),
            title: "Supply of 11kV power cables".to_string(),
            source: Some("portal".to_string()),
            deadline: Some(now + Duration::days(30)),
            scope: "11kV XLPE 3-core copper cable, 240 sq mm".to_string(),
            quantity: 2000,
            testing_requirements: vec!["Routine Test".to_string()],
        }
    }

    #[test]
    fn runs_every_stage_in_order() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let pipeline = Pipeline::new(
            EvaluationConfig::default(),
            Arc::new(catalog()),
            Arc::new(InMemoryPriceHistory::new()),
            metrics.clone(),
        );
        let now = Utc::now();
        let run = pipeline.run_at(&ticket(now), now);
        assert_eq!(
            run.transitions,
            vec![
                TicketStatus::Received,
                TicketStatus::Specifying,
                TicketStatus::Matching,
                TicketStatus::Pricing,
                TicketStatus::Auditing,
                TicketStatus::Done,
            ]
        );
        assert_eq!(run.recommended_sku(), Some("XLPE-11KV-240"));
        assert_eq!(run.recommendation(), Some(Recommendation::Approve));
        let records = metrics.runs().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TicketStatus::Done);
        assert_eq!(records[0].best_match_score, 1.0);
    }

    #[test]
    fn catalog_failure_fails_at_matching() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let pipeline = Pipeline::new(
            EvaluationConfig::default(),
            Arc::new(OfflineCatalog),
            Arc::new(InMemoryPriceHistory::new()),
            metrics.clone(),
        );
        let now = Utc::now();
        let run = pipeline.run_at(&ticket(now), now);
        assert_eq!(run.status, TicketStatus::Failed);
        let failure = run.failure.unwrap();
        assert_eq!(failure.stage, TicketStatus::Matching);
        assert!(failure.message.contains("catalog unavailable"));
        assert!(run.specification.is_some());
        assert!(run.audit.is_none());
        assert_eq!(metrics.runs().unwrap()[0].status, TicketStatus::Failed);
    }

    #[test]
    fn blank_ticket_id_fails_at_specifying() {
        let pipeline = Pipeline::new(
            EvaluationConfig::default(),
            Arc::new(catalog()),
            Arc::new(InMemoryPriceHistory::new()),
            Arc::new(InMemoryMetrics::new()),
        );
        let now = Utc::now();
        let mut t = ticket(now);
        t.rfp_id = " ".to_string();
        let run = pipeline.run_at(&t, now);
        assert_eq!(run.failure.unwrap().stage, TicketStatus::Specifying);
        assert!(run.specification.is_none());
    }

    #[test]
    fn status_names_round_trip() {
        for status in [
            TicketStatus::Received,
            TicketStatus::Auditing,
            TicketStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TicketStatus>().ok(), Some(status));
        }
        assert_eq!(" DONE ".parse::<TicketStatus>().ok(), Some(TicketStatus::Done));
        assert!(matches!(
            "archived".parse::<TicketStatus>(),
            Err(TenderError::Other(_))
        ));
        assert_eq!("Vector".parse::<StrategyKind>().ok(), Some(StrategyKind::Vector));
        assert_eq!("reject".parse::<Recommendation>().ok(), Some(Recommendation::Reject));
        assert!(TicketStatus::Done.is_terminal());
        assert!(!TicketStatus::Pricing.is_terminal());
    }
}
