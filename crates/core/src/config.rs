use serde::{Deserialize, Serialize};

use crate::audit::AuditRules;
use crate::error::{Result, TenderError};
use crate::matching::MatchRules;
use crate::pricing::PricingRules;

/// Tunable thresholds for every stage. Each table may be partially
/// specified; missing keys fall back to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub matching: MatchRules,
    pub pricing: PricingRules,
    pub audit: AuditRules,
}

impl EvaluationConfig {
    pub fn validate(&self) -> Result<()> {
        let m = &self.matching;
        if !(0.0..=1.0).contains(&m.min_score) {
            return Err(config_error(format!(
                "matching.min_score must be within [0, 1], got {}",
                m.min_score
            )));
        }
        if m.top_k == 0 {
            return Err(config_error("matching.top_k must be positive"));
        }

        let p = &self.pricing;
        if p.currency.trim().is_empty() {
            return Err(config_error("pricing.currency must not be empty"));
        }
        if p.history_limit == 0 {
            return Err(config_error("pricing.history_limit must be positive"));
        }
        let rates = [
            ("uncertainty_premium", p.uncertainty_premium),
            ("type_test_rate", p.type_test_rate),
            ("routine_test_rate", p.routine_test_rate),
            ("sample_test_rate", p.sample_test_rate),
            ("delivery_base", p.delivery_base),
            ("delivery_rate", p.delivery_rate),
            ("match_weight", p.match_weight),
            ("margin_weight", p.margin_weight),
        ];
        for (name, value) in rates {
            if !value.is_finite() || value < 0.0 {
                return Err(config_error(format!(
                    "pricing.{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if p.urgency_tiers.iter().any(|t| t.rate < 0.0) {
            return Err(config_error("pricing.urgency_tiers rates must be non-negative"));
        }
        if p.synthetic_low > 1.0 || p.synthetic_high < 1.0 {
            return Err(config_error(
                "pricing.synthetic_low must be <= 1 and pricing.synthetic_high >= 1",
            ));
        }

        let a = &self.audit;
        if a.min_deadline_days > a.max_deadline_days {
            return Err(config_error(format!(
                "audit.min_deadline_days ({}) exceeds audit.max_deadline_days ({})",
                a.min_deadline_days, a.max_deadline_days
            )));
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> TenderError {
    TenderError::Config(message.into())
}
