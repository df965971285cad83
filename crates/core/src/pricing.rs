use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, TenderError};
use crate::model::{BidBand, BidBandSource, PricingBreakdown, ProductMatch};
use crate::store::PriceHistory;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UrgencyTier {
    /// Applies when fewer than this many days remain.
    pub within_days: i64,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingRules {
    pub currency: String,
    pub uncertainty_threshold: f64,
    pub uncertainty_premium: f64,
    pub type_test_rate: f64,
    pub routine_test_rate: f64,
    pub sample_test_rate: f64,
    pub delivery_base: f64,
    pub delivery_threshold: u64,
    pub delivery_rate: f64,
    /// Checked in order; the first tier whose bound is not reached wins.
    pub urgency_tiers: Vec<UrgencyTier>,
    pub history_limit: usize,
    pub synthetic_low: f64,
    pub synthetic_high: f64,
    pub aggressive_threshold: f64,
    pub aggressive_factor: f64,
    pub conservative_factor: f64,
    pub match_weight: f64,
    pub margin_weight: f64,
}

impl Default for PricingRules {
    fn default() -> Self {
        Self {
            currency: "INR".to_string(),
            uncertainty_threshold: 0.8,
            uncertainty_premium: 0.10,
            type_test_rate: 0.05,
            routine_test_rate: 0.02,
            sample_test_rate: 0.03,
            delivery_base: 5000.0,
            delivery_threshold: 5000,
            delivery_rate: 0.5,
            urgency_tiers: vec![
                UrgencyTier {
                    within_days: 14,
                    rate: 0.15,
                },
                UrgencyTier {
                    within_days: 30,
                    rate: 0.08,
                },
                UrgencyTier {
                    within_days: 60,
                    rate: 0.03,
                },
            ],
            history_limit: 10,
            synthetic_low: 0.95,
            synthetic_high: 1.10,
            aggressive_threshold: 0.9,
            aggressive_factor: 0.95,
            conservative_factor: 1.05,
            match_weight: 0.6,
            margin_weight: 0.4,
        }
    }
}

/// Winning candidate of [`PricingEngine::recommend`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedBid {
    pub sku: String,
    pub combined_score: f64,
    pub match_score: f64,
    pub margin_score: f64,
    /// Target unit price derived from the bid band.
    pub target_price: f64,
    /// `(target_price - total) / target_price`, in percent.
    pub projected_margin: f64,
    pub band: BidBand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingOutcome {
    pub breakdowns: Vec<PricingBreakdown>,
    pub recommendation: Option<RecommendedBid>,
}

impl PricingOutcome {
    pub fn recommended_breakdown(&self) -> Option<&PricingBreakdown> {
        let sku = &self.recommendation.as_ref()?.sku;
        self.breakdowns.iter().find(|b| &b.sku == sku)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostComponent {
    pub amount: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    pub sku: String,
    pub quantity: u64,
    pub material_cost: CostComponent,
    pub testing_cost: CostComponent,
    pub delivery_cost: CostComponent,
    pub urgency_premium: CostComponent,
    pub unit_price: f64,
    pub total: f64,
    pub currency: String,
}

pub struct PricingEngine {
    rules: PricingRules,
    history: Arc<dyn PriceHistory>,
}

impl PricingEngine {
    pub fn new(rules: PricingRules, history: Arc<dyn PriceHistory>) -> Self {
        Self { rules, history }
    }

    pub fn rules(&self) -> &PricingRules {
        &self.rules
    }

    pub fn evaluate(
        &self,
        matches: &[ProductMatch],
        quantity: u64,
        deadline: Option<DateTime<Utc>>,
        testing_requirements: &[String],
        now: DateTime<Utc>,
    ) -> PricingOutcome {
        let breakdowns: Vec<PricingBreakdown> = matches
            .iter()
            .map(|m| self.price_match(m, quantity, deadline, testing_requirements, now))
            .collect();
        let recommendation = self.recommend(&breakdowns, matches);
        info!(
            candidates = breakdowns.len(),
            recommended = recommendation.as_ref().map(|r| r.sku.as_str()).unwrap_or("-"),
            "pricing complete"
        );
        PricingOutcome {
            breakdowns,
            recommendation,
        }
    }

    pub fn price_match(
        &self,
        product: &ProductMatch,
        quantity: u64,
        deadline: Option<DateTime<Utc>>,
        testing_requirements: &[String],
        now: DateTime<Utc>,
    ) -> PricingBreakdown {
        let rules = &self.rules;
        let mut unit_price = product.unit_price;
        if product.match_score < rules.uncertainty_threshold {
            unit_price *= 1.0 + rules.uncertainty_premium;
        }
        let unit_price = round2(unit_price);
        let subtotal = round2(unit_price * quantity as f64);
        let testing_cost = round2(testing_cost(subtotal, testing_requirements, rules));
        let delivery_cost = round2(delivery_cost(quantity, rules));
        let urgency_adjustment = round2(urgency_adjustment(subtotal, deadline, now, rules));
        let total = round2(subtotal + testing_cost + delivery_cost + urgency_adjustment);
        PricingBreakdown {
            sku: product.sku.clone(),
            unit_price,
            quantity,
            subtotal,
            testing_cost,
            delivery_cost,
            urgency_adjustment,
            total,
            currency: rules.currency.clone(),
        }
    }

    /// Historical unit prices for a SKU; a failing source yields none.
    pub fn historical_prices(&self, sku: &str) -> Vec<f64> {
        match self.history.unit_prices(sku, self.rules.history_limit) {
            Ok(prices) => prices
                .into_iter()
                .filter(|p| p.is_finite() && *p > 0.0)
                .take(self.rules.history_limit)
                .collect(),
            Err(err) => {
                warn!(sku, error = %err, "price history unavailable; using synthetic band");
                Vec::new()
            }
        }
    }

    pub fn bid_band(&self, sku: &str, base_price: f64) -> BidBand {
        let history = self.historical_prices(sku);
        percentile_band(&history).unwrap_or_else(|| {
            debug!(sku, "no price history; synthetic band");
            synthetic_band(base_price, &self.rules)
        })
    }

    /// Picks the candidate with the best blend of match quality and margin.
    /// Ties keep the first candidate.
    pub fn recommend(
        &self,
        breakdowns: &[PricingBreakdown],
        matches: &[ProductMatch],
    ) -> Option<RecommendedBid> {
        let rules = &self.rules;
        let mut best: Option<RecommendedBid> = None;
        for breakdown in breakdowns {
            let product = matches.iter().find(|m| m.sku == breakdown.sku);
            let match_score = product.map(|m| m.match_score).unwrap_or(0.0);
            let base_price = product.map(|m| m.unit_price).unwrap_or(breakdown.unit_price);
            let band = self.bid_band(&breakdown.sku, base_price);
            let target_price = if match_score >= rules.aggressive_threshold {
                band.median * rules.aggressive_factor
            } else {
                band.median * rules.conservative_factor
            };
            let margin = if target_price > 0.0 {
                (target_price - breakdown.total) / target_price
            } else {
                f64::NEG_INFINITY
            };
            let margin_score = margin_score(margin);
            let combined = combined_score(match_score, margin_score, rules);
            let better = match &best {
                Some(current) => {
                    combined.partial_cmp(&current.combined_score) == Some(Ordering::Greater)
                }
                None => true,
            };
            if better {
                best = Some(RecommendedBid {
                    sku: breakdown.sku.clone(),
                    combined_score: combined,
                    match_score,
                    margin_score,
                    target_price: round2(target_price),
                    projected_margin: if margin.is_finite() {
                        margin * 100.0
                    } else {
                        -100.0
                    },
                    band,
                });
            }
        }
        if let Some(bid) = &best {
            info!(
                sku = %bid.sku,
                score = bid.combined_score,
                margin = bid.projected_margin,
                "recommended product"
            );
        }
        best
    }

    pub fn apply_discount(
        &self,
        breakdown: &PricingBreakdown,
        discount_percent: f64,
    ) -> Result<PricingBreakdown> {
        if !(0.0..=100.0).contains(&discount_percent) {
            return Err(TenderError::InvalidTicket(format!(
                "discount must be between 0 and 100, got {discount_percent}"
            )));
        }
        let discount = round2(breakdown.subtotal * discount_percent / 100.0);
        Ok(PricingBreakdown {
            subtotal: round2(breakdown.subtotal - discount),
            total: round2(breakdown.total - discount),
            ..breakdown.clone()
        })
    }

    pub fn cost_breakdown_report(&self, breakdown: &PricingBreakdown) -> CostReport {
        let share = |amount: f64| CostComponent {
            amount,
            percentage: if breakdown.total == 0.0 {
                0.0
            } else {
                round2(amount / breakdown.total * 100.0)
            },
        };
        CostReport {
            sku: breakdown.sku.clone(),
            quantity: breakdown.quantity,
            material_cost: share(breakdown.subtotal),
            testing_cost: share(breakdown.testing_cost),
            delivery_cost: share(breakdown.delivery_cost),
            urgency_premium: share(breakdown.urgency_adjustment),
            unit_price: breakdown.unit_price,
            total: breakdown.total,
            currency: breakdown.currency.clone(),
        }
    }
}

pub fn testing_cost(subtotal: f64, requirements: &[String], rules: &PricingRules) -> f64 {
    requirements
        .iter()
        .map(|requirement| {
            let lower = requirement.to_lowercase();
            if lower.contains("type") {
                subtotal * rules.type_test_rate
            } else if lower.contains("routine") {
                subtotal * rules.routine_test_rate
            } else if lower.contains("sample") {
                subtotal * rules.sample_test_rate
            } else {
                0.0
            }
        })
        .sum()
}

pub fn delivery_cost(quantity: u64, rules: &PricingRules) -> f64 {
    let excess = quantity.saturating_sub(rules.delivery_threshold);
    rules.delivery_base + rules.delivery_rate * excess as f64
}

pub fn urgency_adjustment(
    subtotal: f64,
    deadline: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    rules: &PricingRules,
) -> f64 {
    let Some(deadline) = deadline else {
        return 0.0;
    };
    let days = (deadline - now).num_days();
    rules
        .urgency_tiers
        .iter()
        .find(|tier| days < tier.within_days)
        .map(|tier| subtotal * tier.rate)
        .unwrap_or(0.0)
}

/// P25 / median / P75 of historical unit prices; `None` without history.
pub fn percentile_band(prices: &[f64]) -> Option<BidBand> {
    let mut sorted: Vec<f64> = prices.iter().copied().filter(|p| p.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = sorted.len();
    let median = if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    };
    let p25 = sorted[(n as f64 * 0.25) as usize];
    let p75 = sorted[((n as f64 * 0.75) as usize).min(n - 1)];
    Some(BidBand {
        p25,
        median,
        p75,
        source: BidBandSource::Historical,
        samples: n,
    })
}

pub fn synthetic_band(base_price: f64, rules: &PricingRules) -> BidBand {
    let median = base_price.max(0.0);
    BidBand {
        p25: median * rules.synthetic_low.min(1.0),
        median,
        p75: median * rules.synthetic_high.max(1.0),
        source: BidBandSource::Synthetic,
        samples: 0,
    }
}

/// 0 % margin maps to 0.5, +20 % to 1.0; negative margins decay toward 0.
pub fn margin_score(margin: f64) -> f64 {
    if margin.is_nan() {
        return 0.0;
    }
    (0.5 + margin * 2.5).clamp(0.0, 1.0)
}

pub fn combined_score(match_score: f64, margin_score: f64, rules: &PricingRules) -> f64 {
    match_score * rules.match_weight + margin_score * rules.margin_weight
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
