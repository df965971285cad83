use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{
    Attribute, PricingBreakdown, ProductMatch, Recommendation, RfpTicket, Specification,
};
use crate::normalization::normalize_unit;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditRules {
    pub min_title_chars: usize,
    pub min_scope_chars: usize,
    pub min_deadline_days: i64,
    pub max_deadline_days: i64,
    pub required_specs: Vec<Attribute>,
    pub min_best_match: f64,
    pub min_average_match: f64,
    pub good_match: f64,
    pub alignment_depth: usize,
    pub max_voltage_levels: usize,
    pub max_testing_ratio: f64,
    pub max_delivery_ratio: f64,
    pub price_tolerance: f64,
    pub anomaly_deviation: f64,
    pub high_price_ratio: f64,
    pub low_price_ratio: f64,
    pub aggressive_ratio: f64,
    pub competitive_ratio: f64,
    pub rfp_reject_issues: usize,
    pub reject_issues: usize,
}

impl Default for AuditRules {
    fn default() -> Self {
        Self {
            min_title_chars: 10,
            min_scope_chars: 20,
            min_deadline_days: 3,
            max_deadline_days: 180,
            required_specs: vec![
                Attribute::Voltage,
                Attribute::ConductorSize,
                Attribute::ConductorMaterial,
            ],
            min_best_match: 0.70,
            min_average_match: 0.60,
            good_match: 0.85,
            alignment_depth: 3,
            max_voltage_levels: 2,
            max_testing_ratio: 0.15,
            max_delivery_ratio: 0.10,
            price_tolerance: 1.0,
            anomaly_deviation: 0.25,
            high_price_ratio: 1.3,
            low_price_ratio: 0.7,
            aggressive_ratio: 0.90,
            competitive_ratio: 1.05,
            rfp_reject_issues: 3,
            reject_issues: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RfpValidation {
    pub passed: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub completeness_score: f64,
    pub compliance_score: f64,
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchQuality {
    Good,
    Acceptable,
    Poor,
}

impl MatchQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchQuality::Good => "good",
            MatchQuality::Acceptable => "acceptable",
            MatchQuality::Poor => "poor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchValidation {
    pub passed: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub match_count: usize,
    pub best_match_score: f64,
    pub average_match_score: f64,
    pub quality: MatchQuality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceLevel {
    Aggressive,
    Competitive,
    Conservative,
    Unknown,
}

impl PriceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceLevel::Aggressive => "aggressive",
            PriceLevel::Competitive => "competitive",
            PriceLevel::Conservative => "conservative",
            PriceLevel::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingValidation {
    pub passed: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    /// Deviations from history; reported, never blocking.
    pub anomalies: Vec<String>,
    pub price_level: PriceLevel,
    pub historical_average: Option<f64>,
}

impl PricingValidation {
    fn score(&self) -> f64 {
        if !self.issues.is_empty() {
            0.0
        } else if !self.anomalies.is_empty() {
            0.8
        } else {
            1.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub rfp_id: String,
    pub rfp_validation: RfpValidation,
    pub match_validation: MatchValidation,
    pub pricing_validation: PricingValidation,
    pub recommendation: Recommendation,
    pub compliance_score: f64,
    pub critical_issues_count: usize,
    pub summary: String,
    pub audited_at: DateTime<Utc>,
}

/// Everything the auditor looks at for one ticket.
#[derive(Debug, Clone, Copy)]
pub struct AuditInput<'a> {
    pub ticket: &'a RfpTicket,
    pub specification: &'a Specification,
    pub matches: &'a [ProductMatch],
    pub pricing: Option<&'a PricingBreakdown>,
    pub historical_prices: &'a [f64],
}

#[derive(Debug, Clone, Default)]
pub struct AuditEngine {
    rules: AuditRules,
}

impl AuditEngine {
    pub fn new(rules: AuditRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &AuditRules {
        &self.rules
    }

    pub fn audit(&self, input: AuditInput<'_>, now: DateTime<Utc>) -> AuditReport {
        let rfp_validation = self.validate_rfp(input.ticket, input.specification, now);
        let match_validation = self.validate_matches(input.matches);
        let pricing_validation = self.validate_pricing(input.pricing, input.historical_prices);

        let critical_issues_count = rfp_validation.issues.len()
            + match_validation.issues.len()
            + pricing_validation.issues.len();
        let recommendation =
            if rfp_validation.passed && match_validation.passed && pricing_validation.passed {
                Recommendation::Approve
            } else if critical_issues_count > self.rules.reject_issues {
                Recommendation::Reject
            } else {
                Recommendation::Review
            };
        let match_score = if match_validation.passed { 1.0 } else { 0.0 };
        let compliance_score =
            (rfp_validation.compliance_score + match_score + pricing_validation.score()) / 3.0;
        let summary = summarize(&rfp_validation, &match_validation, &pricing_validation);

        info!(
            rfp_id = %input.ticket.rfp_id,
            recommendation = recommendation.as_str(),
            issues = critical_issues_count,
            score = compliance_score,
            "audit complete"
        );

        AuditReport {
            rfp_id: input.ticket.rfp_id.clone(),
            rfp_validation,
            match_validation,
            pricing_validation,
            recommendation,
            compliance_score,
            critical_issues_count,
            summary,
            audited_at: now,
        }
    }

    pub fn validate_rfp(
        &self,
        ticket: &RfpTicket,
        spec: &Specification,
        now: DateTime<Utc>,
    ) -> RfpValidation {
        let rules = &self.rules;
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        let mut missing = 0usize;
        if ticket.title.trim().chars().count() < rules.min_title_chars {
            issues.push("RFP title is missing or too short".to_string());
            missing += 1;
        }
        if ticket.scope.trim().chars().count() < rules.min_scope_chars {
            issues.push("RFP scope is missing or insufficient".to_string());
            missing += 1;
        }
        if ticket.deadline.is_none() {
            issues.push("Deadline is missing".to_string());
            missing += 1;
        }
        if ticket.source.as_deref().map_or(true, |s| s.trim().is_empty()) {
            issues.push("Source information is missing".to_string());
            missing += 1;
        }
        let completeness_score = (1.0 - missing as f64 * 0.25).max(0.0);

        let deadline_ok = match ticket.deadline {
            None => {
                issues.push("No deadline specified".to_string());
                false
            }
            Some(deadline) if deadline <= now => {
                let days = (now - deadline).num_days();
                issues.push(format!("Deadline has passed ({days} days ago)"));
                false
            }
            Some(deadline) => {
                let days = (deadline - now).num_days();
                if days < rules.min_deadline_days {
                    issues.push(format!("Deadline too soon ({days} days remaining)"));
                    false
                } else {
                    if days > rules.max_deadline_days {
                        warnings.push(format!("Deadline is very far ({days} days)"));
                    }
                    true
                }
            }
        };

        let specs_ok = if spec.attributes.filled_count() == 0 {
            issues.push("No specifications provided".to_string());
            false
        } else {
            let before = issues.len();
            for attribute in &rules.required_specs {
                if !spec.attributes.is_filled(*attribute) {
                    issues.push(format!(
                        "Missing required specification: {}",
                        attribute.as_str()
                    ));
                }
            }
            issues.len() == before
        };

        let has_testing = !ticket.testing_requirements.is_empty()
            || !spec.testing_requirements.is_empty();
        if !has_testing {
            warnings.push("No testing requirements specified".to_string());
        }

        let compliance_score = (completeness_score
            + if deadline_ok { 1.0 } else { 0.0 }
            + if specs_ok { 1.0 } else { 0.5 }
            + if has_testing { 1.0 } else { 0.8 })
            / 4.0;
        let recommendation = if issues.is_empty() {
            Recommendation::Approve
        } else if issues.len() > rules.rfp_reject_issues {
            Recommendation::Reject
        } else {
            Recommendation::Review
        };

        RfpValidation {
            passed: issues.is_empty(),
            issues,
            warnings,
            completeness_score,
            compliance_score,
            recommendation,
        }
    }

    pub fn validate_matches(&self, matches: &[ProductMatch]) -> MatchValidation {
        let rules = &self.rules;
        if matches.is_empty() {
            return MatchValidation {
                passed: false,
                issues: vec!["No product matches found".to_string()],
                warnings: Vec::new(),
                match_count: 0,
                best_match_score: 0.0,
                average_match_score: 0.0,
                quality: MatchQuality::Poor,
            };
        }

        let mut issues = Vec::new();
        let mut warnings = Vec::new();
        let best = matches
            .iter()
            .map(|m| m.match_score)
            .fold(f64::MIN, f64::max);
        let average = matches.iter().map(|m| m.match_score).sum::<f64>() / matches.len() as f64;

        if best < rules.min_best_match {
            issues.push(format!(
                "Best match score ({best:.2}) below minimum threshold ({:.2})",
                rules.min_best_match
            ));
        }
        if average < rules.min_average_match {
            warnings.push(format!("Average match score is low ({average:.2})"));
        }
        for m in matches.iter().take(rules.alignment_depth) {
            if m.alignment.as_ref().map_or(true, |a| a.is_empty()) {
                warnings.push(format!(
                    "Match {} missing specification alignment details",
                    m.sku
                ));
            }
        }
        let voltages: BTreeSet<String> = matches
            .iter()
            .filter_map(|m| m.attributes.get(Attribute::Voltage))
            .map(normalize_unit)
            .collect();
        if voltages.len() > rules.max_voltage_levels {
            warnings.push("Matches span multiple voltage levels - verify requirements".to_string());
        }

        let quality = if best >= rules.good_match {
            MatchQuality::Good
        } else if best >= rules.min_best_match {
            MatchQuality::Acceptable
        } else {
            MatchQuality::Poor
        };

        MatchValidation {
            passed: issues.is_empty(),
            issues,
            warnings,
            match_count: matches.len(),
            best_match_score: best,
            average_match_score: average,
            quality,
        }
    }

    pub fn validate_pricing(
        &self,
        pricing: Option<&PricingBreakdown>,
        historical_prices: &[f64],
    ) -> PricingValidation {
        let rules = &self.rules;
        let history: Vec<f64> = historical_prices
            .iter()
            .copied()
            .filter(|p| p.is_finite() && *p > 0.0)
            .collect();
        let historical_average =
            (!history.is_empty()).then(|| history.iter().sum::<f64>() / history.len() as f64);

        let Some(pricing) = pricing else {
            return PricingValidation {
                passed: false,
                issues: vec!["No pricing available for recommended product".to_string()],
                warnings: Vec::new(),
                anomalies: Vec::new(),
                price_level: PriceLevel::Unknown,
                historical_average,
            };
        };

        let mut issues = Vec::new();
        let mut warnings = Vec::new();
        let mut anomalies = Vec::new();

        if pricing.total <= 0.0 {
            issues.push("Total price is zero or negative".to_string());
        }
        if pricing.unit_price <= 0.0 {
            issues.push("Unit price is zero or negative".to_string());
        }
        if pricing.quantity == 0 {
            issues.push("Quantity is zero".to_string());
        }

        let expected_subtotal = pricing.unit_price * pricing.quantity as f64;
        if (pricing.subtotal - expected_subtotal).abs() > rules.price_tolerance {
            issues.push(format!(
                "Subtotal mismatch: {:.2} != {:.2} (unit_price * quantity)",
                pricing.subtotal, expected_subtotal
            ));
        }

        if pricing.subtotal > 0.0 {
            let testing_ratio = pricing.testing_cost / pricing.subtotal;
            if testing_ratio > rules.max_testing_ratio {
                warnings.push(format!(
                    "Testing cost is high ({:.1}% of subtotal)",
                    testing_ratio * 100.0
                ));
            }
            let delivery_ratio = pricing.delivery_cost / pricing.subtotal;
            if delivery_ratio > rules.max_delivery_ratio {
                warnings.push(format!(
                    "Delivery cost is high ({:.1}% of subtotal)",
                    delivery_ratio * 100.0
                ));
            }
        }

        if let Some(average) = historical_average {
            let deviation = (pricing.unit_price - average).abs() / average;
            if deviation > rules.anomaly_deviation {
                anomalies.push(format!(
                    "Price deviates {:.1}% from historical average ({average:.2})",
                    deviation * 100.0
                ));
                if pricing.unit_price > average * rules.high_price_ratio {
                    warnings.push("Price significantly higher than historical average".to_string());
                } else if pricing.unit_price < average * rules.low_price_ratio {
                    warnings.push(
                        "Price significantly lower than historical average - verify costs"
                            .to_string(),
                    );
                }
            }
        }

        let expected_total = pricing.component_sum();
        if (pricing.total - expected_total).abs() > rules.price_tolerance {
            issues.push(format!(
                "Total calculation error: {:.2} != {:.2}",
                pricing.total, expected_total
            ));
        }

        let price_level = match historical_average {
            None => PriceLevel::Unknown,
            Some(average) if pricing.unit_price < average * rules.aggressive_ratio => {
                PriceLevel::Aggressive
            }
            Some(average) if pricing.unit_price < average * rules.competitive_ratio => {
                PriceLevel::Competitive
            }
            Some(_) => PriceLevel::Conservative,
        };

        PricingValidation {
            passed: issues.is_empty(),
            issues,
            warnings,
            anomalies,
            price_level,
            historical_average,
        }
    }
}

fn summarize(rfp: &RfpValidation, matches: &MatchValidation, pricing: &PricingValidation) -> String {
    let mut parts = Vec::with_capacity(3);
    if rfp.passed {
        parts.push("RFP is compliant".to_string());
    } else {
        parts.push(format!("RFP has {} compliance issues", rfp.issues.len()));
    }
    if matches.passed {
        parts.push(format!("Product matches are {}", matches.quality.as_str()));
    } else {
        parts.push("Product matches need review".to_string());
    }
    if pricing.passed {
        parts.push(format!("Pricing is {}", pricing.price_level.as_str()));
    } else {
        parts.push("Pricing has issues".to_string());
    }
    format!("{}.", parts.join(". "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Alignment, AlignmentMap, SpecAttributes};
    use chrono::Duration;

    fn ticket(now: DateTime<Utc>, deadline_days: Option<i64>) -> RfpTicket {
        RfpTicket {
            rfp_id: "RFP-1".to_string(),
            title: "Supply of 11kV XLPE cables".to_string(),
            source: Some("tenders@utility.example".to_string()),
            deadline: deadline_days.map(|d| now + Duration::days(d)),
            scope: "11kV XLPE 3-core copper cable, 240 sq mm".to_string(),
            quantity: 1000,
            testing_requirements: vec!["Type Test".to_string()],
        }
    }

    fn spec() -> Specification {
        Specification {
            rfp_id: "RFP-1".to_string(),
            attributes: SpecAttributes {
                voltage: Some("11kV".to_string()),
                conductor_size: Some("240 sq mm".to_string()),
                conductor_material: Some("Copper".to_string()),
                ..Default::default()
            },
            testing_requirements: Default::default(),
            confidence: 0.8,
            raw_text_sample: String::new(),
        }
    }

    fn matched(sku: &str, score: f64, voltage: &str) -> ProductMatch {
        let mut alignment = AlignmentMap::new();
        alignment.insert(Attribute::Voltage, Alignment::ExactMatch);
        ProductMatch {
            sku: sku.to_string(),
            product_name: sku.to_string(),
            match_score: score,
            unit_price: 100.0,
            attributes: SpecAttributes {
                voltage: Some(voltage.to_string()),
                ..Default::default()
            },
            alignment: Some(alignment),
            datasheet_url: None,
        }
    }

    fn breakdown(unit_price: f64, quantity: u64) -> PricingBreakdown {
        let subtotal = unit_price * quantity as f64;
        PricingBreakdown {
            sku: "SKU".to_string(),
            unit_price,
            quantity,
            subtotal,
            testing_cost: 0.0,
            delivery_cost: 0.0,
            urgency_adjustment: 0.0,
            total: subtotal,
            currency: "INR".to_string(),
        }
    }

    #[test]
    fn complete_rfp_passes() {
        let now = Utc::now();
        let v = AuditEngine::default().validate_rfp(&ticket(now, Some(30)), &spec(), now);
        assert!(v.passed, "{:?}", v.issues);
        assert_eq!(v.completeness_score, 1.0);
        assert_eq!(v.compliance_score, 1.0);
        assert_eq!(v.recommendation, Recommendation::Approve);
    }

    #[test]
    fn deadline_feasibility() {
        let now = Utc::now();
        let engine = AuditEngine::default();
        let soon = engine.validate_rfp(&ticket(now, Some(2)), &spec(), now);
        assert!(soon.issues.iter().any(|i| i.starts_with("Deadline too soon")));
        let passed = engine.validate_rfp(&ticket(now, Some(-1)), &spec(), now);
        assert!(passed.issues.iter().any(|i| i.starts_with("Deadline has passed")));
        let far = engine.validate_rfp(&ticket(now, Some(200)), &spec(), now);
        assert!(far.passed);
        assert!(far.warnings.iter().any(|w| w.contains("very far")));
    }

    #[test]
    fn incomplete_rfp_loses_completeness() {
        let now = Utc::now();
        let mut t = ticket(now, None);
        t.title = "Cables".to_string();
        t.source = None;
        t.testing_requirements.clear();
        let mut s = spec();
        s.attributes.voltage = None;
        let v = AuditEngine::default().validate_rfp(&t, &s, now);
        assert_eq!(v.completeness_score, 0.25);
        assert!(v
            .issues
            .contains(&"Missing required specification: voltage".to_string()));
        assert!(v.warnings.contains(&"No testing requirements specified".to_string()));
        assert_eq!(v.recommendation, Recommendation::Reject);
        assert!((v.compliance_score - (0.25 + 0.0 + 0.5 + 0.8) / 4.0).abs() < 1e-9);
    }

    #[test]
    fn no_matches_is_an_issue() {
        let v = AuditEngine::default().validate_matches(&[]);
        assert!(!v.passed);
        assert_eq!(v.issues, vec!["No product matches found".to_string()]);
        assert_eq!(v.best_match_score, 0.0);
    }

    #[test]
    fn weak_and_scattered_matches() {
        let mut unaligned = matched("C", 0.4, "1.1kV");
        unaligned.alignment = None;
        let matches = vec![
            matched("A", 0.6, "11kV"),
            matched("B", 0.5, "33 kV"),
            unaligned,
        ];
        let v = AuditEngine::default().validate_matches(&matches);
        assert!(!v.passed);
        assert_eq!(v.quality, MatchQuality::Poor);
        assert!(v.warnings.iter().any(|w| w.contains("Average match score")));
        assert!(v.warnings.iter().any(|w| w.contains("Match C missing")));
        assert!(v.warnings.iter().any(|w| w.contains("voltage levels")));
    }

    #[test]
    fn same_voltage_in_different_notation_counts_once() {
        let matches = vec![
            matched("A", 0.9, "11kV"),
            matched("B", 0.9, "11 KV"),
            matched("C", 0.9, "33kV"),
        ];
        let v = AuditEngine::default().validate_matches(&matches);
        assert!(v.passed);
        assert_eq!(v.quality, MatchQuality::Good);
        assert!(v.warnings.is_empty());
    }

    #[test]
    fn pricing_sanity_issues() {
        let engine = AuditEngine::default();
        let mut bad = breakdown(0.0, 100);
        bad.total = 50.0;
        let v = engine.validate_pricing(Some(&bad), &[]);
        assert!(v.issues.contains(&"Unit price is zero or negative".to_string()));
        assert!(v.issues.iter().any(|i| i.starts_with("Total calculation error")));
        assert_eq!(v.price_level, PriceLevel::Unknown);

        let missing = engine.validate_pricing(None, &[]);
        assert!(!missing.passed);
    }

    #[test]
    fn cost_ratio_warnings() {
        let mut b = breakdown(10.0, 100);
        b.testing_cost = 200.0;
        b.delivery_cost = 150.0;
        b.total = b.component_sum();
        let v = AuditEngine::default().validate_pricing(Some(&b), &[]);
        assert!(v.passed);
        assert_eq!(v.warnings.len(), 2);
    }

    #[test]
    fn historical_deviation_is_an_anomaly() {
        let engine = AuditEngine::default();
        let v = engine.validate_pricing(Some(&breakdown(140.0, 10)), &[100.0, 100.0]);
        assert!(v.passed);
        assert_eq!(v.anomalies.len(), 1);
        assert!(v.warnings.iter().any(|w| w.contains("higher")));
        assert_eq!(v.price_level, PriceLevel::Conservative);

        let fine = engine.validate_pricing(Some(&breakdown(95.0, 10)), &[100.0]);
        assert!(fine.anomalies.is_empty());
        assert_eq!(fine.price_level, PriceLevel::Competitive);
        let cheap = engine.validate_pricing(Some(&breakdown(85.0, 10)), &[100.0]);
        assert_eq!(cheap.price_level, PriceLevel::Aggressive);
    }

    #[test]
    fn aggregate_recommendation() {
        let now = Utc::now();
        let engine = AuditEngine::default();
        let t = ticket(now, Some(30));
        let s = spec();
        let matches = vec![matched("SKU", 1.0, "11kV")];
        let pricing = breakdown(100.0, 1000);
        let report = engine.audit(
            AuditInput {
                ticket: &t,
                specification: &s,
                matches: &matches,
                pricing: Some(&pricing),
                historical_prices: &[],
            },
            now,
        );
        assert_eq!(report.recommendation, Recommendation::Approve);
        assert_eq!(report.critical_issues_count, 0);
        assert!((report.compliance_score - 1.0).abs() < 1e-9);
        assert_eq!(
            report.summary,
            "RFP is compliant. Product matches are good. Pricing is unknown."
        );

        let empty = engine.audit(
            AuditInput {
                ticket: &t,
                specification: &s,
                matches: &[],
                pricing: None,
                historical_prices: &[],
            },
            now,
        );
        assert_eq!(empty.recommendation, Recommendation::Review);
        assert_eq!(empty.critical_issues_count, 2);
    }

    #[test]
    fn reject_needs_more_than_five_issues() {
        let now = Utc::now();
        let engine = AuditEngine::default();
        let s = spec();
        let mut t = ticket(now, None);
        t.source = None;
        let audit = |t: &RfpTicket| {
            engine.audit(
                AuditInput {
                    ticket: t,
                    specification: &s,
                    matches: &[],
                    pricing: None,
                    historical_prices: &[],
                },
                now,
            )
        };

        let five = audit(&t);
        assert_eq!(five.critical_issues_count, 5);
        assert_eq!(five.recommendation, Recommendation::Review);

        t.title = "Cables".to_string();
        let six = audit(&t);
        assert_eq!(six.critical_issues_count, 6);
        assert_eq!(six.recommendation, Recommendation::Reject);
    }
}
