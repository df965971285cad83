use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, TenderError};
use crate::model::{
    Alignment, AlignmentMap, Attribute, CatalogItem, ProductMatch, SpecAttributes, Specification,
};
use crate::normalization::{is_numeric, normalize_unit};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchRules {
    /// Candidates scoring below this are discarded.
    pub min_score: f64,
    pub top_k: usize,
    /// How many leading matches carry per-attribute alignment detail.
    pub alignment_depth: usize,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            min_score: 0.3,
            top_k: 10,
            alignment_depth: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Vector,
    Rule,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Vector => "vector",
            StrategyKind::Rule => "rule",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = TenderError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "vector" => Ok(StrategyKind::Vector),
            "rule" => Ok(StrategyKind::Rule),
            other => Err(TenderError::Other(format!("unknown strategy '{other}'"))),
        }
    }
}

/// Why rule-based matching ran instead of the vector backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FallbackReason {
    ProbeFailed(String),
    SearchFailed(String),
    EmptyResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub matches: Vec<ProductMatch>,
    pub strategy: StrategyKind,
    pub fallback: Option<FallbackReason>,
}

impl MatchOutcome {
    pub fn best_score(&self) -> f64 {
        self.matches
            .iter()
            .map(|m| m.match_score)
            .fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub sku: String,
    pub score: f32,
}

/// Similarity search over embedded catalog items.
pub trait VectorIndex: Send + Sync {
    /// Cheap availability check, run once when a [`MatchEngine`] is built.
    fn probe(&self) -> Result<()>;
    fn search(&self, query: &str, top_k: usize) -> Result<Vec<VectorHit>>;
}

pub trait MatchStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;
    fn rank(
        &self,
        spec: &Specification,
        catalog: &[CatalogItem],
        top_k: usize,
    ) -> Result<Vec<ProductMatch>>;
}

/// Equal-weight specification match over [`Attribute::MATCHED`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleStrategy {
    rules: MatchRules,
}

impl RuleStrategy {
    pub fn new(rules: MatchRules) -> Self {
        Self { rules }
    }
}

impl MatchStrategy for RuleStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Rule
    }

    fn rank(
        &self,
        spec: &Specification,
        catalog: &[CatalogItem],
        top_k: usize,
    ) -> Result<Vec<ProductMatch>> {
        let mut matches: Vec<ProductMatch> = catalog
            .iter()
            .filter_map(|item| {
                let score = match_score(&spec.attributes, &item.attributes);
                (score >= self.rules.min_score && score > 0.0)
                    .then(|| product_match(item, score))
            })
            .collect();
        // Stable sort keeps catalog order among equal scores.
        matches.sort_by(|a, b| descending(a.match_score, b.match_score));
        matches.truncate(top_k);
        attach_alignment(&mut matches, &spec.attributes, self.rules.alignment_depth);
        Ok(matches)
    }
}

pub struct VectorStrategy {
    index: Arc<dyn VectorIndex>,
    rules: MatchRules,
}

impl VectorStrategy {
    pub fn new(index: Arc<dyn VectorIndex>, rules: MatchRules) -> Self {
        Self { index, rules }
    }
}

impl MatchStrategy for VectorStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Vector
    }

    fn rank(
        &self,
        spec: &Specification,
        catalog: &[CatalogItem],
        top_k: usize,
    ) -> Result<Vec<ProductMatch>> {
        let query = spec.search_query();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let hits = self.index.search(&query, top_k)?;
        let positions: HashMap<&str, usize> = catalog
            .iter()
            .enumerate()
            .map(|(idx, item)| (item.sku.as_str(), idx))
            .collect();
        let mut seen = HashSet::new();
        let mut ranked: Vec<(usize, ProductMatch)> = Vec::new();
        for hit in hits {
            let Some(&position) = positions.get(hit.sku.as_str()) else {
                debug!(sku = %hit.sku, "vector hit not in catalog snapshot");
                continue;
            };
            if !seen.insert(position) {
                continue;
            }
            let item = &catalog[position];
            let score = match_score(&spec.attributes, &item.attributes);
            if score < self.rules.min_score || score <= 0.0 {
                continue;
            }
            ranked.push((position, product_match(item, score)));
        }
        // Equal scores fall back to catalog order, same as the rule strategy.
        ranked.sort_by(|(pa, a), (pb, b)| {
            descending(a.match_score, b.match_score).then(pa.cmp(pb))
        });
        let mut matches: Vec<ProductMatch> =
            ranked.into_iter().take(top_k).map(|(_, m)| m).collect();
        attach_alignment(&mut matches, &spec.attributes, self.rules.alignment_depth);
        Ok(matches)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySelection {
    pub strategy: StrategyKind,
    pub reason: Option<FallbackReason>,
}

/// Ranks catalog items against a specification.
///
/// The vector backend, when given, is probed once at construction. Any
/// later vector failure degrades to [`RuleStrategy`] for that call and is
/// reported through [`MatchOutcome::fallback`]; callers never see an error.
pub struct MatchEngine {
    rules: MatchRules,
    rule: RuleStrategy,
    vector: Option<VectorStrategy>,
    selection: StrategySelection,
}

impl MatchEngine {
    pub fn new(rules: MatchRules) -> Self {
        Self {
            rules,
            rule: RuleStrategy::new(rules),
            vector: None,
            selection: StrategySelection {
                strategy: StrategyKind::Rule,
                reason: None,
            },
        }
    }

    pub fn with_vector(rules: MatchRules, index: Arc<dyn VectorIndex>) -> Self {
        let mut engine = Self::new(rules);
        match index.probe() {
            Ok(()) => {
                info!("vector matching available");
                engine.vector = Some(VectorStrategy::new(index, rules));
                engine.selection = StrategySelection {
                    strategy: StrategyKind::Vector,
                    reason: None,
                };
            }
            Err(err) => {
                warn!(error = %err, "vector backend probe failed; using rule matching");
                engine.selection = StrategySelection {
                    strategy: StrategyKind::Rule,
                    reason: Some(FallbackReason::ProbeFailed(err.to_string())),
                };
            }
        }
        engine
    }

    pub fn rules(&self) -> &MatchRules {
        &self.rules
    }

    pub fn selection(&self) -> &StrategySelection {
        &self.selection
    }

    pub fn match_products(
        &self,
        spec: &Specification,
        catalog: &[CatalogItem],
        top_k: usize,
    ) -> MatchOutcome {
        let mut fallback = self.selection.reason.clone();
        if let Some(vector) = &self.vector {
            match vector.rank(spec, catalog, top_k) {
                Ok(matches) if !matches.is_empty() => {
                    info!(rfp_id = %spec.rfp_id, count = matches.len(), "vector matching complete");
                    return MatchOutcome {
                        matches,
                        strategy: vector.kind(),
                        fallback: None,
                    };
                }
                Ok(_) => {
                    debug!(rfp_id = %spec.rfp_id, "vector search returned nothing; using rules");
                    fallback = Some(FallbackReason::EmptyResult);
                }
                Err(err) => {
                    warn!(rfp_id = %spec.rfp_id, error = %err, "vector search failed; using rules");
                    fallback = Some(FallbackReason::SearchFailed(err.to_string()));
                }
            }
        }
        let matches = self
            .rule
            .rank(spec, catalog, top_k)
            .unwrap_or_else(|err| {
                warn!(rfp_id = %spec.rfp_id, error = %err, "rule matching failed");
                Vec::new()
            });
        info!(rfp_id = %spec.rfp_id, count = matches.len(), "rule matching complete");
        MatchOutcome {
            matches,
            strategy: self.rule.kind(),
            fallback,
        }
    }
}

/// Share of the RFP's present attributes that the catalog item satisfies.
///
/// An RFP naming a single attribute that matches scores 1.0.
pub fn match_score(rfp: &SpecAttributes, product: &SpecAttributes) -> f64 {
    let mut total_params = 0usize;
    let mut match_count = 0usize;
    for attribute in Attribute::MATCHED {
        let Some(rfp_value) = rfp.get(attribute) else {
            continue;
        };
        total_params += 1;
        if let Some(product_value) = product.get(attribute) {
            if values_match(rfp_value, product_value) {
                match_count += 1;
            }
        }
    }
    if total_params == 0 {
        return 0.0;
    }
    match_count as f64 / total_params as f64
}

pub fn alignment(rfp: &SpecAttributes, product: &SpecAttributes) -> AlignmentMap {
    Attribute::MATCHED
        .iter()
        .map(|attribute| {
            let label = match (rfp.get(*attribute), product.get(*attribute)) {
                (Some(rfp_value), Some(product_value)) => {
                    if values_match(rfp_value, product_value) {
                        Alignment::ExactMatch
                    } else {
                        Alignment::PartialMatch
                    }
                }
                _ => Alignment::Missing,
            };
            (*attribute, label)
        })
        .collect()
}

/// Exact (case-insensitive) equality, then normalized equality, then
/// substring containment either way for non-numeric values.
pub fn values_match(rfp_value: &str, product_value: &str) -> bool {
    let rfp_trimmed = rfp_value.trim();
    let product_trimmed = product_value.trim();
    if rfp_trimmed.is_empty() || product_trimmed.is_empty() {
        return false;
    }
    if rfp_trimmed.to_lowercase() == product_trimmed.to_lowercase() {
        return true;
    }
    let rfp_norm = normalize_unit(rfp_trimmed);
    let product_norm = normalize_unit(product_trimmed);
    if rfp_norm.is_empty() || product_norm.is_empty() {
        return false;
    }
    if rfp_norm == product_norm {
        return true;
    }
    match (rfp_norm.parse::<f64>(), product_norm.parse::<f64>()) {
        (Ok(a), Ok(b)) => (a - b).abs() < 1e-9,
        _ if !is_numeric(&rfp_norm) && !is_numeric(&product_norm) => {
            rfp_norm.contains(&product_norm) || product_norm.contains(&rfp_norm)
        }
        _ => false,
    }
}

fn product_match(item: &CatalogItem, score: f64) -> ProductMatch {
    ProductMatch {
        sku: item.sku.clone(),
        product_name: item.name.clone(),
        match_score: score,
        unit_price: item.unit_price,
        attributes: item.attributes.clone(),
        alignment: None,
        datasheet_url: item.datasheet_url.clone(),
    }
}

fn attach_alignment(matches: &mut [ProductMatch], rfp: &SpecAttributes, depth: usize) {
    for m in matches.iter_mut().take(depth) {
        m.alignment = Some(alignment(rfp, &m.attributes));
    }
}

fn descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TenderError;
    use crate::normalization::SpecNormalizer;

    fn item(sku: &str, voltage: &str, material: &str, size: &str) -> CatalogItem {
        CatalogItem {
            sku: sku.to_string(),
            name: format!("{voltage} cable {size}"),
            category: "MV".to_string(),
            unit_price: 500.0,
            attributes: SpecAttributes {
                voltage: Some(voltage.to_string()),
                conductor_material: Some(material.to_string()),
                insulation_material: Some("XLPE".to_string()),
                conductor_size: Some(size.to_string()),
                cable_type: Some("3 core, armoured".to_string()),
                ..Default::default()
            },
            datasheet_url: None,
        }
    }

    fn spec(text: &str) -> Specification {
        SpecNormalizer::new().extract("RFP-T", text)
    }

    struct FailingIndex;

    impl VectorIndex for FailingIndex {
        fn probe(&self) -> Result<()> {
            Ok(())
        }

        fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<VectorHit>> {
            Err(TenderError::VectorBackend("connection refused".to_string()))
        }
    }

    struct DownIndex;

    impl VectorIndex for DownIndex {
        fn probe(&self) -> Result<()> {
            Err(TenderError::VectorBackend("no model".to_string()))
        }

        fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<VectorHit>> {
            unreachable!("probe failed, search must not run")
        }
    }

    struct FixedIndex(Vec<VectorHit>);

    impl VectorIndex for FixedIndex {
        fn probe(&self) -> Result<()> {
            Ok(())
        }

        fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<VectorHit>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn values_match_rules() {
        assert!(values_match("11kV", "11 KV"));
        assert!(values_match("11 kV", "11000"));
        assert!(values_match("Copper", "copper"));
        assert!(values_match("3 core", "3 core, armoured"));
        assert!(!values_match("11kV", "33kV"));
        assert!(!values_match("240 sq mm", "24 sq mm"));
        assert!(!values_match("", "XLPE"));
    }

    #[test]
    fn single_attribute_match_scores_one() {
        let rfp = SpecAttributes {
            insulation_material: Some("XLPE".to_string()),
            ..Default::default()
        };
        let product = item("A", "11kV", "Copper", "240 sq mm").attributes;
        assert_eq!(match_score(&rfp, &product), 1.0);
        assert_eq!(match_score(&SpecAttributes::default(), &product), 0.0);
    }

    #[test]
    fn ranks_with_ties_in_catalog_order() {
        let catalog = vec![
            item("AL-240", "11kV", "Aluminium", "240 sq mm"),
            item("CU-185", "11kV", "Copper", "185 sq mm"),
            item("CU-240", "11kV", "Copper", "240 sq mm"),
            item("CU-240-33", "33kV", "Copper", "240 sq mm"),
        ];
        let spec = spec("11kV XLPE copper cable 240 sq mm");
        let outcome = MatchEngine::new(MatchRules::default()).match_products(&spec, &catalog, 10);
        let skus: Vec<&str> = outcome.matches.iter().map(|m| m.sku.as_str()).collect();
        assert_eq!(skus, vec!["CU-240", "AL-240", "CU-185", "CU-240-33"]);
        assert_eq!(outcome.matches[0].match_score, 1.0);
        assert_eq!(outcome.strategy, StrategyKind::Rule);
        assert!(outcome.fallback.is_none());
        assert!(outcome.matches[..3].iter().all(|m| m.alignment.is_some()));
        assert!(outcome.matches[3].alignment.is_none());
    }

    #[test]
    fn discards_low_scores_and_truncates() {
        let catalog = vec![
            item("A", "33kV", "Aluminium", "95 sq mm"),
            item("B", "11kV", "Copper", "240 sq mm"),
            item("C", "11kV", "Copper", "240 sq mm"),
        ];
        let spec = spec("11kV PVC copper 240 sq mm");
        let outcome = MatchEngine::new(MatchRules::default()).match_products(&spec, &catalog, 1);
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].sku, "B");
    }

    #[test]
    fn alignment_labels() {
        let rfp = SpecAttributes {
            voltage: Some("11kV".to_string()),
            conductor_material: Some("Copper".to_string()),
            ..Default::default()
        };
        let product = item("A", "11kV", "Aluminium", "240 sq mm").attributes;
        let labels = alignment(&rfp, &product);
        assert_eq!(labels[&Attribute::Voltage], Alignment::ExactMatch);
        assert_eq!(labels[&Attribute::ConductorMaterial], Alignment::PartialMatch);
        assert_eq!(labels[&Attribute::ConductorSize], Alignment::Missing);
        assert_eq!(labels.len(), 5);
    }

    #[test]
    fn search_failure_falls_back_to_rules() {
        let catalog = vec![item("A", "11kV", "Copper", "240 sq mm")];
        let engine = MatchEngine::with_vector(MatchRules::default(), Arc::new(FailingIndex));
        assert_eq!(engine.selection().strategy, StrategyKind::Vector);
        let outcome = engine.match_products(&spec("11kV copper"), &catalog, 10);
        assert_eq!(outcome.strategy, StrategyKind::Rule);
        assert!(matches!(outcome.fallback, Some(FallbackReason::SearchFailed(_))));
        assert_eq!(outcome.matches.len(), 1);
    }

    #[test]
    fn probe_failure_selects_rules_once() {
        let catalog = vec![item("A", "11kV", "Copper", "240 sq mm")];
        let engine = MatchEngine::with_vector(MatchRules::default(), Arc::new(DownIndex));
        assert_eq!(engine.selection().strategy, StrategyKind::Rule);
        let outcome = engine.match_products(&spec("11kV copper"), &catalog, 10);
        assert_eq!(outcome.strategy, StrategyKind::Rule);
        assert_eq!(
            outcome.fallback,
            Some(FallbackReason::ProbeFailed("vector backend error: no model".to_string()))
        );
    }

    #[test]
    fn vector_hits_resolve_against_catalog() {
        let catalog = vec![
            item("A", "11kV", "Copper", "240 sq mm"),
            item("B", "33kV", "Copper", "185 sq mm"),
        ];
        let index = FixedIndex(vec![
            VectorHit { sku: "GHOST".to_string(), score: 0.99 },
            VectorHit { sku: "B".to_string(), score: 0.8 },
            VectorHit { sku: "A".to_string(), score: 0.7 },
            VectorHit { sku: "A".to_string(), score: 0.6 },
        ]);
        let engine = MatchEngine::with_vector(MatchRules::default(), Arc::new(index));
        let outcome = engine.match_products(&spec("11kV copper 240 sq mm"), &catalog, 10);
        assert_eq!(outcome.strategy, StrategyKind::Vector);
        assert!(outcome.fallback.is_none());
        let skus: Vec<&str> = outcome.matches.iter().map(|m| m.sku.as_str()).collect();
        assert_eq!(skus, vec!["A", "B"]);
        assert_eq!(outcome.matches[0].match_score, 1.0);
        assert!((outcome.matches[1].match_score - 1.0 / 3.0).abs() < 1e-9);
        assert!(outcome.matches[0].alignment.is_some());
    }

    #[test]
    fn vector_ties_follow_catalog_order() {
        let catalog = vec![
            item("FIRST", "11kV", "Copper", "240 sq mm"),
            item("SECOND", "11kV", "Copper", "240 sq mm"),
        ];
        let index = FixedIndex(vec![
            VectorHit { sku: "SECOND".to_string(), score: 0.9 },
            VectorHit { sku: "FIRST".to_string(), score: 0.5 },
        ]);
        let engine = MatchEngine::with_vector(MatchRules::default(), Arc::new(index));
        let outcome = engine.match_products(&spec("11kV copper 240 sq mm"), &catalog, 10);
        assert_eq!(outcome.strategy, StrategyKind::Vector);
        let ranked: Vec<(&str, f64)> = outcome
            .matches
            .iter()
            .map(|m| (m.sku.as_str(), m.match_score))
            .collect();
        assert_eq!(ranked, vec![("FIRST", 1.0), ("SECOND", 1.0)]);
    }

    #[test]
    fn empty_vector_result_is_recorded() {
        let catalog = vec![item("A", "11kV", "Copper", "240 sq mm")];
        let engine =
            MatchEngine::with_vector(MatchRules::default(), Arc::new(FixedIndex(Vec::new())));
        let outcome = engine.match_products(&spec("11kV copper"), &catalog, 10);
        assert_eq!(outcome.fallback, Some(FallbackReason::EmptyResult));
        assert_eq!(outcome.strategy, StrategyKind::Rule);
    }
}
