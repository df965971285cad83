use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TenderError;

/// Technical attributes extracted from tender text or declared by a catalog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Voltage,
    Current,
    ConductorMaterial,
    InsulationMaterial,
    ConductorSize,
    CableType,
    Length,
    Standards,
}

impl Attribute {
    pub const ALL: [Attribute; 8] = [
        Attribute::Voltage,
        Attribute::Current,
        Attribute::ConductorMaterial,
        Attribute::InsulationMaterial,
        Attribute::ConductorSize,
        Attribute::CableType,
        Attribute::Length,
        Attribute::Standards,
    ];

    /// Attributes compared by the rule-based matcher, in scoring order.
    pub const MATCHED: [Attribute; 5] = [
        Attribute::Voltage,
        Attribute::ConductorSize,
        Attribute::ConductorMaterial,
        Attribute::InsulationMaterial,
        Attribute::CableType,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Attribute::Voltage => "voltage",
            Attribute::Current => "current",
            Attribute::ConductorMaterial => "conductor_material",
            Attribute::InsulationMaterial => "insulation_material",
            Attribute::ConductorSize => "conductor_size",
            Attribute::CableType => "cable_type",
            Attribute::Length => "length",
            Attribute::Standards => "standards",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecAttributes {
    #[serde(default)]
    pub voltage: Option<String>,
    #[serde(default)]
    pub current: Option<String>,
    #[serde(default)]
    pub conductor_material: Option<String>,
    #[serde(default)]
    pub insulation_material: Option<String>,
    #[serde(default)]
    pub conductor_size: Option<String>,
    #[serde(default)]
    pub cable_type: Option<String>,
    #[serde(default)]
    pub length: Option<String>,
    #[serde(default)]
    pub standards: Vec<String>,
}

impl SpecAttributes {
    /// Scalar value of an attribute. `Standards` is list-valued and always
    /// yields `None` here; read `standards` directly.
    pub fn get(&self, attribute: Attribute) -> Option<&str> {
        let value = match attribute {
            Attribute::Voltage => &self.voltage,
            Attribute::Current => &self.current,
            Attribute::ConductorMaterial => &self.conductor_material,
            Attribute::InsulationMaterial => &self.insulation_material,
            Attribute::ConductorSize => &self.conductor_size,
            Attribute::CableType => &self.cable_type,
            Attribute::Length => &self.length,
            Attribute::Standards => return None,
        };
        value
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn is_filled(&self, attribute: Attribute) -> bool {
        match attribute {
            Attribute::Standards => !self.standards.is_empty(),
            other => self.get(other).is_some(),
        }
    }

    pub fn filled_count(&self) -> usize {
        Attribute::ALL
            .iter()
            .filter(|attribute| self.is_filled(**attribute))
            .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestingRequirements {
    #[serde(default)]
    pub type_tests: Vec<String>,
    #[serde(default)]
    pub routine_tests: Vec<String>,
    #[serde(default)]
    pub sample_tests: Vec<String>,
}

impl TestingRequirements {
    pub fn total_hits(&self) -> usize {
        self.type_tests.len() + self.routine_tests.len() + self.sample_tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_hits() == 0
    }
}

/// Canonical technical requirement set for one tender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specification {
    pub rfp_id: String,
    pub attributes: SpecAttributes,
    #[serde(default)]
    pub testing_requirements: TestingRequirements,
    pub confidence: f64,
    #[serde(default)]
    pub raw_text_sample: String,
}

impl Specification {
    /// Free-text query used by similarity search backends.
    pub fn search_query(&self) -> String {
        let attrs = &self.attributes;
        let mut parts = Vec::new();
        if let Some(voltage) = attrs.get(Attribute::Voltage) {
            parts.push(format!("voltage {voltage}"));
        }
        if let Some(cable_type) = attrs.get(Attribute::CableType) {
            parts.push(cable_type.to_string());
        }
        if let Some(material) = attrs.get(Attribute::ConductorMaterial) {
            parts.push(format!("{material} conductor"));
        }
        if let Some(insulation) = attrs.get(Attribute::InsulationMaterial) {
            parts.push(format!("{insulation} insulation"));
        }
        if let Some(size) = attrs.get(Attribute::ConductorSize) {
            parts.push(format!("{size} cross section"));
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    pub unit_price: f64,
    #[serde(default)]
    pub attributes: SpecAttributes,
    #[serde(default)]
    pub datasheet_url: Option<String>,
}

impl CatalogItem {
    /// Text indexed by similarity backends for this item.
    pub fn embedding_text(&self) -> String {
        let attrs = &self.attributes;
        let mut parts = vec![self.name.clone()];
        for attribute in Attribute::MATCHED {
            if let Some(value) = attrs.get(attribute) {
                parts.push(value.to_string());
            }
        }
        if !self.category.is_empty() {
            parts.push(self.category.clone());
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    ExactMatch,
    PartialMatch,
    Missing,
}

pub type AlignmentMap = BTreeMap<Attribute, Alignment>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductMatch {
    pub sku: String,
    pub product_name: String,
    pub match_score: f64,
    /// Catalog base price at match time.
    pub unit_price: f64,
    /// Catalog attributes of the matched item.
    #[serde(default)]
    pub attributes: SpecAttributes,
    #[serde(default)]
    pub alignment: Option<AlignmentMap>,
    #[serde(default)]
    pub datasheet_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingBreakdown {
    pub sku: String,
    pub unit_price: f64,
    pub quantity: u64,
    pub subtotal: f64,
    pub testing_cost: f64,
    pub delivery_cost: f64,
    pub urgency_adjustment: f64,
    pub total: f64,
    pub currency: String,
}

impl PricingBreakdown {
    pub fn component_sum(&self) -> f64 {
        self.subtotal + self.testing_cost + self.delivery_cost + self.urgency_adjustment
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidBandSource {
    Historical,
    Synthetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BidBand {
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub source: BidBandSource,
    pub samples: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Approve,
    Review,
    Reject,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Approve => "APPROVE",
            Recommendation::Review => "REVIEW",
            Recommendation::Reject => "REJECT",
        }
    }
}

impl FromStr for Recommendation {
    type Err = TenderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "APPROVE" => Ok(Recommendation::Approve),
            "REVIEW" => Ok(Recommendation::Review),
            "REJECT" => Ok(Recommendation::Reject),
            other => Err(TenderError::Other(format!("unknown recommendation '{other}'"))),
        }
    }
}

/// One tender entering the pipeline: raw scope text plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RfpTicket {
    pub rfp_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scope: String,
    #[serde(default = "default_quantity")]
    pub quantity: u64,
    #[serde(default)]
    pub testing_requirements: Vec<String>,
}

fn default_quantity() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_do_not_count_as_filled() {
        let attrs = SpecAttributes {
            voltage: Some("  ".to_string()),
            conductor_size: Some("240 sq mm".to_string()),
            standards: vec!["IEC 60502".to_string()],
            ..Default::default()
        };
        assert!(!attrs.is_filled(Attribute::Voltage));
        assert!(attrs.is_filled(Attribute::ConductorSize));
        assert!(attrs.is_filled(Attribute::Standards));
        assert_eq!(attrs.filled_count(), 2);
    }

    #[test]
    fn alignment_map_serializes_with_attribute_keys() {
        let mut alignment = AlignmentMap::new();
        alignment.insert(Attribute::ConductorSize, Alignment::ExactMatch);
        alignment.insert(Attribute::Voltage, Alignment::Missing);
        let json = serde_json::to_value(&alignment).unwrap();
        assert_eq!(json["conductor_size"], "exact_match");
        assert_eq!(json["voltage"], "missing");
    }

    #[test]
    fn ticket_defaults_quantity() {
        let ticket: RfpTicket =
            serde_json::from_str(r#"{"rfp_id":"RFP-1","scope":"11kV cable"}"#).unwrap();
        assert_eq!(ticket.quantity, 1000);
        assert!(ticket.deadline.is_none());
        assert_eq!(Recommendation::Reject.as_str(), "REJECT");
        assert_eq!(
            serde_json::to_value(Recommendation::Approve).unwrap(),
            "APPROVE"
        );
    }
}
