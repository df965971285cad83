use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::model::{Attribute, SpecAttributes, Specification, TestingRequirements};

const RAW_SAMPLE_CHARS: usize = 500;
const TESTING_HIT_SCALE: f64 = 10.0;
const TESTING_WEIGHT_CAP: f64 = 0.3;
const ATTRIBUTE_WEIGHT: f64 = 0.7;

/// Pattern-based extraction of a [`Specification`] from free tender text.
///
/// Every extractor is independent and returns the first hit of its
/// priority-ordered pattern list, or `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecNormalizer;

impl SpecNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, rfp_id: &str, text: &str) -> Specification {
        let attributes = SpecAttributes {
            voltage: extract_voltage(text),
            current: extract_current(text),
            conductor_material: extract_conductor_material(text),
            insulation_material: extract_insulation_material(text),
            conductor_size: extract_conductor_size(text),
            cable_type: extract_cable_type(text),
            length: extract_length(text),
            standards: extract_standards(text),
        };
        let testing_requirements = extract_testing_requirements(text);
        let confidence = confidence_score(&attributes, &testing_requirements);
        debug!(
            rfp_id,
            filled = attributes.filled_count(),
            testing_hits = testing_requirements.total_hits(),
            confidence,
            "extracted specification"
        );
        Specification {
            rfp_id: rfp_id.to_string(),
            attributes,
            testing_requirements,
            confidence,
            raw_text_sample: text.chars().take(RAW_SAMPLE_CHARS).collect(),
        }
    }
}

/// `0.7 × filled/8 + min(0.3, testing_hits/10)`, capped at 1.0.
pub fn confidence_score(attributes: &SpecAttributes, testing: &TestingRequirements) -> f64 {
    let filled = attributes.filled_count() as f64 / Attribute::ALL.len() as f64;
    let testing_bonus = (testing.total_hits() as f64 / TESTING_HIT_SCALE).min(TESTING_WEIGHT_CAP);
    (ATTRIBUTE_WEIGHT * filled + testing_bonus).min(1.0)
}

/// Maps an attribute value to a canonical comparable string.
///
/// `11 kV` becomes `11000`, `240 sq mm` becomes `240`, anything else is
/// lower-cased with whitespace removed. The mapping is idempotent.
pub fn normalize_unit(value: &str) -> String {
    let compact: String = value
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if compact.contains("kv") {
        if let Some(number) = leading_number(&compact) {
            return format_number(number * 1000.0);
        }
    }
    if compact.contains("mm") || compact.contains("sq") {
        if let Some(raw) = leading_number_str(&compact) {
            return raw.to_string();
        }
    }
    compact
}

pub fn is_numeric(value: &str) -> bool {
    !value.is_empty() && value.parse::<f64>().is_ok()
}

/// Collapses whitespace and strips punctuation outside `-.,;:()[]{}`.
pub fn clean_text(text: &str) -> String {
    static NOISE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s\-.,;:()\[\]{}]").unwrap());
    static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
    let stripped = NOISE_RE.replace_all(text, "");
    SPACE_RE.replace_all(&stripped, " ").trim().to_string()
}

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());

fn leading_number_str(value: &str) -> Option<&str> {
    NUMBER_RE.find(value).map(|m| m.as_str())
}

fn leading_number(value: &str) -> Option<f64> {
    leading_number_str(value).and_then(|raw| raw.parse::<f64>().ok())
}

fn format_number(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    format!("{rounded}")
}

/// First hit of an ordered pattern list; `group` selects the reported span.
fn first_match(text: &str, patterns: &[(&Regex, usize)]) -> Option<String> {
    for (pattern, group) in patterns {
        if let Some(caps) = pattern.captures(text) {
            if let Some(hit) = caps.get(*group) {
                let value = hit.as_str().trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

fn extract_voltage(text: &str) -> Option<String> {
    static KV_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)\b\d+(?:\.\d+)?\s*kv\b").unwrap());
    static RATED_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)rated\s+voltage[:\s]+(\d+(?:\.\d+)?\s*k?v)\b").unwrap()
    });
    static LABEL_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)\bvoltage[:\s]+(\d+(?:\.\d+)?\s*k?v)\b").unwrap());
    first_match(text, &[(&KV_RE, 0), (&RATED_RE, 1), (&LABEL_RE, 1)])
}

fn extract_current(text: &str) -> Option<String> {
    static AMP_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)\b\d+(?:\.\d+)?\s*(?:a|amps?|amperes?)\b").unwrap()
    });
    static LABEL_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)(?:rated\s+)?current[:\s]+(\d+(?:\.\d+)?\s*a)\b").unwrap()
    });
    first_match(text, &[(&AMP_RE, 0), (&LABEL_RE, 1)])
}

fn extract_conductor_material(text: &str) -> Option<String> {
    static MATERIALS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
        vec![
            (Regex::new(r"(?i)\bcopper\b").unwrap(), "Copper"),
            (Regex::new(r"(?i)\balumin(?:i)?um\b").unwrap(), "Aluminium"),
            (Regex::new(r"(?i)\bcu\b").unwrap(), "Copper"),
            (Regex::new(r"(?i)\bal\b").unwrap(), "Aluminium"),
        ]
    });
    MATERIALS
        .iter()
        .find(|(pattern, _)| pattern.is_match(text))
        .map(|(_, canonical)| canonical.to_string())
}

fn extract_insulation_material(text: &str) -> Option<String> {
    static MATERIALS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
        vec![
            (Regex::new(r"(?i)\bxlpe\b").unwrap(), "XLPE"),
            (Regex::new(r"(?i)\bpvc\b").unwrap(), "PVC"),
            (Regex::new(r"(?i)\bepr\b").unwrap(), "EPR"),
            (Regex::new(r"(?i)\bpe\b").unwrap(), "PE"),
            (Regex::new(r"(?i)\brubber\b").unwrap(), "Rubber"),
        ]
    });
    MATERIALS
        .iter()
        .find(|(pattern, _)| pattern.is_match(text))
        .map(|(_, canonical)| canonical.to_string())
}

fn extract_conductor_size(text: &str) -> Option<String> {
    static SQMM_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)\b\d+(?:\.\d+)?\s*sq\.?\s*mm\b").unwrap());
    static MM2_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)\b\d+(?:\.\d+)?\s*mm(?:²|2)").unwrap());
    static SECTION_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)cross[- ]section[:\s]+(\d+(?:\.\d+)?)").unwrap());
    first_match(text, &[(&SQMM_RE, 0), (&MM2_RE, 0), (&SECTION_RE, 1)])
}

fn extract_cable_type(text: &str) -> Option<String> {
    static CORE_COUNT_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)\b(\d+)[\s-]?core\b").unwrap());
    static KINDS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
        vec![
            (Regex::new(r"(?i)\bsingle[\s-]core\b").unwrap(), "single core"),
            (Regex::new(r"(?i)\bmulti[\s-]?core\b").unwrap(), "multi-core"),
            (Regex::new(r"(?i)\barmou?red\b").unwrap(), "armoured"),
            (Regex::new(r"(?i)\bunarmou?red\b").unwrap(), "unarmoured"),
            (Regex::new(r"(?i)\baerial\b").unwrap(), "aerial"),
            (Regex::new(r"(?i)\bunderground\b").unwrap(), "underground"),
        ]
    });
    let mut found: Vec<String> = Vec::new();
    if let Some(caps) = CORE_COUNT_RE.captures(text) {
        found.push(format!("{} core", &caps[1]));
    }
    for (pattern, label) in KINDS.iter() {
        if pattern.is_match(text) {
            found.push(label.to_string());
        }
    }
    if found.is_empty() {
        None
    } else {
        Some(found.join(", "))
    }
}

fn extract_length(text: &str) -> Option<String> {
    static LABEL_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)\blength[:\s]+(\d+(?:\.\d+)?\s*(?:km|m|meters|metres)?)\b").unwrap()
    });
    static UNIT_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)\b\d+(?:\.\d+)?\s*(?:km|m|meters|metres)\b").unwrap()
    });
    if let Some(value) = first_match(text, &[(&LABEL_RE, 1)]) {
        return Some(value);
    }
    // A bare distance only counts when "length" appears close by.
    for hit in UNIT_RE.find_iter(text) {
        let start = floor_char_boundary(text, hit.start().saturating_sub(20));
        let end = ceil_char_boundary(text, (hit.end() + 20).min(text.len()));
        if text[start..end].to_lowercase().contains("length") {
            return Some(hit.as_str().trim().to_string());
        }
    }
    None
}

fn extract_standards(text: &str) -> Vec<String> {
    static STANDARD_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
        vec![
            Regex::new(r"\bIEC\s*\d+(?:[-/]\d+)*").unwrap(),
            Regex::new(r"\bIS\s*\d+").unwrap(),
            Regex::new(r"\bBS\s*\d+").unwrap(),
            Regex::new(r"\bASTM\s*[A-Z]\d+").unwrap(),
            Regex::new(r"\bIEEE\s*\d+").unwrap(),
        ]
    });
    let mut standards: Vec<String> = Vec::new();
    for pattern in STANDARD_RES.iter() {
        for hit in pattern.find_iter(text) {
            let value = hit.as_str().trim().to_string();
            if !standards.contains(&value) {
                standards.push(value);
            }
        }
    }
    standards
}

const TYPE_TEST_KEYWORDS: [&str; 6] = [
    "type test",
    "voltage test",
    "impulse test",
    "partial discharge",
    "thermal test",
    "flame test",
];

const ROUTINE_TEST_KEYWORDS: [&str; 5] = [
    "routine test",
    "conductor resistance",
    "voltage test",
    "continuity test",
    "insulation resistance",
];

const SAMPLE_TEST_KEYWORDS: [&str; 3] = ["sample test", "acceptance test", "bending test"];

fn extract_testing_requirements(text: &str) -> TestingRequirements {
    let lower = text.to_lowercase();
    let hits = |keywords: &[&str]| -> Vec<String> {
        keywords
            .iter()
            .filter(|keyword| lower.contains(*keyword))
            .map(|keyword| keyword.to_string())
            .collect()
    };
    TestingRequirements {
        type_tests: hits(&TYPE_TEST_KEYWORDS),
        routine_tests: hits(&ROUTINE_TEST_KEYWORDS),
        sample_tests: hits(&SAMPLE_TEST_KEYWORDS),
    }
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_units() {
        assert_eq!(normalize_unit("11 kV"), "11000");
        assert_eq!(normalize_unit("1.1kV"), "1100");
        assert_eq!(normalize_unit("240 sq mm"), "240");
        assert_eq!(normalize_unit("185sqmm"), "185");
        assert_eq!(normalize_unit("3 Core, Armoured"), "3core,armoured");
        assert_eq!(normalize_unit("Copper"), "copper");
    }

    #[test]
    fn normalization_is_idempotent_on_samples() {
        for value in ["11 kV", "0.415 kV", "95 mm2", "sq", "XLPE", "kv", "  PVC  "] {
            let once = normalize_unit(value);
            assert_eq!(normalize_unit(&once), once, "value {value}");
        }
    }

    #[test]
    fn extracts_core_attributes() {
        let spec = SpecNormalizer::new().extract(
            "RFP-1",
            "11kV XLPE 3-core copper cable, 240 sq mm armoured to IEC 60502-2 and IS 7098",
        );
        let attrs = &spec.attributes;
        assert_eq!(attrs.voltage.as_deref(), Some("11kV"));
        assert_eq!(attrs.insulation_material.as_deref(), Some("XLPE"));
        assert_eq!(attrs.conductor_material.as_deref(), Some("Copper"));
        assert_eq!(attrs.conductor_size.as_deref(), Some("240 sq mm"));
        assert_eq!(attrs.cable_type.as_deref(), Some("3 core, armoured"));
        assert_eq!(attrs.standards, vec!["IEC 60502-2", "IS 7098"]);
        assert!(attrs.current.is_none());
        assert!(attrs.length.is_none());
    }

    #[test]
    fn absent_attributes_are_none() {
        let spec = SpecNormalizer::new().extract("RFP-2", "Supply of office furniture");
        assert_eq!(spec.attributes, SpecAttributes::default());
        assert_eq!(spec.confidence, 0.0);
    }

    #[test]
    fn copper_does_not_imply_pe_insulation() {
        let spec = SpecNormalizer::new().extract("RFP-3", "copper conductor");
        assert!(spec.attributes.insulation_material.is_none());
    }

    #[test]
    fn length_requires_nearby_keyword() {
        let spec = SpecNormalizer::new().extract("RFP-4", "Total length 500 m of cable");
        assert_eq!(spec.attributes.length.as_deref(), Some("500 m"));
        let spec = SpecNormalizer::new().extract("RFP-5", "deliver within 500 m of site");
        assert!(spec.attributes.length.is_none());
    }

    #[test]
    fn confidence_rewards_testing_keywords() {
        let spec = SpecNormalizer::new().extract(
            "RFP-6",
            "11kV cable; type test, routine test and voltage test required",
        );
        assert_eq!(spec.attributes.filled_count(), 1);
        // "voltage test" counts in both the type and routine groups.
        assert_eq!(spec.testing_requirements.total_hits(), 4);
        let expected = 0.7 * (1.0 / 8.0) + 0.3;
        assert!((spec.confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn raw_sample_respects_char_boundaries() {
        let text = "é".repeat(600);
        let spec = SpecNormalizer::new().extract("RFP-7", &text);
        assert_eq!(spec.raw_text_sample.chars().count(), 500);
    }

    #[test]
    fn clean_text_strips_noise() {
        assert_eq!(clean_text("  11kV\t\tcable!!  (armoured) "), "11kV cable (armoured)");
    }
}
