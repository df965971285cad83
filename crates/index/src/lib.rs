use std::fs;
use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use tenderflow_core::PipelineRun;

/// One awarded price row as exchanged in history files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryRecord {
    pub sku: String,
    pub unit_price: f64,
    #[serde(default)]
    pub awarded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rfp_id: Option<String>,
}

/// Flattened outcome of one ticket, written by batch evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RunSummaryRecord {
    pub rfp_id: String,
    pub status: String,
    pub strategy: Option<String>,
    pub fallback: bool,
    pub best_match_score: f64,
    pub recommended_sku: Option<String>,
    pub total: Option<f64>,
    pub currency: Option<String>,
    pub recommendation: Option<String>,
    pub compliance_score: Option<f64>,
    #[serde(default)]
    pub issues: Vec<String>,
    pub failure: Option<String>,
    pub duration_ms: u64,
}

impl From<&PipelineRun> for RunSummaryRecord {
    fn from(run: &PipelineRun) -> Self {
        let recommended = run
            .pricing
            .as_ref()
            .and_then(|pricing| pricing.recommended_breakdown());
        let issues = run
            .audit
            .as_ref()
            .map(|audit| {
                audit
                    .rfp_validation
                    .issues
                    .iter()
                    .chain(&audit.match_validation.issues)
                    .chain(&audit.pricing_validation.issues)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Self {
            rfp_id: run.rfp_id.clone(),
            status: run.status.as_str().to_string(),
            strategy: run
                .matches
                .as_ref()
                .map(|m| m.strategy.as_str().to_string()),
            fallback: run
                .matches
                .as_ref()
                .map(|m| m.fallback.is_some())
                .unwrap_or(false),
            best_match_score: run.matches.as_ref().map(|m| m.best_score()).unwrap_or(0.0),
            recommended_sku: run.recommended_sku().map(str::to_string),
            total: recommended.map(|b| b.total),
            currency: recommended.map(|b| b.currency.clone()),
            recommendation: run.recommendation().map(|r| r.as_str().to_string()),
            compliance_score: run.audit.as_ref().map(|a| a.compliance_score),
            issues,
            failure: run
                .failure
                .as_ref()
                .map(|f| format!("{}: {}", f.stage.as_str(), f.message)),
            duration_ms: run.duration_ms,
        }
    }
}

pub struct JsonlWriter<W> {
    writer: W,
}

impl<W: Write> JsonlWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let mut buf = serde_json::to_vec(record)?;
        buf.push(b'\n');
        self.writer.write_all(&buf)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Reads one record per non-blank line.
pub fn read_jsonl<T: DeserializeOwned, R: BufRead>(reader: R) -> Result<Vec<T>> {
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("invalid record on line {}", idx + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// Loads a JSON array or a JSONL file, whichever the content is.
pub fn load_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let trimmed = contents.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|e| anyhow!("invalid JSON in {}: {e}", path.display()))
    } else {
        read_jsonl(contents.as_bytes()).with_context(|| format!("in {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn jsonl_writer_roundtrips_records() {
        let record = HistoryRecord {
            sku: "XLPE-11KV-240".to_string(),
            unit_price: 845.5,
            awarded_at: None,
            rfp_id: Some("RFP-2023-11".to_string()),
        };
        let mut writer = JsonlWriter::new(Vec::new());
        writer.write_record(&record).unwrap();
        writer.write_record(&record).unwrap();
        let buf = writer.into_inner();
        assert!(buf.ends_with(b"\n"));
        let parsed: Vec<HistoryRecord> = read_jsonl(buf.as_slice()).unwrap();
        assert_eq!(parsed, vec![record.clone(), record]);
    }

    #[test]
    fn read_jsonl_reports_line_numbers() {
        let input = "{\"sku\":\"A\",\"unit_price\":1.0}\n\nnot json\n";
        let err = read_jsonl::<HistoryRecord, _>(input.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn load_records_accepts_array_and_lines() {
        let dir = tempdir().unwrap();
        let array = dir.path().join("h.json");
        fs::write(&array, r#"[{"sku":"A","unit_price":1.5},{"sku":"B","unit_price":2.0}]"#).unwrap();
        let lines = dir.path().join("h.jsonl");
        fs::write(&lines, "{\"sku\":\"A\",\"unit_price\":1.5}\n").unwrap();
        assert_eq!(load_records::<HistoryRecord>(&array).unwrap().len(), 2);
        assert_eq!(load_records::<HistoryRecord>(&lines).unwrap()[0].sku, "A");
    }
}
