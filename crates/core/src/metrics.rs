use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::matching::StrategyKind;
use crate::model::Recommendation;
use crate::pipeline::TicketStatus;

/// One line of run history, written once per ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub rfp_id: String,
    pub status: TicketStatus,
    pub strategy: Option<StrategyKind>,
    pub fallback: bool,
    pub best_match_score: f64,
    pub recommended_sku: Option<String>,
    pub recommendation: Option<Recommendation>,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub runs: usize,
    pub failed: usize,
    pub approve: usize,
    pub review: usize,
    pub reject: usize,
    pub fallbacks: usize,
    pub average_best_match_score: f64,
    pub average_duration_ms: f64,
}

pub fn summarize(records: &[RunRecord]) -> PerformanceReport {
    let mut report = PerformanceReport {
        runs: records.len(),
        ..Default::default()
    };
    if records.is_empty() {
        return report;
    }
    let mut score_sum = 0.0;
    let mut scored = 0usize;
    let mut duration_sum = 0u64;
    for record in records {
        if record.status == TicketStatus::Failed {
            report.failed += 1;
        } else {
            score_sum += record.best_match_score;
            scored += 1;
        }
        if record.fallback {
            report.fallbacks += 1;
        }
        match record.recommendation {
            Some(Recommendation::Approve) => report.approve += 1,
            Some(Recommendation::Review) => report.review += 1,
            Some(Recommendation::Reject) => report.reject += 1,
            None => {}
        }
        duration_sum += record.duration_ms;
    }
    if scored > 0 {
        report.average_best_match_score = score_sum / scored as f64;
    }
    report.average_duration_ms = duration_sum as f64 / records.len() as f64;
    report
}
