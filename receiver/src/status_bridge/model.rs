use scattercore::pipeline::{GraphSnapshot, PipelineState};
use scattercore::telemetry::{MetricsSnapshot, ReportSummary};
use serde::Serialize;
use std::collections::VecDeque;

/// Summaries kept for `GET /reports`.
pub const RECENT_REPORTS: usize = 64;

/// What the status bridge serves.
#[derive(Debug, Clone, Serialize)]
pub struct StatusModel {
    pub state: PipelineState,
    pub decimation_ratio: Option<usize>,
    pub graph: GraphSnapshot,
    pub telemetry: MetricsSnapshot,
    pub recent_reports: VecDeque<ReportSummary>,
}

impl Default for StatusModel {
    fn default() -> Self {
        Self {
            state: PipelineState::Constructed,
            decimation_ratio: None,
            graph: GraphSnapshot::default(),
            telemetry: MetricsSnapshot::default(),
            recent_reports: VecDeque::with_capacity(RECENT_REPORTS),
        }
    }
}

impl StatusModel {
    pub fn push_report(&mut self, summary: &ReportSummary) {
        if self.recent_reports.len() == RECENT_REPORTS {
            self.recent_reports.pop_front();
        }
        self.recent_reports.push_back(summary.clone());
    }
}
