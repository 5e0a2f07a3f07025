use conversation::{LoopOutcome, RunMetrics, RunReport, Transcript};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::RunStoreError;

pub const RUN_RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunRecordType {
    Run,
}

/// One JSONL line describing a finished task run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunRecord {
    #[serde(rename = "type")]
    pub record_type: RunRecordType,
    pub version: u32,
    pub run_id: String,
    pub created_at: String,
    pub task_id: String,
    pub model: String,
    pub outcome: String,
    pub passed: bool,
    #[serde(default)]
    pub failed_round: Option<u32>,
    #[serde(default)]
    pub error_cause: Option<String>,
    pub metrics: RunMetrics,
    pub transcript: Transcript,
}

impl RunRecord {
    /// Record for `report`, stamped with a fresh run id and the current time.
    pub fn from_report(
        task_id: impl Into<String>,
        model: impl Into<String>,
        report: &RunReport,
        passed: bool,
    ) -> Result<Self, RunStoreError> {
        let created_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(RunStoreError::ClockFormat)?;
        let (failed_round, error_cause) = match &report.outcome {
            LoopOutcome::Error { round, cause } => (Some(*round), Some(cause.clone())),
            _ => (None, None),
        };

        Ok(Self {
            record_type: RunRecordType::Run,
            version: RUN_RECORD_VERSION,
            run_id: Uuid::new_v4().to_string(),
            created_at,
            task_id: task_id.into(),
            model: model.into(),
            outcome: report.outcome.label().to_string(),
            passed,
            failed_round,
            error_cause,
            metrics: report.metrics.clone(),
            transcript: report.transcript.clone(),
        })
    }
}
