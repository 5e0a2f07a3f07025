use serde::{Deserialize, Serialize};

use crate::metrics::RunMetrics;
use crate::transcript::Transcript;

/// Cause recorded when a run is cancelled between rounds or mid-call.
pub const CANCELLED_CAUSE: &str = "cancelled";

/// Terminal state of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoopOutcome {
    /// The model answered without calling a tool.
    Completed,
    /// Every round up to the limit ended in a tool call.
    RoundLimitExceeded { rounds: u32 },
    /// A model call failed for good; `round` is 1-based.
    Error { round: u32, cause: String },
}

impl LoopOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::RoundLimitExceeded { .. } => "round_limit_exceeded",
            Self::Error { .. } => "error",
        }
    }
}

/// Everything a finished run hands to its caller. The transcript is kept on
/// every outcome, including errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: LoopOutcome,
    pub transcript: Transcript,
    pub metrics: RunMetrics,
}
