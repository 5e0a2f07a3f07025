//! Bounded conversation between a chat backend and the tool sandbox.

mod driver;
mod metrics;
mod outcome;
mod transcript;

pub use driver::{ConversationLoop, LoopConfig, DEFAULT_MAX_ROUNDS};
pub use metrics::RunMetrics;
pub use outcome::{LoopOutcome, RunReport, CANCELLED_CAUSE};
pub use transcript::Transcript;
