use std::fmt;

use serde::{Deserialize, Serialize};

use super::model::{QaVerdict, RetryLedger};

/// The phases of one generation job.
///
/// Each job flows through:
/// PLANNING → PROMPTING → RENDERING → CHECKING → (REPAIRING → CHECKING)* → DONE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Planning,
    Prompting,
    Rendering,
    Checking,
    Repairing,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Planning => write!(f, "PLANNING"),
            Phase::Prompting => write!(f, "PROMPTING"),
            Phase::Rendering => write!(f, "RENDERING"),
            Phase::Checking => write!(f, "CHECKING"),
            Phase::Repairing => write!(f, "REPAIRING"),
            Phase::Done => write!(f, "DONE"),
        }
    }
}

impl Phase {
    /// Compute the next phase from the latest verdicts and the retry ledger.
    ///
    /// The only branching point is `Checking`:
    /// - every cut passed → `Done`;
    /// - some cut failed and still has repair budget → `Repairing`;
    /// - every failing cut has exhausted its budget → `Done`, with the
    ///   remaining FAILs left for final classification.
    ///
    /// Pure function over its inputs, so the whole loop shape is testable
    /// without a backend.
    pub fn next(self, qa_results: &[QaVerdict], retries: &RetryLedger, max_retries: u32) -> Phase {
        match self {
            Phase::Planning => Phase::Prompting,
            Phase::Prompting => Phase::Rendering,
            Phase::Rendering => Phase::Checking,
            Phase::Checking => {
                let mut failing = qa_results.iter().filter(|v| v.failing()).peekable();
                if failing.peek().is_none() {
                    return Phase::Done;
                }
                if failing.any(|v| retries.has_budget(v.cut_index, max_retries)) {
                    Phase::Repairing
                } else {
                    Phase::Done
                }
            }
            Phase::Repairing => Phase::Checking,
            Phase::Done => Phase::Done,
        }
    }
}
