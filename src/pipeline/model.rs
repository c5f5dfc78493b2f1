//! Data model for one generation job: the request, the planned storyboard,
//! the per-cut working artifacts and the retry ledger.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FourcutError;

/// Upper bound on cuts per strip.
pub const MAX_CUTS: u32 = 12;
/// Upper bound on the per-cut repair budget.
pub const MAX_RETRY_BUDGET: u32 = 5;

/// Everything a caller supplies to start one generation job.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub diary: String,
    pub num_cuts: u32,
    pub style_guide: String,
    pub max_retries: u32,
    /// Optional portrait anchoring the recurring character's look.
    pub reference_image: Option<Vec<u8>>,
}

impl GenerateRequest {
    pub fn validate(&self) -> Result<(), FourcutError> {
        if self.diary.trim().is_empty() {
            return Err(FourcutError::InvalidRequest(
                "diary text must not be empty".into(),
            ));
        }
        if !(1..=MAX_CUTS).contains(&self.num_cuts) {
            return Err(FourcutError::InvalidRequest(format!(
                "num_cuts must be between 1 and {MAX_CUTS}, got {}",
                self.num_cuts
            )));
        }
        if self.max_retries > MAX_RETRY_BUDGET {
            return Err(FourcutError::InvalidRequest(format!(
                "max_retries must be at most {MAX_RETRY_BUDGET}, got {}",
                self.max_retries
            )));
        }
        Ok(())
    }
}

/// One planned panel of the strip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cut {
    /// 1-based, unique, stable for the job's lifetime.
    pub cut_index: u32,
    pub summary: String,
    pub emotion: String,
    pub scene: String,
    #[serde(default)]
    pub dialogue: Option<String>,
    #[serde(default)]
    pub camera: Option<String>,
}

/// The planned sequence of cuts. Produced once, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Storyboard {
    pub cuts: Vec<Cut>,
    /// One sentence fixing how the diarist looks across the whole strip.
    #[serde(default)]
    pub character_appearance: Option<String>,
}

impl Storyboard {
    /// Check the planned cuts against the requested count and the
    /// contiguous-index invariant (`1..=expected_cuts`, no gaps, no dupes).
    pub fn validate(&self, expected_cuts: u32) -> Result<(), String> {
        if self.cuts.len() as u32 != expected_cuts {
            return Err(format!(
                "expected {expected_cuts} cuts, model produced {}",
                self.cuts.len()
            ));
        }
        let mut indices: Vec<u32> = self.cuts.iter().map(|c| c.cut_index).collect();
        indices.sort_unstable();
        if !indices.iter().copied().eq(1..=expected_cuts) {
            return Err(format!(
                "cut indices {indices:?} are not the contiguous range 1..={expected_cuts}"
            ));
        }
        Ok(())
    }

    pub fn cut(&self, cut_index: u32) -> Option<&Cut> {
        self.cuts.iter().find(|c| c.cut_index == cut_index)
    }
}

/// The current image-generation instruction for one cut. Overwritten in
/// place when the cut is repaired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePrompt {
    pub cut_index: u32,
    pub prompt: String,
}

/// Which stage produced a rendered image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Initial,
    Repaired,
}

/// Reference to one rendered cut. Replaced, never appended, on repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedImage {
    pub cut_index: u32,
    pub url: String,
    pub storage_key: String,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QaStatus {
    Pass,
    Fail,
}

/// One quality judgment for one cut. Each gate pass replaces the whole set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaVerdict {
    pub cut_index: u32,
    pub status: QaStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub fix_hint: Option<String>,
}

impl QaVerdict {
    pub fn failing(&self) -> bool {
        self.status == QaStatus::Fail
    }

    /// The verdict used when the judge's reply cannot be parsed: ambiguity
    /// must not sink the job, so the cut fails with an unknown reason and
    /// goes through repair like any other failure.
    pub fn unreadable(cut_index: u32) -> Self {
        Self {
            cut_index,
            status: QaStatus::Fail,
            reason: Some("unparseable QA verdict".into()),
            fix_hint: None,
        }
    }
}

/// Consumed repair attempts per cut. Monotonically incremented, never reset
/// within a job.
#[derive(Debug, Clone, Default)]
pub struct RetryLedger(BTreeMap<u32, u32>);

impl RetryLedger {
    pub fn consumed(&self, cut_index: u32) -> u32 {
        self.0.get(&cut_index).copied().unwrap_or(0)
    }

    pub fn has_budget(&self, cut_index: u32, max_retries: u32) -> bool {
        self.consumed(cut_index) < max_retries
    }

    /// Record one consumed attempt. Callers check `has_budget` first; that
    /// is what keeps `consumed` from ever exceeding the job's budget.
    pub fn record_attempt(&mut self, cut_index: u32) {
        *self.0.entry(cut_index).or_insert(0) += 1;
    }
}

/// The mutable working data threaded through one job's execution.
#[derive(Debug)]
pub struct PipelineState {
    pub job_id: String,
    pub diary: String,
    pub num_cuts: u32,
    pub style_guide: String,
    pub max_retries: u32,
    pub reference_image: Option<Vec<u8>>,

    pub storyboard: Option<Storyboard>,
    pub prompts: Vec<ImagePrompt>,
    pub images: Vec<RenderedImage>,
    pub qa_results: Vec<QaVerdict>,
    pub retries: RetryLedger,

    /// Bytes every variation call anchors on: the caller's reference image
    /// when one was supplied, otherwise cut 1's rendered bytes.
    pub anchor: Option<Vec<u8>>,

    pub trace_id: String,
}

impl PipelineState {
    pub fn new(job_id: &str, request: GenerateRequest) -> Self {
        Self {
            job_id: job_id.to_string(),
            diary: request.diary,
            num_cuts: request.num_cuts,
            style_guide: request.style_guide,
            max_retries: request.max_retries,
            reference_image: request.reference_image,
            storyboard: None,
            prompts: Vec::new(),
            images: Vec::new(),
            qa_results: Vec::new(),
            retries: RetryLedger::default(),
            anchor: None,
            trace_id: Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn require_storyboard(&self) -> Result<&Storyboard, FourcutError> {
        self.storyboard
            .as_ref()
            .ok_or(FourcutError::Contract("storyboard accessed before planning"))
    }

    pub fn prompt_text(&self, cut_index: u32) -> Result<&str, FourcutError> {
        self.prompts
            .iter()
            .find(|p| p.cut_index == cut_index)
            .map(|p| p.prompt.as_str())
            .ok_or(FourcutError::Contract(
                "prompt accessed before prompt building",
            ))
    }
}
