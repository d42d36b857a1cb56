//! Sequencer states and the snapshot handed to the UI shell

use chrono::{DateTime, Utc};
use oit_core::{Notice, StepData, StepType, SyncStatus, VisitLock};
use oit_gate::GateStatus;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SequencerState {
    NotStarted,
    InProgress { cursor: usize },
    AwaitingValidation { cursor: usize },
    Complete,
}

impl SequencerState {
    pub fn cursor(&self) -> Option<usize> {
        match self {
            Self::InProgress { cursor } | Self::AwaitingValidation { cursor } => Some(*cursor),
            Self::NotStarted | Self::Complete => None,
        }
    }
}

/// A capture handed to the external judge
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub step_index: usize,
    pub attempt: u32,
    pub record: StepData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Advanced { next: usize },
    Submitted(Submission),
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Advanced { next: usize },
    Completed,
    Rejected { feedback: Option<String> },
    /// Verdict for an attempt that is not current anymore
    Stale,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepView {
    pub index: usize,
    pub id: String,
    pub title: String,
    pub step_type: StepType,
    pub required: bool,
    pub requires_validation: bool,
    pub locked: bool,
    pub validation: GateStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured: Option<StepData>,
}

/// Everything a UI shell needs to render the visit
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencerView {
    pub visit_id: String,
    pub template_name: String,
    pub lock: VisitLock,
    pub state: SequencerState,
    pub display_cursor: usize,
    pub progress: u8,
    pub sync_status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepView>,
    pub notices: Vec<Notice>,
}
