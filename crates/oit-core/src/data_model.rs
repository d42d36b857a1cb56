//! Data Model: StepData, SamplingData, StepValidation, Visit
use crate::schema::{id_from_any, StepType};
use crate::template::Template;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Captured value of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepValue {
    Flag(bool),
    Text(String),
}

impl StepValue {
    /// `false` and whitespace-only text count as empty
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Flag(checked) => !checked,
            Self::Text(text) => text.trim().is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Flag(_) => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(checked) => Some(*checked),
            Self::Text(_) => None,
        }
    }
}

/// A file attached to a step. Staged files carry a local path, uploaded
/// files carry the resolved URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl FileRef {
    pub fn staged(name: impl Into<String>, local_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local_path: Some(local_path.into()),
            content_type: None,
            url: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn is_uploaded(&self) -> bool {
        self.url.is_some()
    }

    /// Lowercased extension of the file name
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// Output of one step capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepData {
    pub step_id: String,
    pub step_type: StepType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<StepValue>,
    #[serde(default)]
    pub files: Vec<FileRef>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl StepData {
    /// Non-empty value or at least one file
    pub fn has_content(&self) -> bool {
        self.value.as_ref().map(|v| !v.is_empty()).unwrap_or(false) || !self.files.is_empty()
    }

    pub fn pending_uploads(&self) -> impl Iterator<Item = &FileRef> {
        self.files.iter().filter(|f| !f.is_uploaded())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Pending,
    Synced,
    Failed,
}

/// Verdict of the external judge for one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepValidation {
    pub step_index: usize,
    pub validated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl StepValidation {
    pub fn accepted(step_index: usize, feedback: Option<String>) -> Self {
        Self { step_index, validated: true, feedback }
    }

    pub fn rejected(step_index: usize, feedback: Option<String>) -> Self {
        Self { step_index, validated: false, feedback }
    }

    /// Recorded for steps that do not go through the judge
    pub fn implicit(step_index: usize) -> Self {
        Self::accepted(step_index, None)
    }
}

/// Execution aggregate for one visit and template attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingData {
    pub visit_id: String,
    pub template_id: String,
    pub template_name: String,
    pub template_fingerprint: String,
    pub total_steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<StepData>,
    #[serde(default)]
    pub validations: BTreeMap<usize, StepValidation>,
    pub progress: u8,
    #[serde(default)]
    pub sync_status: SyncStatus,
    /// Bumped on every local mutation
    #[serde(default)]
    pub revision: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl SamplingData {
    pub fn new(visit_id: impl Into<String>, template: &Template) -> Self {
        Self {
            visit_id: visit_id.into(),
            template_id: template.id.clone(),
            template_name: template.name.clone(),
            template_fingerprint: template.fingerprint().to_string(),
            total_steps: template.len(),
            started_at: None,
            completed_at: None,
            steps: Vec::new(),
            validations: BTreeMap::new(),
            progress: 0,
            sync_status: SyncStatus::Pending,
            revision: 0,
            last_synced_at: None,
        }
    }

    pub fn recompute_progress(&mut self) {
        self.progress = progress_percent(self.steps.len(), self.total_steps);
    }

    /// Records a local mutation: new revision, unsynced, fresh progress
    pub fn touch(&mut self) {
        self.revision += 1;
        self.sync_status = SyncStatus::Pending;
        self.recompute_progress();
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn is_validated(&self, step_index: usize) -> bool {
        self.validations
            .get(&step_index)
            .map(|v| v.validated)
            .unwrap_or(false)
    }

    /// Drops captured data and validations from `index` onward
    pub fn truncate_from(&mut self, index: usize) -> usize {
        let removed = self.steps.len().saturating_sub(index);
        self.steps.truncate(index);
        self.validations.retain(|i, _| *i < index);
        self.completed_at = None;
        removed
    }

    pub fn matches_template(&self, template: &Template) -> bool {
        self.template_fingerprint == template.fingerprint() && self.total_steps == template.len()
    }

    /// Unique step ids and no more records than steps
    pub fn is_consistent(&self) -> bool {
        let mut seen = HashSet::new();
        self.steps.len() <= self.total_steps
            && self.steps.iter().all(|s| seen.insert(s.step_id.as_str()))
    }

    pub fn has_pending_uploads(&self) -> bool {
        self.steps.iter().any(|s| s.pending_uploads().next().is_some())
    }
}

/// `round(100 * done / total)`, half rounding up; 0 for an empty template
pub fn progress_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let done = done.min(total) as u64;
    let total = total as u64;
    ((200 * done + total) / (2 * total)) as u8
}

// ============================================================================
// VISIT
// ============================================================================

/// Scheduled date of a visit: a calendar day or an instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduledDate {
    Day(NaiveDate),
    Instant(DateTime<Utc>),
}

/// A scheduled sampling work order (OIT)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visit {
    #[serde(deserialize_with = "id_from_any")]
    pub id: String,
    pub scheduled_date: ScheduledDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Visit {
    pub fn on_day(id: impl Into<String>, day: NaiveDate) -> Self {
        Self {
            id: id.into(),
            scheduled_date: ScheduledDate::Day(day),
            template_id: None,
            location: None,
        }
    }
}
