//! Local UI state accumulated while a step is open
use oit_core::{FileRef, GeoPosition, StepKind, TemplateStep};
use serde::{Deserialize, Serialize};

/// Outcome of the last location request for this draft
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum LocationState {
    #[default]
    NotRequested,
    Acquired { position: GeoPosition },
    Denied,
    Unavailable { reason: String },
}

impl LocationState {
    pub fn position(&self) -> Option<GeoPosition> {
        match self {
            Self::Acquired { position } => Some(*position),
            _ => None,
        }
    }

    /// Value recorded under `gpsStatus` in the step metadata
    pub fn status_label(&self) -> Option<&'static str> {
        match self {
            Self::NotRequested => None,
            Self::Acquired { .. } => Some("acquired"),
            Self::Denied => Some("denied"),
            Self::Unavailable { .. } => Some("unavailable"),
        }
    }
}

/// Everything the technician entered for one step before confirming
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureDraft {
    pub step_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    #[serde(default)]
    pub files: Vec<FileRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub location: LocationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_name: Option<String>,
}

impl CaptureDraft {
    pub fn for_step(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_checked(mut self, checked: bool) -> Self {
        self.checked = Some(checked);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_file(mut self, file: FileRef) -> Self {
        self.stage_file(file);
        self
    }

    pub fn with_location(mut self, location: LocationState) -> Self {
        self.location = location;
        self
    }

    pub fn with_signer(mut self, name: impl Into<String>) -> Self {
        self.signer_name = Some(name.into());
        self
    }

    /// Stages a file, replacing a previously staged file with the same name
    pub fn stage_file(&mut self, file: FileRef) {
        self.files.retain(|f| f.name != file.name);
        self.files.push(file);
    }

    pub fn remove_file(&mut self, name: &str) -> bool {
        let before = self.files.len();
        self.files.retain(|f| f.name != name);
        before != self.files.len()
    }

    pub(crate) fn trimmed_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    pub(crate) fn trimmed_comment(&self) -> Option<&str> {
        self.comment.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    /// Whether the draft holds what the step's value slot needs
    pub fn has_value_for(&self, step: &TemplateStep) -> bool {
        match &step.kind {
            StepKind::Text | StepKind::Unsupported { .. } => true,
            StepKind::Input(_) | StepKind::Signature(_) => self.trimmed_text().is_some(),
            StepKind::Checkbox(_) => self.checked.unwrap_or(false),
            StepKind::Image(_) | StepKind::Document(_) => !self.files.is_empty(),
        }
    }
}

/// Confirm is disabled while a required step has nothing to emit
pub fn can_confirm(step: &TemplateStep, draft: &CaptureDraft) -> bool {
    draft.step_id == step.id && (!step.required || draft.has_value_for(step))
}
