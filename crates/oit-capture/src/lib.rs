//! OIT Capture: one capture unit per step variant
//!
//! A capture unit turns the draft a technician filled in for the open step
//! into exactly one immutable [`StepData`]. Dispatch is an exhaustive match
//! over [`StepKind`]; unsupported tags produce an inert placeholder record.
//!
//! # Flow
//!
//! ```text
//! TemplateStep + CaptureDraft → capture_step → StepData
//!                                    ↓
//!                   variant checks → required check
//! ```

mod draft;
mod fields;
mod location;
mod media;

pub use draft::{can_confirm, CaptureDraft, LocationState};
pub use fields::TEXT_ACKNOWLEDGED;
pub use location::acquire_location;

use chrono::{DateTime, Utc};
use oit_core::{StepData, StepKind, StepType, TemplateStep};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("CAPTURE/REQUIRED: step {0} needs a value or a file")]
    Required(String),

    #[error("CAPTURE/STEP: draft for {got} cannot complete step {expected}")]
    StepMismatch { expected: String, got: String },

    #[error("CAPTURE/TYPE: record for {step_id} is {got}, step is {expected}")]
    TypeMismatch { step_id: String, expected: StepType, got: StepType },

    #[error("CAPTURE/NUMBER: '{0}' is not a number")]
    InvalidNumber(String),

    #[error("CAPTURE/DATE: '{0}' is not a YYYY-MM-DD date")]
    InvalidDate(String),

    #[error("CAPTURE/RANGE: {value} outside [{min:?}, {max:?}]")]
    OutOfRange { value: f64, min: Option<f64>, max: Option<f64> },

    #[error("CAPTURE/FILES: step accepts a single file, got {0}")]
    TooManyFiles(usize),

    #[error("CAPTURE/FORMAT: '{file}' is not an accepted format ({accepted})")]
    UnsupportedFormat { file: String, accepted: String },

    #[error("CAPTURE/COMMENT: a comment is required")]
    CommentRequired,

    #[error("CAPTURE/GPS: this step requires a GPS position")]
    LocationRequired,
}

/// Emits the record for `step` from `draft`
pub fn capture_step(
    step: &TemplateStep,
    draft: &CaptureDraft,
    now: DateTime<Utc>,
) -> Result<StepData, CaptureError> {
    if draft.step_id != step.id {
        return Err(CaptureError::StepMismatch {
            expected: step.id.clone(),
            got: draft.step_id.clone(),
        });
    }

    let data = match &step.kind {
        StepKind::Text => fields::capture_text(step, draft, now),
        StepKind::Input(config) => fields::capture_input(step, config, draft, now)?,
        StepKind::Image(config) => media::capture_image(step, config, draft, now)?,
        StepKind::Document(config) => media::capture_document(step, config, draft, now)?,
        StepKind::Checkbox(config) => fields::capture_checkbox(step, config, draft, now)?,
        StepKind::Signature(config) => fields::capture_signature(step, config, draft, now)?,
        StepKind::Unsupported { type_tag, reason } => placeholder(step, type_tag, reason, now),
    };

    verify_record(step, &data)?;
    Ok(data)
}

/// Required-step invariant. Placeholders can never satisfy it and are exempt.
pub fn satisfies_required(step: &TemplateStep, data: &StepData) -> bool {
    !step.required || step.is_placeholder() || data.has_content()
}

/// Checks a record against its step before it is accepted into the aggregate
pub fn verify_record(step: &TemplateStep, data: &StepData) -> Result<(), CaptureError> {
    if data.step_id != step.id {
        return Err(CaptureError::StepMismatch {
            expected: step.id.clone(),
            got: data.step_id.clone(),
        });
    }
    if data.step_type != step.step_type() {
        return Err(CaptureError::TypeMismatch {
            step_id: step.id.clone(),
            expected: step.step_type(),
            got: data.step_type,
        });
    }
    if !satisfies_required(step, data) {
        return Err(CaptureError::Required(step.id.clone()));
    }
    Ok(())
}

pub(crate) fn base_record(step: &TemplateStep, draft: &CaptureDraft, now: DateTime<Utc>) -> StepData {
    let mut metadata = BTreeMap::new();
    if let Some(comment) = draft.trimmed_comment() {
        metadata.insert("comment".to_string(), Value::String(comment.to_string()));
    }

    StepData {
        step_id: step.id.clone(),
        step_type: step.step_type(),
        value: None,
        files: Vec::new(),
        timestamp: now,
        metadata,
    }
}

fn placeholder(step: &TemplateStep, type_tag: &str, reason: &str, now: DateTime<Utc>) -> StepData {
    tracing::warn!(step_id = %step.id, type_tag, "confirming placeholder for unsupported step");

    let mut metadata = BTreeMap::new();
    metadata.insert("unsupportedType".to_string(), Value::String(type_tag.to_string()));
    metadata.insert("reason".to_string(), Value::String(reason.to_string()));

    StepData {
        step_id: step.id.clone(),
        step_type: StepType::Unsupported,
        value: None,
        files: Vec::new(),
        timestamp: now,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use oit_core::{FileRef, ImageConfig, InputConfig, StepValue};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_required_input_left_empty() {
        let step = TemplateStep::new("ph", 1, StepKind::Input(InputConfig::default())).required();
        let result = capture_step(&step, &CaptureDraft::for_step("ph"), now());
        assert_eq!(result, Err(CaptureError::Required("ph".to_string())));
    }

    #[test]
    fn test_optional_input_left_empty() {
        let step = TemplateStep::new("obs", 1, StepKind::Input(InputConfig::default()));
        let data = capture_step(&step, &CaptureDraft::for_step("obs"), now()).unwrap();
        assert!(data.value.is_none());
    }

    #[test]
    fn test_required_image_without_files() {
        let step = TemplateStep::new("foto", 1, StepKind::Image(ImageConfig::default())).required();
        assert!(matches!(
            capture_step(&step, &CaptureDraft::for_step("foto"), now()),
            Err(CaptureError::Required(_))
        ));

        let draft = CaptureDraft::for_step("foto").with_file(FileRef::staged("a.png", "/sd/a.png"));
        assert!(capture_step(&step, &draft, now()).is_ok());
    }

    #[test]
    fn test_wrong_draft_rejected() {
        let step = TemplateStep::new("a", 1, StepKind::Text);
        assert!(matches!(
            capture_step(&step, &CaptureDraft::for_step("b"), now()),
            Err(CaptureError::StepMismatch { .. })
        ));
    }

    #[test]
    fn test_unsupported_step_is_inert() {
        let step = TemplateStep::new(
            "v",
            1,
            StepKind::Unsupported { type_tag: "VIDEO".to_string(), reason: "unknown".to_string() },
        )
        .required();

        let data = capture_step(&step, &CaptureDraft::for_step("v"), now()).unwrap();
        assert_eq!(data.step_type, StepType::Unsupported);
        assert!(!data.has_content());
        assert_eq!(data.metadata["unsupportedType"], "VIDEO");
    }

    #[test]
    fn test_verify_record_catches_forged_data() {
        let step = TemplateStep::new("ph", 1, StepKind::Input(InputConfig::default())).required();
        let forged = StepData {
            step_id: "ph".to_string(),
            step_type: StepType::Input,
            value: Some(StepValue::Text(String::new())),
            files: vec![],
            timestamp: now(),
            metadata: BTreeMap::new(),
        };
        assert_eq!(verify_record(&step, &forged), Err(CaptureError::Required("ph".to_string())));

        let drifted = StepData { step_type: StepType::Checkbox, ..forged };
        assert!(matches!(verify_record(&step, &drifted), Err(CaptureError::TypeMismatch { .. })));
    }
}
