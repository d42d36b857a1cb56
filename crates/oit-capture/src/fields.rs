//! Value-carrying steps: TEXT, INPUT, CHECKBOX, SIGNATURE
use crate::draft::CaptureDraft;
use crate::{base_record, CaptureError};
use chrono::{DateTime, NaiveDate, Utc};
use oit_core::{
    CheckboxConfig, InputConfig, InputType, SignatureConfig, StepData, StepValue, TemplateStep,
};
use serde_json::Value;

/// Value recorded when an instruction step is confirmed without a note
pub const TEXT_ACKNOWLEDGED: &str = "acknowledged";

pub(crate) fn capture_text(step: &TemplateStep, draft: &CaptureDraft, now: DateTime<Utc>) -> StepData {
    let mut data = base_record(step, draft, now);
    let note = draft.trimmed_text().unwrap_or(TEXT_ACKNOWLEDGED);
    data.value = Some(StepValue::Text(note.to_string()));
    data
}

pub(crate) fn capture_input(
    step: &TemplateStep,
    config: &InputConfig,
    draft: &CaptureDraft,
    now: DateTime<Utc>,
) -> Result<StepData, CaptureError> {
    let mut data = base_record(step, draft, now);

    if let Some(unit) = &config.unit {
        data.metadata.insert("unit".to_string(), Value::String(unit.clone()));
    }

    let Some(raw) = draft.trimmed_text() else {
        return Ok(data);
    };

    match config.input_type {
        InputType::Text => {}
        InputType::Number => {
            let number = parse_number(raw)?;
            check_range(number, config)?;
        }
        InputType::Date => {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|_| CaptureError::InvalidDate(raw.to_string()))?;
        }
    }

    data.value = Some(StepValue::Text(raw.to_string()));
    Ok(data)
}

/// Accepts both `21.5` and `21,5`
fn parse_number(raw: &str) -> Result<f64, CaptureError> {
    raw.replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| CaptureError::InvalidNumber(raw.to_string()))
}

fn check_range(number: f64, config: &InputConfig) -> Result<(), CaptureError> {
    let below = config.min.map(|min| number < min).unwrap_or(false);
    let above = config.max.map(|max| number > max).unwrap_or(false);
    if below || above {
        return Err(CaptureError::OutOfRange {
            value: number,
            min: config.min,
            max: config.max,
        });
    }
    Ok(())
}

pub(crate) fn capture_checkbox(
    step: &TemplateStep,
    config: &CheckboxConfig,
    draft: &CaptureDraft,
    now: DateTime<Utc>,
) -> Result<StepData, CaptureError> {
    if config.requires_comment && draft.trimmed_comment().is_none() {
        return Err(CaptureError::CommentRequired);
    }

    let mut data = base_record(step, draft, now);
    data.value = Some(StepValue::Flag(draft.checked.unwrap_or(false)));
    Ok(data)
}

pub(crate) fn capture_signature(
    step: &TemplateStep,
    config: &SignatureConfig,
    draft: &CaptureDraft,
    now: DateTime<Utc>,
) -> Result<StepData, CaptureError> {
    let mut data = base_record(step, draft, now);

    let signer = draft
        .signer_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or(config.signer_name.as_deref());
    if let Some(signer) = signer {
        data.metadata.insert("signerName".to_string(), Value::String(signer.to_string()));
    }

    data.value = draft.trimmed_text().map(|s| StepValue::Text(s.to_string()));
    Ok(data)
}
