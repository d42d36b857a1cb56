//! File-carrying steps: IMAGE, DOCUMENT
//!
//! Files are only staged here. Uploading belongs to the sync reconciler so a
//! photo can be taken with no connectivity at all.

use crate::draft::{CaptureDraft, LocationState};
use crate::{base_record, CaptureError};
use chrono::{DateTime, Utc};
use oit_core::{DocumentConfig, FileRef, ImageConfig, StepData, TemplateStep};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashSet;

static IMAGE_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["jpg", "jpeg", "png", "heic", "heif", "webp", "gif"]
        .into_iter()
        .collect()
});

pub(crate) fn capture_image(
    step: &TemplateStep,
    config: &ImageConfig,
    draft: &CaptureDraft,
    now: DateTime<Utc>,
) -> Result<StepData, CaptureError> {
    check_count(&draft.files, config.allow_multiple)?;

    for file in &draft.files {
        if !is_image(file) {
            return Err(CaptureError::UnsupportedFormat {
                file: file.name.clone(),
                accepted: "image".to_string(),
            });
        }
    }

    if config.require_gps && !draft.files.is_empty() && draft.location.position().is_none() {
        return Err(CaptureError::LocationRequired);
    }

    let mut data = base_record(step, draft, now);
    data.files = draft.files.clone();
    attach_location(&mut data, &draft.location);
    Ok(data)
}

pub(crate) fn capture_document(
    step: &TemplateStep,
    config: &DocumentConfig,
    draft: &CaptureDraft,
    now: DateTime<Utc>,
) -> Result<StepData, CaptureError> {
    check_count(&draft.files, config.allow_multiple)?;

    if !config.accepted_formats.is_empty() {
        for file in &draft.files {
            if !matches_format(file, &config.accepted_formats) {
                return Err(CaptureError::UnsupportedFormat {
                    file: file.name.clone(),
                    accepted: config.accepted_formats.join(", "),
                });
            }
        }
    }

    let mut data = base_record(step, draft, now);
    data.files = draft.files.clone();
    Ok(data)
}

fn check_count(files: &[FileRef], allow_multiple: bool) -> Result<(), CaptureError> {
    if !allow_multiple && files.len() > 1 {
        return Err(CaptureError::TooManyFiles(files.len()));
    }
    Ok(())
}

fn is_image(file: &FileRef) -> bool {
    if let Some(ct) = &file.content_type {
        return ct.to_ascii_lowercase().starts_with("image/");
    }
    file.extension()
        .map(|ext| IMAGE_EXTENSIONS.contains(ext.as_str()))
        .unwrap_or(false)
}

/// Formats are extensions (`pdf`, `.pdf`) or MIME types (`application/pdf`)
fn matches_format(file: &FileRef, accepted: &[String]) -> bool {
    let ext = file.extension();
    let content_type = file.content_type.as_deref().map(str::to_ascii_lowercase);

    accepted.iter().any(|format| {
        let format = format.trim().to_ascii_lowercase();
        if format.contains('/') {
            content_type.as_deref() == Some(format.as_str())
        } else {
            ext.as_deref() == Some(format.trim_start_matches('.'))
        }
    })
}

fn attach_location(data: &mut StepData, location: &LocationState) {
    if let Some(label) = location.status_label() {
        data.metadata.insert("gpsStatus".to_string(), Value::String(label.to_string()));
    }
    if let Some(position) = location.position() {
        if let Ok(gps) = serde_json::to_value(position) {
            data.metadata.insert("gps".to_string(), gps);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use oit_core::{GeoPosition, StepKind};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 10, 0, 0).unwrap()
    }

    fn gps() -> LocationState {
        LocationState::Acquired {
            position: GeoPosition { latitude: -23.55, longitude: -46.63, accuracy: Some(8.0) },
        }
    }

    #[test]
    fn test_image_with_gps() {
        let config = ImageConfig { allow_multiple: false, require_gps: true };
        let step = TemplateStep::new("foto", 3, StepKind::Image(config.clone()));
        let draft = CaptureDraft::for_step("foto")
            .with_file(FileRef::staged("ponto.JPG", "/sd/ponto.jpg"))
            .with_location(gps());

        let data = capture_image(&step, &config, &draft, now()).unwrap();
        assert_eq!(data.files.len(), 1);
        assert!(data.value.is_none());
        assert_eq!(data.metadata["gpsStatus"], "acquired");
        assert_eq!(data.metadata["gps"]["latitude"], -23.55);
    }

    #[test]
    fn test_image_require_gps_blocks_without_position() {
        let config = ImageConfig { allow_multiple: false, require_gps: true };
        let step = TemplateStep::new("foto", 3, StepKind::Image(config.clone()));
        let draft = CaptureDraft::for_step("foto")
            .with_file(FileRef::staged("ponto.jpg", "/sd/ponto.jpg"))
            .with_location(LocationState::Denied);

        assert_eq!(
            capture_image(&step, &config, &draft, now()),
            Err(CaptureError::LocationRequired)
        );
    }

    #[test]
    fn test_image_denied_gps_is_degraded_not_fatal() {
        let config = ImageConfig::default();
        let step = TemplateStep::new("foto", 3, StepKind::Image(config.clone()));
        let draft = CaptureDraft::for_step("foto")
            .with_file(FileRef::staged("ponto.jpg", "/sd/ponto.jpg"))
            .with_location(LocationState::Denied);

        let data = capture_image(&step, &config, &draft, now()).unwrap();
        assert_eq!(data.metadata["gpsStatus"], "denied");
        assert!(!data.metadata.contains_key("gps"));
    }

    #[test]
    fn test_image_rejects_non_images_and_extra_files() {
        let config = ImageConfig::default();
        let step = TemplateStep::new("foto", 3, StepKind::Image(config.clone()));

        let pdf = CaptureDraft::for_step("foto").with_file(FileRef::staged("laudo.pdf", "/sd/l.pdf"));
        assert!(matches!(
            capture_image(&step, &config, &pdf, now()),
            Err(CaptureError::UnsupportedFormat { .. })
        ));

        let two = CaptureDraft::for_step("foto")
            .with_file(FileRef::staged("a.jpg", "/sd/a.jpg"))
            .with_file(FileRef::staged("b.jpg", "/sd/b.jpg"));
        assert_eq!(capture_image(&step, &config, &two, now()), Err(CaptureError::TooManyFiles(2)));
    }

    #[test]
    fn test_document_formats() {
        let config = DocumentConfig {
            accepted_formats: vec![".pdf".to_string(), "application/vnd.ms-excel".to_string()],
            allow_multiple: true,
        };
        let step = TemplateStep::new("doc", 6, StepKind::Document(config.clone()));

        let ok = CaptureDraft::for_step("doc")
            .with_file(FileRef::staged("cadeia.PDF", "/sd/c.pdf"))
            .with_file(
                FileRef::staged("planilha", "/sd/p").with_content_type("application/vnd.ms-excel"),
            );
        assert_eq!(capture_document(&step, &config, &ok, now()).unwrap().files.len(), 2);

        let bad = CaptureDraft::for_step("doc").with_file(FileRef::staged("nota.txt", "/sd/n.txt"));
        assert!(matches!(
            capture_document(&step, &config, &bad, now()),
            Err(CaptureError::UnsupportedFormat { .. })
        ));
    }
}
