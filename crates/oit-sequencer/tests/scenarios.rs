//! Field scenarios driven through the sequencer

use chrono::{FixedOffset, NaiveDate, TimeZone, Utc};
use oit_cache::{FileStore, KeyValueStore, MemoryStore, SamplingCache};
use oit_capture::{CaptureDraft, CaptureError, LocationState};
use oit_core::{
    CheckboxConfig, ConnectivityFlag, Environment, FileRef, GeoPosition, ImageConfig,
    InputConfig, InputType, ManualClock, NoGeolocation, OitError, StepKind, StepValidation,
    StepValue, SyncStatus, Template, TemplateStep, Visit,
};
use oit_gate::{GateProfile, GateStatus};
use oit_sequencer::{
    CaptureOutcome, ExecutionSequencer, SequenceError, SequencerState, ValidationOutcome,
};
use std::sync::Arc;

fn brt() -> FixedOffset {
    FixedOffset::west_opt(3 * 3600).unwrap()
}

fn env() -> Environment {
    // 10:00 at the site, 2026-10-18
    Environment::new(
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 18, 13, 0, 0).unwrap())),
        Arc::new(ConnectivityFlag::default()),
        Arc::new(NoGeolocation),
    )
    .with_site_offset(brt())
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
}

/// TEXT, INPUT (°C, required), IMAGE (GPS), CHECKBOX (comment), all judged
fn field_template() -> Template {
    Template::new(
        "tpl-poco",
        "Coleta em poço de monitoramento",
        vec![
            TemplateStep::new("instrucoes", 10, StepKind::Text).titled("Leia as instruções"),
            TemplateStep::new(
                "temperatura",
                20,
                StepKind::Input(InputConfig {
                    input_type: InputType::Number,
                    unit: Some("°C".to_string()),
                    ..Default::default()
                }),
            )
            .titled("Temperatura da amostra")
            .required(),
            TemplateStep::new(
                "foto",
                30,
                StepKind::Image(ImageConfig { require_gps: true, ..Default::default() }),
            )
            .titled("Foto do ponto"),
            TemplateStep::new(
                "lacre",
                40,
                StepKind::Checkbox(CheckboxConfig { requires_comment: true, ..Default::default() }),
            )
            .titled("Lacre conferido"),
        ],
    )
    .unwrap()
    .with_validation_required()
}

fn sequencer_on(store: Arc<dyn KeyValueStore>, template: Template, scheduled: NaiveDate) -> ExecutionSequencer {
    let cache = Arc::new(SamplingCache::new(store));
    ExecutionSequencer::new(Visit::on_day("oit-2231", scheduled), template, env(), cache, GateProfile::field())
}

fn photo_draft() -> CaptureDraft {
    CaptureDraft::for_step("foto")
        .with_file(FileRef::staged("ponto.jpg", "/sdcard/oit/ponto.jpg"))
        .with_location(LocationState::Acquired {
            position: GeoPosition { latitude: -23.55, longitude: -46.63, accuracy: Some(8.0) },
        })
}

fn capture_and_accept(seq: &mut ExecutionSequencer, draft: CaptureDraft) {
    let CaptureOutcome::Submitted(submission) = seq.capture(&draft).unwrap() else {
        panic!("judged step should be submitted");
    };
    let outcome = seq
        .apply_validation(submission.attempt, &StepValidation::accepted(submission.step_index, None))
        .unwrap();
    assert!(matches!(outcome, ValidationOutcome::Advanced { .. } | ValidationOutcome::Completed));
}

#[test]
fn test_rejected_last_step_leaves_three_quarters() {
    let store = Arc::new(MemoryStore::new());
    let mut seq = sequencer_on(store, field_template(), day(18));
    seq.start().unwrap();

    capture_and_accept(&mut seq, CaptureDraft::for_step("instrucoes"));
    capture_and_accept(&mut seq, CaptureDraft::for_step("temperatura").with_text("21,5"));
    capture_and_accept(&mut seq, photo_draft());
    assert_eq!(seq.progress(), 75);

    let draft = CaptureDraft::for_step("lacre").with_checked(true).with_comment("lacre 0042 íntegro");
    let CaptureOutcome::Submitted(submission) = seq.capture(&draft).unwrap() else {
        panic!("checkbox should be submitted");
    };
    assert_eq!(seq.progress(), 100);

    let verdict = StepValidation::rejected(3, Some("número do lacre ilegível".to_string()));
    assert_eq!(
        seq.apply_validation(submission.attempt, &verdict).unwrap(),
        ValidationOutcome::Rejected { feedback: Some("número do lacre ilegível".to_string()) }
    );

    let data = seq.data().unwrap();
    assert_eq!(seq.progress(), 75);
    assert_eq!(data.steps.len(), 3);
    assert_eq!(data.sync_status, SyncStatus::Pending);
    assert!(!data.is_complete());
    assert_eq!(seq.state(), SequencerState::AwaitingValidation { cursor: 3 });
    assert_eq!(seq.open_step(), Some(3));

    let temperature = &data.steps[1];
    assert_eq!(temperature.value, Some(StepValue::Text("21,5".to_string())));
    assert_eq!(temperature.metadata["unit"], "°C");

    // step 4 can be captured again
    let retry = seq.capture(&draft).unwrap();
    assert!(matches!(retry, CaptureOutcome::Submitted(ref s) if s.attempt == submission.attempt + 1));
}

#[test]
fn test_visit_scheduled_yesterday_is_locked_without_writes() {
    let store = Arc::new(MemoryStore::new());
    let mut seq = sequencer_on(store.clone(), field_template(), day(17));

    assert!(seq.lock().is_locked());
    let err = seq.start().unwrap_err();
    assert!(err.is_lock());

    let err = seq.capture(&CaptureDraft::for_step("instrucoes")).unwrap_err();
    assert!(err.is_lock());
    assert!(seq.redo_step(0).unwrap_err().is_lock());
    assert!(seq.reset().unwrap_err().is_lock());
    assert!(seq
        .apply_validation(1, &StepValidation::accepted(0, None))
        .unwrap_err()
        .is_lock());

    assert_eq!(store.writes(), 0);
    assert!(store.is_empty());
    assert!(seq.view().lock.is_locked());
}

#[test]
fn test_progress_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let template = Template::new(
        "tpl-rapido",
        "Checklist",
        vec![
            TemplateStep::new("a", 1, StepKind::Text),
            TemplateStep::new("b", 2, StepKind::Input(InputConfig::default())),
            TemplateStep::new("c", 3, StepKind::Text),
        ],
    )
    .unwrap();

    let saved = {
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let mut seq = sequencer_on(store, template.clone(), day(18));
        seq.start().unwrap();
        seq.capture(&CaptureDraft::for_step("a")).unwrap();
        seq.capture(&CaptureDraft::for_step("b").with_text("poço seco")).unwrap();
        seq.data().unwrap().clone()
    };

    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let mut seq = sequencer_on(store, template, day(18));
    assert_eq!(seq.start().unwrap(), SequencerState::InProgress { cursor: 2 });
    assert_eq!(seq.data(), Some(&saved));
    assert_eq!(seq.progress(), 67);
    assert!(!seq.gate().is_locked(2));
}

#[test]
fn test_resume_with_changed_template_is_refused() {
    let store = Arc::new(MemoryStore::new());
    let original = Template::new("tpl", "v1", vec![TemplateStep::new("a", 1, StepKind::Text)]).unwrap();
    let mut seq = sequencer_on(store.clone(), original, day(18));
    seq.start().unwrap();

    let changed = Template::new(
        "tpl",
        "v2",
        vec![
            TemplateStep::new("a", 1, StepKind::Text),
            TemplateStep::new("b", 2, StepKind::Text),
        ],
    )
    .unwrap();
    let mut resumed = sequencer_on(store, changed, day(18));
    assert!(matches!(
        resumed.start(),
        Err(SequenceError::Core(OitError::TemplateDrift(_)))
    ));
}

#[test]
fn test_skipping_ahead_is_rejected_without_writes() {
    let store = Arc::new(MemoryStore::new());
    let mut seq = sequencer_on(store.clone(), field_template(), day(18));
    seq.start().unwrap();
    let writes = store.writes();

    let err = seq.capture(&photo_draft()).unwrap_err();
    assert!(matches!(err, SequenceError::Core(OitError::StepLocked(2))));
    assert_eq!(store.writes(), writes);
    assert_eq!(seq.progress(), 0);
}

#[test]
fn test_capture_errors_leave_state_untouched() {
    let store = Arc::new(MemoryStore::new());
    let mut seq = sequencer_on(store.clone(), field_template(), day(18));
    seq.start().unwrap();
    capture_and_accept(&mut seq, CaptureDraft::for_step("instrucoes"));
    let writes = store.writes();

    let empty = seq.capture(&CaptureDraft::for_step("temperatura")).unwrap_err();
    assert!(matches!(empty, SequenceError::Capture(CaptureError::Required(_))));
    let garbage = seq.capture(&CaptureDraft::for_step("temperatura").with_text("quente")).unwrap_err();
    assert!(matches!(garbage, SequenceError::Capture(CaptureError::InvalidNumber(_))));

    assert_eq!(store.writes(), writes);
    assert_eq!(seq.state(), SequencerState::InProgress { cursor: 1 });
}

#[test]
fn test_redo_reverts_later_steps_and_ignores_old_verdicts() {
    let store = Arc::new(MemoryStore::new());
    let mut seq = sequencer_on(store, field_template(), day(18));
    seq.start().unwrap();
    capture_and_accept(&mut seq, CaptureDraft::for_step("instrucoes"));
    capture_and_accept(&mut seq, CaptureDraft::for_step("temperatura").with_text("19"));
    let CaptureOutcome::Submitted(pending) = seq.capture(&photo_draft()).unwrap() else {
        panic!("photo should be submitted");
    };

    seq.redo_step(1).unwrap();
    assert_eq!(seq.state(), SequencerState::InProgress { cursor: 1 });
    assert_eq!(seq.progress(), 25);
    assert_eq!(seq.data().unwrap().validations.len(), 1);
    assert_eq!(seq.gate().status(2), GateStatus::NotSubmitted);
    assert!(seq.gate().is_locked(2));

    let late = seq
        .apply_validation(pending.attempt, &StepValidation::accepted(2, None))
        .unwrap();
    assert_eq!(late, ValidationOutcome::Stale);
    assert_eq!(seq.progress(), 25);

    assert!(matches!(seq.redo_step(3), Err(SequenceError::NotReached(3))));
}

#[test]
fn test_reset_clears_cached_record() {
    let store = Arc::new(MemoryStore::new());
    let mut seq = sequencer_on(store.clone(), field_template(), day(18));
    seq.start().unwrap();
    capture_and_accept(&mut seq, CaptureDraft::for_step("instrucoes"));

    seq.reset().unwrap();
    assert_eq!(seq.state(), SequencerState::NotStarted);
    assert!(store.is_empty());
    assert_eq!(seq.progress(), 0);
}

#[test]
fn test_steps_follow_authored_order() {
    let template = Template::new(
        "tpl",
        "Fora de ordem",
        vec![
            TemplateStep::new("z", 3, StepKind::Text),
            TemplateStep::new("x", 1, StepKind::Text),
            TemplateStep::new("y", 2, StepKind::Text),
        ],
    )
    .unwrap();
    let mut seq = sequencer_on(Arc::new(MemoryStore::new()), template, day(18));
    seq.start().unwrap();

    let ids: Vec<String> = seq.view().steps.into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["x", "y", "z"]);
    assert!(matches!(
        seq.capture(&CaptureDraft::for_step("y")),
        Err(SequenceError::Core(OitError::StepLocked(1)))
    ));
}

#[derive(Debug, Clone)]
enum FieldAction {
    Capture(usize),
    Verdict(bool),
    Redo(usize),
}

fn field_action() -> impl proptest::strategy::Strategy<Value = FieldAction> {
    use proptest::prelude::*;
    prop_oneof![
        (0usize..4).prop_map(FieldAction::Capture),
        any::<bool>().prop_map(FieldAction::Verdict),
        (0usize..4).prop_map(FieldAction::Redo),
    ]
}

fn field_draft(index: usize) -> CaptureDraft {
    match index {
        0 => CaptureDraft::for_step("instrucoes"),
        1 => CaptureDraft::for_step("temperatura").with_text("21,5"),
        2 => photo_draft(),
        _ => CaptureDraft::for_step("lacre").with_checked(true).with_comment("lacre 0042"),
    }
}

proptest::proptest! {
    #[test]
    fn prop_steps_past_first_unvalidated_refuse_capture(
        actions in proptest::collection::vec(field_action(), 0..40)
    ) {
        let store = Arc::new(MemoryStore::new());
        let mut seq = sequencer_on(store.clone(), field_template(), day(18));
        seq.start().unwrap();
        let mut pending: Option<(usize, u32)> = None;

        for action in actions {
            match action {
                FieldAction::Capture(index) => {
                    if let Ok(CaptureOutcome::Submitted(s)) = seq.capture(&field_draft(index)) {
                        pending = Some((s.step_index, s.attempt));
                    }
                }
                FieldAction::Verdict(accepted) => {
                    if let Some((index, attempt)) = pending.take() {
                        let verdict = if accepted {
                            StepValidation::accepted(index, None)
                        } else {
                            StepValidation::rejected(index, Some("refazer".to_string()))
                        };
                        seq.apply_validation(attempt, &verdict).unwrap();
                    }
                }
                FieldAction::Redo(index) => {
                    let _ = seq.redo_step(index);
                }
            }

            let total = seq.template().len();
            let Some(first_open) = (0..total).find(|i| !seq.gate().is_validated(*i)) else {
                continue;
            };
            for later in first_open + 1..total {
                let writes = store.writes();
                let steps = seq.data().map(|d| d.steps.len());
                proptest::prop_assert!(seq.gate().is_locked(later));
                proptest::prop_assert!(seq.capture(&field_draft(later)).is_err());
                proptest::prop_assert_eq!(store.writes(), writes);
                proptest::prop_assert_eq!(seq.data().map(|d| d.steps.len()), steps);
            }
        }
    }
}
