//! Execution Sequencer: máquina de estados da execução de amostragem
//!
//! Every mutation goes through the cache first: the record is written, then
//! the in-memory state follows. A write that fails leaves the sequencer where
//! it was. The schedule lock is re-evaluated on each call and a locked visit
//! never reaches the cache.

use crate::error::SequenceError;
use crate::state::{
    CaptureOutcome, SequencerState, SequencerView, StepView, Submission, ValidationOutcome,
};
use oit_cache::SamplingCache;
use oit_capture::{capture_step, satisfies_required, CaptureDraft};
use oit_core::{
    Environment, Notice, OitError, SamplingData, StepValidation, SyncStatus, Template, Visit,
    VisitLock,
};
use oit_gate::{GateProfile, GateStatus, ValidationGate};
use std::sync::Arc;

pub struct ExecutionSequencer {
    visit: Visit,
    template: Template,
    env: Environment,
    cache: Arc<SamplingCache>,
    gate: ValidationGate,
    state: SequencerState,
    display: usize,
    data: Option<SamplingData>,
    notices: Vec<Notice>,
}

impl ExecutionSequencer {
    pub fn new(
        visit: Visit,
        template: Template,
        env: Environment,
        cache: Arc<SamplingCache>,
        profile: GateProfile,
    ) -> Self {
        Self {
            visit,
            template,
            env,
            cache,
            gate: ValidationGate::new(profile),
            state: SequencerState::NotStarted,
            display: 0,
            data: None,
            notices: Vec::new(),
        }
    }

    pub fn visit(&self) -> &Visit {
        &self.visit
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn data(&self) -> Option<&SamplingData> {
        self.data.as_ref()
    }

    pub fn gate(&self) -> &ValidationGate {
        &self.gate
    }

    pub fn progress(&self) -> u8 {
        self.data.as_ref().map(|d| d.progress).unwrap_or(0)
    }

    pub fn lock(&self) -> VisitLock {
        VisitLock::for_visit(&self.visit, &self.env)
    }

    pub fn ensure_open(&self) -> Result<(), SequenceError> {
        Ok(self.lock().ensure_open(&self.visit.id)?)
    }

    pub fn push_notice(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Opens the visit, resuming a cached record when there is one
    pub fn start(&mut self) -> Result<SequencerState, SequenceError> {
        self.ensure_open()?;
        if self.state != SequencerState::NotStarted {
            return Ok(self.state);
        }

        let now = self.env.now();
        let template = &self.template;
        let visit_id = self.visit.id.clone();
        let data = self.cache.update(&visit_id, |slot| {
            if let Some(cached) = slot.as_ref() {
                if !cached.matches_template(template) {
                    return Err(SequenceError::from(OitError::TemplateDrift(format!(
                        "cached record for {} was captured with another version of template {}",
                        visit_id, template.id
                    ))));
                }
                return Ok(cached.clone());
            }
            let mut fresh = SamplingData::new(visit_id.as_str(), template);
            fresh.started_at = Some(now);
            fresh.recompute_progress();
            *slot = Some(fresh.clone());
            Ok(fresh)
        })?;

        self.gate = ValidationGate::restore(self.gate.profile().clone(), &data.validations);
        self.state = self.derive_state(&data);
        self.display = self.state.cursor().unwrap_or(self.template.len().saturating_sub(1));
        tracing::debug!(
            visit_id = %self.visit.id,
            captured = data.steps.len(),
            state = ?self.state,
            "sequencer started"
        );
        self.data = Some(data);
        Ok(self.state)
    }

    /// State implied by a persisted record
    fn derive_state(&self, data: &SamplingData) -> SequencerState {
        let captured = data.steps.len();
        let total = self.template.len();

        if captured > 0 && !data.validations.contains_key(&(captured - 1)) {
            return SequencerState::AwaitingValidation { cursor: captured - 1 };
        }
        if let Some(verdict) = data.validations.get(&captured) {
            if !verdict.validated {
                return SequencerState::AwaitingValidation { cursor: captured };
            }
        }
        if captured >= total {
            SequencerState::Complete
        } else {
            SequencerState::InProgress { cursor: captured }
        }
    }

    /// Submission to re-send after a resume left a capture without verdict
    pub fn resubmit_pending(&mut self) -> Option<Submission> {
        let SequencerState::AwaitingValidation { cursor } = self.state else {
            return None;
        };
        if self.gate.status(cursor) != GateStatus::NotSubmitted {
            return None;
        }
        let record = self.data.as_ref()?.steps.get(cursor)?.clone();
        let attempt = self.gate.submit(cursor, self.env.now());
        Some(Submission { step_index: cursor, attempt, record })
    }

    /// Clears the visit's cached record and returns to `NotStarted`
    pub fn reset(&mut self) -> Result<(), SequenceError> {
        self.ensure_open()?;
        self.cache.clear(&self.visit.id)?;
        self.gate.reset();
        self.data = None;
        self.state = SequencerState::NotStarted;
        self.display = 0;
        tracing::debug!(visit_id = %self.visit.id, "sequencer reset");
        Ok(())
    }

    /// Picks up changes the reconciler made to the cached record
    pub fn refresh(&mut self) -> Result<(), SequenceError> {
        if let Some(cached) = self.cache.load(&self.visit.id)? {
            self.data = Some(cached);
        } else if let Some(data) = self.data.as_mut() {
            if data.is_complete() {
                data.sync_status = SyncStatus::Synced;
            }
        }
        Ok(())
    }

    // ========================================================================
    // CAPTURE
    // ========================================================================

    /// Step that accepts a capture right now
    pub fn open_step(&self) -> Option<usize> {
        match self.state {
            SequencerState::InProgress { cursor } => Some(cursor),
            SequencerState::AwaitingValidation { cursor }
                if matches!(self.gate.status(cursor), GateStatus::Rejected { .. }) =>
            {
                Some(cursor)
            }
            _ => None,
        }
    }

    /// The single mutation entry point for captured data
    pub fn capture(&mut self, draft: &CaptureDraft) -> Result<CaptureOutcome, SequenceError> {
        self.ensure_open()?;

        let index = match (self.open_step(), self.state) {
            (Some(index), _) => index,
            (None, SequencerState::NotStarted) => return Err(SequenceError::NotStarted),
            (None, SequencerState::Complete) => return Err(SequenceError::Complete),
            (None, SequencerState::AwaitingValidation { cursor })
            | (None, SequencerState::InProgress { cursor }) => {
                return Err(SequenceError::AwaitingValidation(cursor))
            }
        };

        let step = match self.template.step(index) {
            Some(step) => step.clone(),
            None => return Err(SequenceError::Complete),
        };
        if draft.step_id != step.id {
            if let Some(target) = self.template.position_of(&draft.step_id) {
                if self.gate.is_locked(target) {
                    return Err(OitError::StepLocked(target).into());
                }
            }
            return Err(SequenceError::WrongStep { expected: step.id.clone(), got: draft.step_id.clone() });
        }
        if self.gate.is_locked(index) {
            return Err(OitError::StepLocked(index).into());
        }

        let now = self.env.now();
        let record = capture_step(&step, draft, now)?;
        if !satisfies_required(&step, &record) {
            return Err(oit_capture::CaptureError::Required(step.id.clone()).into());
        }

        let judged = self.template.requires_validation(index);
        let completes = !judged && index + 1 == self.template.len();
        let persisted = record.clone();
        let data = self.mutate(|data| {
            data.truncate_from(index);
            data.steps.push(persisted);
            if !judged {
                data.validations.insert(index, StepValidation::implicit(index));
            }
            if completes {
                data.completed_at = Some(now);
            }
        })?;
        self.data = Some(data);

        tracing::debug!(visit_id = %self.visit.id, step_index = index, judged, "step captured");

        if judged {
            let attempt = self.gate.submit(index, now);
            self.state = SequencerState::AwaitingValidation { cursor: index };
            self.display = index;
            Ok(CaptureOutcome::Submitted(Submission { step_index: index, attempt, record }))
        } else {
            self.gate.record_implicit(index);
            Ok(self.advance(index + 1).into())
        }
    }

    fn advance(&mut self, next: usize) -> Advance {
        if next >= self.template.len() {
            self.state = SequencerState::Complete;
            self.display = self.template.len().saturating_sub(1);
            tracing::info!(visit_id = %self.visit.id, "all steps captured");
            Advance::Completed
        } else {
            self.state = SequencerState::InProgress { cursor: next };
            self.display = next;
            Advance::To(next)
        }
    }

    // ========================================================================
    // VALIDATION
    // ========================================================================

    /// Applies a verdict from the judge
    pub fn apply_validation(
        &mut self,
        attempt: u32,
        validation: &StepValidation,
    ) -> Result<ValidationOutcome, SequenceError> {
        self.ensure_open()?;
        let index = validation.step_index;
        if self.gate.current_attempt(index) != Some(attempt) {
            tracing::debug!(visit_id = %self.visit.id, step_index = index, attempt, "stale verdict ignored");
            return Ok(ValidationOutcome::Stale);
        }

        let now = self.env.now();
        let completes = validation.validated && index + 1 == self.template.len();
        let verdict = validation.clone();
        let data = self.mutate(|data| {
            if !verdict.validated {
                data.truncate_from(index);
            }
            if completes {
                data.completed_at = Some(now);
            }
            data.validations.insert(index, verdict);
        })?;
        self.data = Some(data);
        self.gate.record(attempt, validation);

        if validation.validated {
            tracing::debug!(visit_id = %self.visit.id, step_index = index, attempt, "step validated");
            Ok(self.advance(index + 1).into())
        } else {
            tracing::debug!(visit_id = %self.visit.id, step_index = index, attempt, "step rejected");
            self.state = SequencerState::AwaitingValidation { cursor: index };
            self.display = index;
            Ok(ValidationOutcome::Rejected { feedback: validation.feedback.clone() })
        }
    }

    /// Reports a submission the judge did not answer in time
    pub fn mark_timed_out(&mut self, index: usize, attempt: u32) -> bool {
        self.gate.expire(index, attempt)
    }

    /// Expires every overdue submission
    pub fn check_timeouts(&mut self) -> Vec<usize> {
        let now = self.env.now();
        self.gate.check_timeouts(now)
    }

    /// Opens a new attempt for a step whose verdict is late or never came
    pub fn retry_validation(&mut self) -> Result<Submission, SequenceError> {
        self.ensure_open()?;
        let SequencerState::AwaitingValidation { cursor } = self.state else {
            return Err(SequenceError::NothingToRetry(self.display));
        };
        match self.gate.status(cursor) {
            GateStatus::Awaiting { .. } | GateStatus::TimedOut { .. } | GateStatus::NotSubmitted => {}
            _ => return Err(SequenceError::NothingToRetry(cursor)),
        }
        let record = self
            .data
            .as_ref()
            .and_then(|d| d.steps.get(cursor))
            .cloned()
            .ok_or(SequenceError::NothingToRetry(cursor))?;

        let attempt = self.gate.submit(cursor, self.env.now());
        tracing::debug!(visit_id = %self.visit.id, step_index = cursor, attempt, "validation retried");
        Ok(Submission { step_index: cursor, attempt, record })
    }

    // ========================================================================
    // NAVIGATION & REDO
    // ========================================================================

    /// Highest step index the technician has reached
    fn reached(&self) -> usize {
        match self.state {
            SequencerState::NotStarted => 0,
            SequencerState::InProgress { cursor } | SequencerState::AwaitingValidation { cursor } => cursor,
            SequencerState::Complete => self.template.len().saturating_sub(1),
        }
    }

    pub fn display_cursor(&self) -> usize {
        self.display
    }

    /// Moves the display cursor within already reached steps
    pub fn navigate(&mut self, index: usize) -> usize {
        self.display = index.min(self.reached());
        self.display
    }

    pub fn go_back(&mut self) -> usize {
        self.navigate(self.display.saturating_sub(1))
    }

    pub fn go_forward(&mut self) -> usize {
        self.navigate(self.display + 1)
    }

    /// Reverts step `index` and every later step, then reopens `index`
    pub fn redo_step(&mut self, index: usize) -> Result<(), SequenceError> {
        self.ensure_open()?;
        let captured = self.data.as_ref().map(|d| d.steps.len()).unwrap_or(0);
        let pending_rejection = matches!(self.gate.status(index), GateStatus::Rejected { .. });
        if index >= captured && !pending_rejection {
            return Err(SequenceError::NotReached(index));
        }

        let data = self.mutate(|data| {
            data.truncate_from(index);
        })?;
        self.data = Some(data);
        self.gate.invalidate_from(index);
        self.state = SequencerState::InProgress { cursor: index };
        self.display = index;
        tracing::debug!(visit_id = %self.visit.id, step_index = index, "steps reverted for redo");
        Ok(())
    }

    // ========================================================================
    // PERSISTENCE
    // ========================================================================

    /// Applies `f` to the cached record and persists it before returning
    fn mutate<F>(&self, f: F) -> Result<SamplingData, SequenceError>
    where
        F: FnOnce(&mut SamplingData),
    {
        let visit_id = self.visit.id.as_str();
        self.cache.update(visit_id, |slot| {
            let data = slot
                .as_mut()
                .ok_or_else(|| SequenceError::Finalized(visit_id.to_string()))?;
            f(data);
            data.touch();
            Ok(data.clone())
        })
    }

    // ========================================================================
    // VIEW
    // ========================================================================

    pub fn view(&self) -> SequencerView {
        let data = self.data.as_ref();
        let steps = self
            .template
            .steps()
            .iter()
            .enumerate()
            .map(|(index, step)| StepView {
                index,
                id: step.id.clone(),
                title: step.title.clone(),
                step_type: step.step_type(),
                required: step.required,
                requires_validation: self.template.requires_validation(index),
                locked: self.gate.is_locked(index),
                validation: self.gate.status(index),
                captured: data.and_then(|d| d.steps.get(index)).cloned(),
            })
            .collect();

        SequencerView {
            visit_id: self.visit.id.clone(),
            template_name: self.template.name.clone(),
            lock: self.lock(),
            state: self.state,
            display_cursor: self.display,
            progress: self.progress(),
            sync_status: data.map(|d| d.sync_status).unwrap_or_default(),
            last_synced_at: data.and_then(|d| d.last_synced_at),
            steps,
            notices: self.notices.clone(),
        }
    }
}

impl std::fmt::Debug for ExecutionSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ExecutionSequencer")
            .field("visit_id", &self.visit.id)
            .field("template_id", &self.template.id)
            .field("state", &self.state)
            .field("progress", &self.progress())
            .finish()
    }
}

/// Where the cursor went after a step was accepted
enum Advance {
    To(usize),
    Completed,
}

impl From<Advance> for CaptureOutcome {
    fn from(advance: Advance) -> Self {
        match advance {
            Advance::To(next) => CaptureOutcome::Advanced { next },
            Advance::Completed => CaptureOutcome::Completed,
        }
    }
}

impl From<Advance> for ValidationOutcome {
    fn from(advance: Advance) -> Self {
        match advance {
            Advance::To(next) => ValidationOutcome::Advanced { next },
            Advance::Completed => ValidationOutcome::Completed,
        }
    }
}
