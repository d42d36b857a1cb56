//! Sampling session: drives one sequencer against the judge and the reconciler
//!
//! The session owns the polling handles of its submissions. Closing it (or
//! dropping it) cancels polling; syncs already handed to the reconciler run
//! on their own task and finish regardless.

use crate::error::SequenceError;
use crate::sequencer::ExecutionSequencer;
use crate::state::{CaptureOutcome, SequencerState, SequencerView, Submission, ValidationOutcome};
use oit_capture::{acquire_location, CaptureDraft, LocationState};
use oit_core::{Environment, Notice};
use oit_gate::{spawn_poll, PollEvent, PollHandle, ValidationJudge, ValidationRequest};
use oit_sync::{SyncMode, SyncOutcome, SyncReconciler};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

const EVENT_BUFFER: usize = 32;

pub struct SamplingSession {
    id: Uuid,
    sequencer: ExecutionSequencer,
    env: Environment,
    judge: Arc<dyn ValidationJudge>,
    reconciler: Arc<SyncReconciler>,
    polls: BTreeMap<usize, PollHandle>,
    events_tx: mpsc::Sender<PollEvent>,
    events_rx: mpsc::Receiver<PollEvent>,
}

impl SamplingSession {
    /// Starts (or resumes) the visit and re-submits a capture left without verdict
    pub async fn open(
        mut sequencer: ExecutionSequencer,
        env: Environment,
        judge: Arc<dyn ValidationJudge>,
        reconciler: Arc<SyncReconciler>,
    ) -> Result<Self, SequenceError> {
        sequencer.start()?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let mut session = Self {
            id: Uuid::new_v4(),
            sequencer,
            env,
            judge,
            reconciler,
            polls: BTreeMap::new(),
            events_tx,
            events_rx,
        };
        tracing::info!(session_id = %session.id, visit_id = %session.visit_id(), "session opened");

        if let Some(submission) = session.sequencer.resubmit_pending() {
            session.submit(submission).await;
        }
        if session.sequencer.state() == SequencerState::Complete {
            session.finalize().await;
        }
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn visit_id(&self) -> &str {
        &self.sequencer.visit().id
    }

    pub fn sequencer(&self) -> &ExecutionSequencer {
        &self.sequencer
    }

    /// Applies pending judge events and returns the current view
    pub async fn view(&mut self) -> SequencerView {
        self.pump().await;
        if let Err(err) = self.sequencer.refresh() {
            tracing::warn!(visit_id = %self.visit_id(), error = %err, "cannot refresh cached record");
        }
        self.sequencer.view()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.sequencer.take_notices()
    }

    /// Fills the draft's location from the device
    pub async fn locate(&self, draft: &mut CaptureDraft) -> LocationState {
        draft.locate(self.env.geolocation.as_ref()).await.clone()
    }

    /// Acquires a location without a draft
    pub async fn current_location(&self) -> LocationState {
        acquire_location(self.env.geolocation.as_ref()).await
    }

    pub async fn capture(&mut self, draft: &CaptureDraft) -> Result<CaptureOutcome, SequenceError> {
        self.pump().await;
        let outcome = self.sequencer.capture(draft)?;
        match &outcome {
            CaptureOutcome::Submitted(submission) => self.submit(submission.clone()).await,
            CaptureOutcome::Completed => self.finalize().await,
            CaptureOutcome::Advanced { .. } => {}
        }
        Ok(outcome)
    }

    pub async fn retry_validation(&mut self) -> Result<Submission, SequenceError> {
        let submission = self.sequencer.retry_validation()?;
        self.submit(submission.clone()).await;
        Ok(submission)
    }

    pub fn redo_step(&mut self, index: usize) -> Result<(), SequenceError> {
        self.sequencer.redo_step(index)?;
        self.cancel_polls_from(index);
        Ok(())
    }

    pub fn navigate(&mut self, index: usize) -> usize {
        self.sequencer.navigate(index)
    }

    pub fn go_back(&mut self) -> usize {
        self.sequencer.go_back()
    }

    pub fn go_forward(&mut self) -> usize {
        self.sequencer.go_forward()
    }

    /// Explicit save: pushes the record as partial data
    pub async fn save_progress(&mut self) -> Result<SyncOutcome, SequenceError> {
        self.sequencer.ensure_open()?;
        Ok(self.hand_off(SyncMode::Partial).await)
    }

    pub fn reset(&mut self) -> Result<(), SequenceError> {
        self.sequencer.reset()?;
        self.cancel_polls_from(0);
        Ok(())
    }

    /// Stops polling. Syncs in flight keep running.
    pub fn close(mut self) {
        self.cancel_polls_from(0);
        tracing::info!(session_id = %self.id, visit_id = %self.visit_id(), "session closed");
    }

    // ========================================================================
    // JUDGE EVENTS
    // ========================================================================

    /// Applies every judge event already received, without waiting for more
    pub async fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if let Some(ValidationOutcome::Completed) = self.apply_event(event) {
                self.finalize().await;
            }
            applied += 1;
        }
        if applied > 0 {
            tracing::debug!(visit_id = %self.visit_id(), applied, "judge events applied");
        }
        applied
    }

    /// Waits for the next judge event and applies it. `None` once no poll is running.
    pub async fn next_event(&mut self) -> Option<PollEvent> {
        if self.polls.is_empty() {
            return None;
        }
        let event = self.events_rx.recv().await?;
        let applied = event.clone();
        if let Some(ValidationOutcome::Completed) = self.apply_event(event) {
            self.finalize().await;
        }
        Some(applied)
    }

    fn apply_event(&mut self, event: PollEvent) -> Option<ValidationOutcome> {
        match event {
            PollEvent::Resolved { attempt, validation } => {
                let index = validation.step_index;
                self.forget_poll(index, attempt);
                match self.sequencer.apply_validation(attempt, &validation) {
                    Ok(ValidationOutcome::Rejected { feedback }) => {
                        let message = match &feedback {
                            Some(reason) => format!("etapa {} rejeitada: {}", index + 1, reason),
                            None => format!("etapa {} rejeitada, refaça a captura", index + 1),
                        };
                        let notice = Notice::warning(self.visit_id(), message);
                        self.sequencer.push_notice(notice);
                        Some(ValidationOutcome::Rejected { feedback })
                    }
                    Ok(outcome) => Some(outcome),
                    Err(err) => {
                        tracing::warn!(visit_id = %self.visit_id(), step_index = index, error = %err, "verdict not applied");
                        let notice = Notice::error(self.visit_id(), err.to_string());
                        self.sequencer.push_notice(notice);
                        None
                    }
                }
            }
            PollEvent::TimedOut { step_index, attempt } => {
                self.forget_poll(step_index, attempt);
                if self.sequencer.mark_timed_out(step_index, attempt) {
                    let notice = Notice::warning(
                        self.visit_id(),
                        format!("validação da etapa {} sem resposta, tente novamente", step_index + 1),
                    );
                    self.sequencer.push_notice(notice);
                }
                None
            }
            PollEvent::Failed { step_index, attempt, reason } => {
                self.forget_poll(step_index, attempt);
                if self.sequencer.mark_timed_out(step_index, attempt) {
                    let notice = Notice::error(self.visit_id(), reason);
                    self.sequencer.push_notice(notice);
                }
                None
            }
        }
    }

    // ========================================================================
    // COLLABORATORS
    // ========================================================================

    async fn submit(&mut self, submission: Submission) {
        let request = ValidationRequest {
            visit_id: self.visit_id().to_string(),
            step_index: submission.step_index,
            attempt: submission.attempt,
            step: submission.record,
        };

        match self.judge.submit(&request).await {
            Ok(ticket) => {
                let handle = spawn_poll(
                    self.judge.clone(),
                    ticket,
                    submission.step_index,
                    submission.attempt,
                    self.sequencer.gate().profile(),
                    self.events_tx.clone(),
                );
                self.polls.insert(submission.step_index, handle);
            }
            Err(err) => {
                tracing::warn!(
                    visit_id = %self.visit_id(),
                    step_index = submission.step_index,
                    attempt = submission.attempt,
                    error = %err,
                    "judge submission failed"
                );
                self.sequencer.mark_timed_out(submission.step_index, submission.attempt);
                let notice = Notice::warning(
                    self.visit_id(),
                    format!("não foi possível enviar a etapa {} para validação", submission.step_index + 1),
                );
                self.sequencer.push_notice(notice);
            }
        }
    }

    async fn finalize(&mut self) {
        self.hand_off(SyncMode::Complete).await;
    }

    /// Runs the sync on its own task so closing the session cannot cut it short
    async fn hand_off(&mut self, mode: SyncMode) -> SyncOutcome {
        let reconciler = self.reconciler.clone();
        let visit_id = self.visit_id().to_string();
        let task = tokio::spawn(async move { reconciler.sync(&visit_id, mode).await });

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(err) => SyncOutcome::Pending { reason: err.to_string() },
        };
        if let Some(notice) = outcome.notice(self.visit_id()) {
            self.sequencer.push_notice(notice);
        }
        if let Err(err) = self.sequencer.refresh() {
            tracing::warn!(visit_id = %self.visit_id(), error = %err, "cannot refresh cached record");
        }
        outcome
    }

    fn forget_poll(&mut self, index: usize, attempt: u32) {
        if self.polls.get(&index).map(|h| h.attempt) == Some(attempt) {
            self.polls.remove(&index);
        }
    }

    fn cancel_polls_from(&mut self, index: usize) {
        for (_, handle) in self.polls.split_off(&index) {
            handle.cancel();
        }
    }
}

impl std::fmt::Debug for SamplingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SamplingSession")
            .field("id", &self.id)
            .field("sequencer", &self.sequencer)
            .field("polls", &self.polls.len())
            .finish()
    }
}
