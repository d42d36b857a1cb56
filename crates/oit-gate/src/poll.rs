//! Judge polling as a cancellable subscription
//!
//! A submission is polled by a spawned task at the profile's fixed interval.
//! The task reports over a channel and stops once it has reported, or when
//! [`PollHandle::cancel`] is called or the handle is dropped.

use crate::profile::GateProfile;
use async_trait::async_trait;
use oit_core::{StepData, StepValidation};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JudgeError {
    #[error("JUDGE/UNREACHABLE: {0}")]
    Unreachable(String),
    #[error("JUDGE/REFUSED: {0}")]
    Refused(String),
    #[error("JUDGE/MALFORMED: {0}")]
    Malformed(String),
}

impl JudgeError {
    /// Unreachable and malformed answers are retried on the next tick
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Refused(_))
    }
}

/// Payload sent to the judge for one capture attempt
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    pub visit_id: String,
    pub step_index: usize,
    pub attempt: u32,
    pub step: StepData,
}

/// External validation judge
#[async_trait]
pub trait ValidationJudge: Send + Sync {
    /// Hands a captured step to the judge and returns a ticket to poll
    async fn submit(&self, request: &ValidationRequest) -> Result<String, JudgeError>;

    /// `Ok(None)` while the verdict is not ready
    async fn poll(&self, ticket: &str) -> Result<Option<StepValidation>, JudgeError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    Resolved { attempt: u32, validation: StepValidation },
    TimedOut { step_index: usize, attempt: u32 },
    /// The judge refused the ticket; polling stops
    Failed { step_index: usize, attempt: u32, reason: String },
}

/// Owner side of a running poll. Dropping it stops the task.
#[derive(Debug)]
pub struct PollHandle {
    pub step_index: usize,
    pub attempt: u32,
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Starts polling `ticket` for step `step_index`, attempt `attempt`
pub fn spawn_poll(
    judge: Arc<dyn ValidationJudge>,
    ticket: String,
    step_index: usize,
    attempt: u32,
    profile: &GateProfile,
    events: mpsc::Sender<PollEvent>,
) -> PollHandle {
    let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
    let interval = profile.poll_interval();
    let deadline = tokio::time::Instant::now() + profile.validation_timeout();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    tracing::debug!(step_index, attempt, "validation poll cancelled");
                    return;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    let _ = events.send(PollEvent::TimedOut { step_index, attempt }).await;
                    return;
                }
                _ = ticker.tick() => {
                    match judge.poll(&ticket).await {
                        Ok(Some(mut validation)) => {
                            validation.step_index = step_index;
                            let _ = events.send(PollEvent::Resolved { attempt, validation }).await;
                            return;
                        }
                        Ok(None) => {}
                        Err(err) if !err.is_transient() => {
                            tracing::warn!(step_index, attempt, error = %err, "judge refused validation ticket");
                            let reason = err.to_string();
                            let _ = events.send(PollEvent::Failed { step_index, attempt, reason }).await;
                            return;
                        }
                        Err(err) => {
                            tracing::warn!(step_index, attempt, error = %err, "validation poll failed, retrying next tick");
                        }
                    }
                }
            }
        }
    });

    PollHandle {
        step_index,
        attempt,
        cancel: Some(cancel_tx),
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Answers after a fixed number of polls
    struct SlowJudge {
        polls: AtomicU32,
        answer_after: u32,
        verdict: bool,
    }

    #[async_trait]
    impl ValidationJudge for SlowJudge {
        async fn submit(&self, _request: &ValidationRequest) -> Result<String, JudgeError> {
            Ok("ticket-1".to_string())
        }

        async fn poll(&self, _ticket: &str) -> Result<Option<StepValidation>, JudgeError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1 {
                return Err(JudgeError::Unreachable("flaky".to_string()));
            }
            if n >= self.answer_after {
                Ok(Some(StepValidation { step_index: 99, validated: self.verdict, feedback: None }))
            } else {
                Ok(None)
            }
        }
    }

    fn quick_profile(timeout_secs: u64) -> GateProfile {
        GateProfile {
            name: "test".to_string(),
            poll_interval_ms: 5,
            validation_timeout_secs: timeout_secs,
        }
    }

    #[tokio::test]
    async fn test_poll_resolves_and_stops() {
        let judge = Arc::new(SlowJudge { polls: AtomicU32::new(0), answer_after: 3, verdict: true });
        let (tx, mut rx) = mpsc::channel(4);
        let handle = spawn_poll(judge.clone(), "ticket-1".into(), 2, 1, &quick_profile(5), tx);

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(
            event,
            PollEvent::Resolved {
                attempt: 1,
                validation: StepValidation { step_index: 2, validated: true, feedback: None },
            }
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.is_finished());
        assert_eq!(judge.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_times_out() {
        let judge = Arc::new(SlowJudge { polls: AtomicU32::new(0), answer_after: u32::MAX, verdict: true });
        let (tx, mut rx) = mpsc::channel(4);
        let _handle = spawn_poll(judge, "t".into(), 0, 4, &quick_profile(0), tx);

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(event, PollEvent::TimedOut { step_index: 0, attempt: 4 });
    }

    #[tokio::test]
    async fn test_cancel_and_drop_stop_polling() {
        let judge = Arc::new(SlowJudge { polls: AtomicU32::new(0), answer_after: u32::MAX, verdict: false });
        let (tx, mut rx) = mpsc::channel(4);

        let handle = spawn_poll(judge.clone(), "t".into(), 0, 1, &quick_profile(60), tx.clone());
        handle.cancel();
        let dropped = spawn_poll(judge.clone(), "t".into(), 1, 1, &quick_profile(60), tx);
        drop(dropped);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let polls = judge.polls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(judge.polls.load(Ordering::SeqCst), polls);
        assert!(rx.try_recv().is_err());
    }

    struct RefusingJudge;

    #[async_trait]
    impl ValidationJudge for RefusingJudge {
        async fn submit(&self, _request: &ValidationRequest) -> Result<String, JudgeError> {
            Err(JudgeError::Refused("no".into()))
        }

        async fn poll(&self, _ticket: &str) -> Result<Option<StepValidation>, JudgeError> {
            Err(JudgeError::Refused("unknown ticket".into()))
        }
    }

    #[tokio::test]
    async fn test_refused_ticket_fails_once() {
        let (tx, mut rx) = mpsc::channel(4);
        let _handle = spawn_poll(Arc::new(RefusingJudge), "gone".into(), 3, 2, &quick_profile(60), tx);

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(event, PollEvent::Failed { step_index: 3, attempt: 2, .. }));
    }
}
