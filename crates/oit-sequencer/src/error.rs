//! Sequencer errors
use oit_cache::CacheError;
use oit_capture::CaptureError;
use oit_core::OitError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SequenceError {
    #[error(transparent)]
    Core(#[from] OitError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("SEQUENCE/NOT_STARTED: the visit has not been started")]
    NotStarted,

    #[error("SEQUENCE/STEP: draft targets {got}, the open step is {expected}")]
    WrongStep { expected: String, got: String },

    #[error("SEQUENCE/AWAITING: step {0} is waiting for validation")]
    AwaitingValidation(usize),

    #[error("SEQUENCE/COMPLETE: every step has been captured")]
    Complete,

    #[error("SEQUENCE/REDO: step {0} has not been captured")]
    NotReached(usize),

    #[error("SEQUENCE/RETRY: step {0} has no validation to retry")]
    NothingToRetry(usize),

    #[error("SEQUENCE/FINALIZED: visit {0} has no local record anymore")]
    Finalized(String),
}

impl SequenceError {
    /// Schedule lock violations block the whole visit
    pub fn is_lock(&self) -> bool {
        matches!(self, Self::Core(OitError::VisitLocked { .. }))
    }
}
