//! OIT Sequencer: Execution Sequencer
//!
//! Drives a visit through its template one step at a time:
//!
//! ```text
//! NotStarted ──start──▶ InProgress(i) ──capture──▶ AwaitingValidation(i)
//!                           ▲    │                      │ validated
//!                           │    └─(no judge)───────────┤
//!                           └───────────────────────────┘
//!                      InProgress(total) ──▶ Complete ──▶ finalize
//! ```
//!
//! [`ExecutionSequencer`] is the synchronous state machine; [`SamplingSession`]
//! wires it to the judge's polling subscription and to the sync reconciler.

pub mod error;
pub mod sequencer;
pub mod session;
pub mod state;

pub use error::SequenceError;
pub use sequencer::ExecutionSequencer;
pub use session::SamplingSession;
pub use state::{
    CaptureOutcome, SequencerState, SequencerView, StepView, Submission, ValidationOutcome,
};
