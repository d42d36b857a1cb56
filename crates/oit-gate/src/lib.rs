//! OIT Gate: Validation Gate
//!
//! Tracks the external judge's verdict for each captured step and enforces
//! the linear unlock chain: a step opens only after its predecessor has been
//! validated.
//!
//! # Example
//!
//! ```ignore
//! use oit_gate::{ValidationGate, GateProfile};
//!
//! let mut gate = ValidationGate::new(GateProfile::field());
//! let attempt = gate.submit(0, now);
//! // ... judge answers ...
//! gate.record(attempt, &validation);
//! assert!(!gate.is_locked(1));
//! ```

pub mod gate;
pub mod poll;
pub mod profile;

pub use gate::{GateDecision, GateStatus, ValidationGate};
pub use poll::{spawn_poll, JudgeError, PollEvent, PollHandle, ValidationJudge, ValidationRequest};
pub use profile::GateProfile;
