//! Validation Gate
//!
//! Step `k` is reachable only while step `k-1` holds a positive validation,
//! which chains into a strictly linear unlock order. Every submission gets an
//! attempt number; verdicts for an attempt that is no longer current are
//! dropped.

use super::profile::GateProfile;
use chrono::{DateTime, Utc};
use oit_core::StepValidation;
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-step state as shown to the technician
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum GateStatus {
    NotSubmitted,
    Awaiting { attempt: u32, submitted_at: DateTime<Utc> },
    /// The judge did not answer in time; a manual retry is offered
    TimedOut { attempt: u32, submitted_at: DateTime<Utc> },
    Validated { feedback: Option<String> },
    Rejected { feedback: Option<String> },
}

/// What happened to an incoming verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Accepted,
    Rejected,
    /// Verdict for an attempt that is not pending anymore
    Stale,
}

#[derive(Debug, Clone)]
pub struct ValidationGate {
    entries: BTreeMap<usize, GateStatus>,
    attempts: BTreeMap<usize, u32>,
    profile: GateProfile,
}

impl ValidationGate {
    pub fn new(profile: GateProfile) -> Self {
        Self {
            entries: BTreeMap::new(),
            attempts: BTreeMap::new(),
            profile,
        }
    }

    /// Rebuilds the gate from persisted verdicts
    pub fn restore(profile: GateProfile, validations: &BTreeMap<usize, StepValidation>) -> Self {
        let mut gate = Self::new(profile);
        for (index, validation) in validations {
            let status = if validation.validated {
                GateStatus::Validated { feedback: validation.feedback.clone() }
            } else {
                GateStatus::Rejected { feedback: validation.feedback.clone() }
            };
            gate.entries.insert(*index, status);
        }
        gate
    }

    pub fn profile(&self) -> &GateProfile {
        &self.profile
    }

    /// `index > 0 && !validated(index - 1)`
    pub fn is_locked(&self, index: usize) -> bool {
        index > 0 && !self.is_validated(index - 1)
    }

    pub fn is_validated(&self, index: usize) -> bool {
        matches!(self.entries.get(&index), Some(GateStatus::Validated { .. }))
    }

    pub fn status(&self, index: usize) -> GateStatus {
        self.entries
            .get(&index)
            .cloned()
            .unwrap_or(GateStatus::NotSubmitted)
    }

    pub fn current_attempt(&self, index: usize) -> Option<u32> {
        match self.entries.get(&index) {
            Some(GateStatus::Awaiting { attempt, .. }) | Some(GateStatus::TimedOut { attempt, .. }) => {
                Some(*attempt)
            }
            _ => None,
        }
    }

    /// Opens a new attempt for `index` and returns its number
    pub fn submit(&mut self, index: usize, now: DateTime<Utc>) -> u32 {
        let attempt = self.attempts.entry(index).or_insert(0);
        *attempt += 1;
        let attempt = *attempt;
        self.entries.insert(index, GateStatus::Awaiting { attempt, submitted_at: now });
        tracing::debug!(step_index = index, attempt, "validation submitted");
        attempt
    }

    /// Steps outside the judge are validated at capture time
    pub fn record_implicit(&mut self, index: usize) {
        self.entries.insert(index, GateStatus::Validated { feedback: None });
    }

    pub fn record(&mut self, attempt: u32, validation: &StepValidation) -> GateDecision {
        let index = validation.step_index;
        if self.current_attempt(index) != Some(attempt) {
            tracing::debug!(step_index = index, attempt, "dropping stale validation");
            return GateDecision::Stale;
        }

        if validation.validated {
            self.entries.insert(index, GateStatus::Validated { feedback: validation.feedback.clone() });
            GateDecision::Accepted
        } else {
            self.entries.insert(index, GateStatus::Rejected { feedback: validation.feedback.clone() });
            GateDecision::Rejected
        }
    }

    /// Marks a pending attempt as timed out. Returns false if it was not pending.
    pub fn expire(&mut self, index: usize, attempt: u32) -> bool {
        match self.entries.get(&index) {
            Some(GateStatus::Awaiting { attempt: pending, submitted_at }) if *pending == attempt => {
                let submitted_at = *submitted_at;
                self.entries.insert(index, GateStatus::TimedOut { attempt, submitted_at });
                tracing::warn!(step_index = index, attempt, "validation timed out");
                true
            }
            _ => false,
        }
    }

    /// Expires every submission older than the profile's timeout
    pub fn check_timeouts(&mut self, now: DateTime<Utc>) -> Vec<usize> {
        let limit = self.profile.timeout_delta();
        let overdue: Vec<(usize, u32)> = self
            .entries
            .iter()
            .filter_map(|(index, status)| match status {
                GateStatus::Awaiting { attempt, submitted_at } if now - *submitted_at >= limit => {
                    Some((*index, *attempt))
                }
                _ => None,
            })
            .collect();

        overdue
            .into_iter()
            .filter(|(index, attempt)| self.expire(*index, *attempt))
            .map(|(index, _)| index)
            .collect()
    }

    /// Forgets every verdict and pending attempt from `index` onward
    pub fn invalidate_from(&mut self, index: usize) {
        self.entries.retain(|i, _| *i < index);
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Status of each of the first `total` steps
    pub fn snapshot(&self, total: usize) -> Vec<GateStatus> {
        (0..total).map(|i| self.status(i)).collect()
    }
}

impl Default for ValidationGate {
    fn default() -> Self {
        Self::new(GateProfile::default())
    }
}
