//! User-facing notices emitted at collaborator boundaries
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A message for the technician. Collaborator failures surface here instead
/// of moving the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub level: NoticeLevel,
    pub visit_id: String,
    pub message: String,
}

impl Notice {
    pub fn info(visit_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, visit_id, message)
    }

    pub fn warning(visit_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, visit_id, message)
    }

    pub fn error(visit_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, visit_id, message)
    }

    fn new(level: NoticeLevel, visit_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            visit_id: visit_id.into(),
            message: message.into(),
        }
    }
}
