//! Unified Error Model
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OitError {
    #[error("TEMPLATE/{0}")]
    Template(String),

    #[error("TEMPLATE/DRIFT: {0}")]
    TemplateDrift(String),

    #[error("LOCK/visit {visit_id} is scheduled for {scheduled}, today is {today}")]
    VisitLocked {
        visit_id: String,
        scheduled: chrono::NaiveDate,
        today: chrono::NaiveDate,
    },

    #[error("CAPTURE/{0}")]
    Capture(String),

    #[error("SEQUENCE/{0}")]
    Sequence(String),

    #[error("GATE/step {0} is locked until the previous step is validated")]
    StepLocked(usize),

    #[error("CACHE/{0}")]
    Cache(String),

    #[error("SYNC/{0}")]
    Sync(String),

    #[error("SERIALIZE/{0}")]
    Serialize(String),
}

impl From<serde_json::Error> for OitError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err.to_string())
    }
}
