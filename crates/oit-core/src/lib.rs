//! OIT Core: Step Schema, Data Model, Environment e Schedule Lock
//!
//! Tipos compartilhados por todos os componentes da execução de amostragem.

pub mod schema;
pub mod template;
pub mod data_model;
pub mod environment;
pub mod lock;
pub mod notice;
pub mod error;

pub use schema::{
    CheckboxConfig, DocumentConfig, ImageConfig, InputConfig, InputType, SignatureConfig,
    StepKind, StepType, TemplateStep,
};
pub use template::{StepsPayload, Template, TemplateDocument};
pub use data_model::{
    progress_percent, FileRef, SamplingData, ScheduledDate, StepData, StepValidation,
    StepValue, SyncStatus, Visit,
};
pub use environment::{
    Clock, Connectivity, ConnectivityFlag, Environment, FixedGeolocation, GeoError,
    GeoPosition, Geolocation, ManualClock, NoGeolocation, SystemClock,
};
pub use lock::VisitLock;
pub use notice::{Notice, NoticeLevel};
pub use error::OitError;

/// Cache key prefix shared by every persisted sampling record
pub const CACHE_KEY_PREFIX: &str = "sampling-data-";
