//! Remote collaborators of the reconciler

use crate::error::SyncError;
use async_trait::async_trait;
use oit_core::{FileRef, SamplingData, Template};
use serde::{Deserialize, Serialize};

/// Server persistence API
#[async_trait]
pub trait SamplingServer: Send + Sync {
    /// Uploads one staged file and returns its resolved URL
    async fn upload_file(&self, visit_id: &str, file: &FileRef) -> Result<String, SyncError>;

    async fn push(&self, data: &SamplingData, partial: bool) -> Result<(), SyncError>;
}

/// Source of the current version of a template
#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn fetch_template(&self, template_id: &str) -> Result<Template, SyncError>;
}

/// Produces the final artifact once a visit is complete
#[async_trait]
pub trait Finalizer: Send + Sync {
    async fn finalize(&self, data: &SamplingData) -> Result<FinalizeReceipt, SyncError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeReceipt {
    pub artifact_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Wire shape of a push: the record plus the `partial` flag
#[derive(Debug, Serialize)]
pub struct PushPayload<'a> {
    #[serde(flatten)]
    pub data: &'a SamplingData,
    pub partial: bool,
}
