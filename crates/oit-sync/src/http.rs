//! HTTP clients for the server, template source, finalizer and judge

use crate::error::SyncError;
use crate::remote::{FinalizeReceipt, Finalizer, PushPayload, SamplingServer, TemplateSource};
use async_trait::async_trait;
use oit_core::{FileRef, SamplingData, StepValidation, Template, TemplateDocument};
use oit_gate::{JudgeError, ValidationJudge, ValidationRequest};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

#[derive(Debug, Deserialize)]
struct TicketResponse {
    ticket: String,
}

fn build_client(timeout: Duration) -> Result<Client, SyncError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SyncError::Network(format!("http client: {}", e)))
}

async fn ensure_success(response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::Rejected {
        status: status.as_u16(),
        body,
    })
}

// ============================================================================
// SERVER
// ============================================================================

/// Client for the sampling server API
#[derive(Debug, Clone)]
pub struct HttpServer {
    base_url: String,
    client: Client,
}

impl HttpServer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: build_client(timeout)?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl SamplingServer for HttpServer {
    async fn upload_file(&self, visit_id: &str, file: &FileRef) -> Result<String, SyncError> {
        let path = file.local_path.clone().unwrap_or_default();
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| SyncError::StagedFile { path: path.clone(), reason: e.to_string() })?;

        let mut part = reqwest::multipart::Part::bytes(bytes).file_name(file.name.clone());
        if let Some(content_type) = &file.content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| SyncError::Malformed(format!("content type {}: {}", content_type, e)))?;
        }
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.url(&format!("/visits/{}/files", visit_id)))
            .multipart(form)
            .send()
            .await?;
        let uploaded: UploadResponse = ensure_success(response).await?.json().await?;
        Ok(uploaded.url)
    }

    async fn push(&self, data: &SamplingData, partial: bool) -> Result<(), SyncError> {
        let response = self
            .client
            .post(self.url(&format!("/visits/{}/sampling-data", data.visit_id)))
            .json(&PushPayload { data, partial })
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl TemplateSource for HttpServer {
    async fn fetch_template(&self, template_id: &str) -> Result<Template, SyncError> {
        let response = self
            .client
            .get(self.url(&format!("/templates/{}", template_id)))
            .send()
            .await?;
        let doc: TemplateDocument = ensure_success(response).await?.json().await?;
        Template::from_document(template_id, doc).map_err(|e| SyncError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl Finalizer for HttpServer {
    async fn finalize(&self, data: &SamplingData) -> Result<FinalizeReceipt, SyncError> {
        let response = self
            .client
            .post(self.url(&format!("/visits/{}/finalize", data.visit_id)))
            .json(data)
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }
}

// ============================================================================
// JUDGE
// ============================================================================

/// Client for the external validation judge
#[derive(Debug, Clone)]
pub struct HttpJudge {
    base_url: String,
    client: Client,
}

impl HttpJudge {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: build_client(timeout)?,
        })
    }
}

fn judge_error(err: reqwest::Error) -> JudgeError {
    if err.is_decode() {
        JudgeError::Malformed(err.to_string())
    } else {
        JudgeError::Unreachable(err.to_string())
    }
}

/// A verdict body, or `{ "status": "pending" }` while undecided
fn parse_verdict(body: Value) -> Result<Option<StepValidation>, JudgeError> {
    if body.get("validated").is_some() {
        return serde_json::from_value(body)
            .map(Some)
            .map_err(|e| JudgeError::Malformed(e.to_string()));
    }
    match body.get("status").and_then(Value::as_str) {
        Some("pending") => Ok(None),
        _ => Err(JudgeError::Malformed(format!("unexpected verdict body: {}", body))),
    }
}

#[async_trait]
impl ValidationJudge for HttpJudge {
    async fn submit(&self, request: &ValidationRequest) -> Result<String, JudgeError> {
        let url = format!(
            "{}/visits/{}/steps/{}/validation",
            self.base_url, request.visit_id, request.step_index
        );
        let response = self.client.post(url).json(request).send().await.map_err(judge_error)?;

        let status = response.status();
        if status.is_client_error() {
            return Err(JudgeError::Refused(format!("submission answered {}", status)));
        }
        if !status.is_success() {
            return Err(JudgeError::Unreachable(format!("submission answered {}", status)));
        }
        let ticket: TicketResponse = response.json().await.map_err(judge_error)?;
        Ok(ticket.ticket)
    }

    async fn poll(&self, ticket: &str) -> Result<Option<StepValidation>, JudgeError> {
        let url = format!("{}/validations/{}", self.base_url, ticket);
        let response = self.client.get(url).send().await.map_err(judge_error)?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                Err(JudgeError::Refused(format!("ticket {} is unknown", ticket)))
            }
            status if status.is_success() => {
                let body: Value = response.json().await.map_err(judge_error)?;
                parse_verdict(body)
            }
            status => Err(JudgeError::Unreachable(format!("poll answered {}", status))),
        }
    }
}
