//! API Handlers
use crate::error::ApiError;
use crate::state::{AppState, SharedSession};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use oit_capture::CaptureDraft;
use oit_core::{ScheduledDate, Template, TemplateDocument, Visit, VisitLock};
use oit_sequencer::{CaptureOutcome, ExecutionSequencer, SamplingSession};
use oit_sync::SyncOutcome;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenVisitRequest {
    pub scheduled_date: ScheduledDate,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Template delivered inline instead of fetched from the template source
    #[serde(default)]
    pub template: Option<TemplateDocument>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Back,
    Forward,
}

#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub direction: Option<Direction>,
}

#[derive(Debug, Deserialize)]
pub struct ConnectivityRequest {
    pub online: bool,
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "online": state.env.is_online(),
            "openSessions": state.sessions.lock().len(),
        })),
    )
}

pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let body = state
        .metrics
        .encode()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

/// Visits with local data not yet acknowledged by the server
pub async fn list_unsynced(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let visits = state
        .cache
        .unsynced_visits()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({ "visits": visits })))
}

pub async fn open_visit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<OpenVisitRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let open_lock = state.open_lock(&id);
    let _opening = open_lock.lock().await;

    if let Some(existing) = state.session(&id) {
        let view = existing.lock().await.view().await;
        return Ok((StatusCode::OK, Json(json!(view))));
    }

    let visit = Visit {
        id,
        scheduled_date: request.scheduled_date,
        template_id: request.template_id,
        location: request.location,
    };

    // Trava antes de qualquer leitura remota ou escrita local
    let lock = VisitLock::for_visit(&visit, &state.env);
    if lock.is_locked() {
        return Err(ApiError::Locked { visit_id: visit.id, lock });
    }

    let template = resolve_template(&state, &visit, request.template).await?;
    let sequencer = ExecutionSequencer::new(
        visit.clone(),
        template,
        state.env.clone(),
        state.cache.clone(),
        state.profile.clone(),
    );
    let mut session = SamplingSession::open(
        sequencer,
        state.env.clone(),
        state.judge.clone(),
        state.reconciler.clone(),
    )
    .await?;
    let view = session.view().await;

    let shared: SharedSession = Arc::new(tokio::sync::Mutex::new(session));
    let (current, inserted) = state.register(&visit.id, shared);
    if !inserted {
        let view = current.lock().await.view().await;
        return Ok((StatusCode::OK, Json(json!(view))));
    }
    tracing::info!(visit_id = %visit.id, progress = view.progress, "visit opened");

    Ok((StatusCode::CREATED, Json(json!(view))))
}

async fn resolve_template(
    state: &AppState,
    visit: &Visit,
    inline: Option<TemplateDocument>,
) -> Result<Template, ApiError> {
    let template_id = visit.template_id.clone();
    match (inline, template_id) {
        (Some(doc), template_id) => {
            let id = doc.id.clone().or(template_id).unwrap_or_else(|| format!("inline-{}", visit.id));
            Template::from_document(id, doc).map_err(|e| ApiError::BadRequest(e.to_string()))
        }
        (None, Some(template_id)) => state
            .templates
            .fetch_template(&template_id)
            .await
            .map_err(|e| ApiError::Upstream(e.to_string())),
        (None, None) => Err(ApiError::BadRequest(format!(
            "visit {} has no template",
            visit.id
        ))),
    }
}

pub async fn get_visit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = find(&state, &id)?;
    let view = session.lock().await.view().await;
    Ok(Json(json!(view)))
}

pub async fn capture(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(draft): Json<CaptureDraft>,
) -> Result<Json<Value>, ApiError> {
    let session = find(&state, &id)?;
    let mut session = session.lock().await;

    let outcome = match session.capture(&draft).await {
        Ok(outcome) => outcome,
        Err(err) => {
            state.metrics.captures.with_label_values(&["refused"]).inc();
            return Err(err.into());
        }
    };
    let body = match &outcome {
        CaptureOutcome::Advanced { next } => json!({ "outcome": "advanced", "next": next }),
        CaptureOutcome::Submitted(submission) => {
            state.metrics.validations.with_label_values(&["capture"]).inc();
            json!({
                "outcome": "submitted",
                "stepIndex": submission.step_index,
                "attempt": submission.attempt,
            })
        }
        CaptureOutcome::Completed => json!({ "outcome": "completed" }),
    };
    state.metrics.captures.with_label_values(&["accepted"]).inc();

    let view = session.view().await;
    Ok(Json(json!({ "capture": body, "view": view })))
}

pub async fn retry_validation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = find(&state, &id)?;
    let mut session = session.lock().await;
    let submission = session.retry_validation().await?;
    state.metrics.validations.with_label_values(&["retry"]).inc();

    let view = session.view().await;
    Ok(Json(json!({
        "stepIndex": submission.step_index,
        "attempt": submission.attempt,
        "view": view,
    })))
}

pub async fn redo_step(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, usize)>,
) -> Result<Json<Value>, ApiError> {
    let session = find(&state, &id)?;
    let mut session = session.lock().await;
    session.redo_step(index)?;
    Ok(Json(json!(session.view().await)))
}

pub async fn navigate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<NavigateRequest>,
) -> Result<Json<Value>, ApiError> {
    let session = find(&state, &id)?;
    let mut session = session.lock().await;
    let cursor = match (request.index, request.direction) {
        (Some(index), _) => session.navigate(index),
        (None, Some(Direction::Back)) => session.go_back(),
        (None, Some(Direction::Forward)) => session.go_forward(),
        (None, None) => return Err(ApiError::BadRequest("index or direction required".to_string())),
    };
    Ok(Json(json!({ "displayCursor": cursor })))
}

pub async fn save_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = find(&state, &id)?;
    let mut session = session.lock().await;
    let outcome = session.save_progress().await?;
    record_sync(&state, &outcome);

    let view = session.view().await;
    Ok(Json(json!({ "sync": outcome, "view": view })))
}

pub async fn reset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = find(&state, &id)?;
    let mut session = session.lock().await;
    session.reset()?;
    Ok(Json(json!(session.view().await)))
}

pub async fn close_visit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let shared = state
        .unregister(&id)
        .ok_or_else(|| ApiError::NotFound(format!("visit {} is not open", id)))?;

    // Outra requisição ainda pode segurar a sessão; os polls param quando ela soltar
    match Arc::try_unwrap(shared) {
        Ok(session) => session.into_inner().close(),
        Err(_) => tracing::debug!(visit_id = %id, "session still borrowed, polls stop on last release"),
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_connectivity(
    State(state): State<AppState>,
    Json(request): Json<ConnectivityRequest>,
) -> Json<Value> {
    let previous = state.connectivity.set_online(request.online);
    tracing::info!(online = request.online, previous, "connectivity changed");

    let results = state.reconciler.on_connectivity_change(request.online).await;
    for (_, outcome) in &results {
        record_sync(&state, outcome);
    }
    let synced: Vec<Value> = results
        .iter()
        .map(|(visit_id, outcome)| json!({ "visitId": visit_id, "sync": outcome }))
        .collect();
    Json(json!({ "online": request.online, "synced": synced }))
}

fn find(state: &AppState, id: &str) -> Result<SharedSession, ApiError> {
    state
        .session(id)
        .ok_or_else(|| ApiError::NotFound(format!("visit {} is not open", id)))
}

fn record_sync(state: &AppState, outcome: &SyncOutcome) {
    state.metrics.syncs.with_label_values(&[outcome.label()]).inc();
}
