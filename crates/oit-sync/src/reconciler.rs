//! Sync Reconciler
//!
//! Pushes cached records to the server on explicit triggers: save progress,
//! completion of the final step, and the offline to online transition. There
//! is no timer-based retry. Transport failures leave the record pending and
//! untouched; server rejections and template drift mark it failed.

use crate::error::SyncError;
use crate::remote::{FinalizeReceipt, Finalizer, SamplingServer, TemplateSource};
use oit_cache::SamplingCache;
use oit_core::{Environment, Notice, SamplingData, SyncStatus};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Save progress. The record decides the push kind: a complete one is finalized
    Partial,
    /// Final step reached: push, finalize, drop the local record
    Complete,
}

impl SyncMode {
    fn merge(self, other: SyncMode) -> SyncMode {
        if self == SyncMode::Complete || other == SyncMode::Complete {
            SyncMode::Complete
        } else {
            SyncMode::Partial
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SyncOutcome {
    Synced { revision: u64 },
    /// Pushed, but local edits landed meanwhile; the record stays pending
    Superseded { pushed: u64, current: u64 },
    Finalized { receipt: FinalizeReceipt },
    /// Offline or transport failure; retried on the next trigger
    Pending { reason: String },
    Failed { reason: String },
    /// Another sync of the same visit is running and will pick this up
    Coalesced,
    NothingToSync,
}

impl SyncOutcome {
    /// Notice for the technician, if the outcome deserves one
    pub fn notice(&self, visit_id: &str) -> Option<Notice> {
        match self {
            Self::Synced { .. } => Some(Notice::info(visit_id, "progresso sincronizado")),
            Self::Finalized { receipt } => Some(Notice::info(
                visit_id,
                format!("amostragem finalizada ({})", receipt.artifact_id),
            )),
            Self::Pending { reason } => Some(Notice::warning(
                visit_id,
                format!("sincronização pendente: {}", reason),
            )),
            Self::Failed { reason } => Some(Notice::error(
                visit_id,
                format!("sincronização falhou: {}", reason),
            )),
            Self::Superseded { .. } | Self::Coalesced | Self::NothingToSync => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Synced { .. } => "synced",
            Self::Superseded { .. } => "superseded",
            Self::Finalized { .. } => "finalized",
            Self::Pending { .. } => "pending",
            Self::Failed { .. } => "failed",
            Self::Coalesced => "coalesced",
            Self::NothingToSync => "nothing_to_sync",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. } | Self::Superseded { .. })
    }
}

/// Collaborators of the reconciler
#[derive(Clone)]
pub struct Remote {
    pub server: Arc<dyn SamplingServer>,
    pub templates: Arc<dyn TemplateSource>,
    pub finalizer: Arc<dyn Finalizer>,
}

impl std::fmt::Debug for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Remote").finish_non_exhaustive()
    }
}

pub struct SyncReconciler {
    cache: Arc<SamplingCache>,
    remote: Remote,
    env: Environment,
    /// Visits with a sync running, and the mode requested while it runs
    in_flight: Mutex<HashMap<String, Option<SyncMode>>>,
    last_online: AtomicBool,
}

impl SyncReconciler {
    pub fn new(cache: Arc<SamplingCache>, remote: Remote, env: Environment) -> Self {
        let online = env.is_online();
        Self {
            cache,
            remote,
            env,
            in_flight: Mutex::new(HashMap::new()),
            last_online: AtomicBool::new(online),
        }
    }

    pub fn cache(&self) -> &Arc<SamplingCache> {
        &self.cache
    }

    /// Syncs one visit. A call made while another sync of the same visit is
    /// running returns `Coalesced` and the running sync makes one more pass.
    pub async fn sync(&self, visit_id: &str, mode: SyncMode) -> SyncOutcome {
        {
            let mut in_flight = self.in_flight.lock();
            if let Some(requested) = in_flight.get_mut(visit_id) {
                *requested = Some(requested.map_or(mode, |r| r.merge(mode)));
                tracing::debug!(visit_id, "sync already running, coalesced");
                return SyncOutcome::Coalesced;
            }
            in_flight.insert(visit_id.to_string(), None);
        }

        let mut guard = InFlightGuard {
            in_flight: &self.in_flight,
            visit_id,
            armed: true,
        };
        let mut mode = mode;
        loop {
            let outcome = self.run_once(visit_id, mode).await;
            let mut in_flight = self.in_flight.lock();
            match in_flight.get_mut(visit_id).and_then(Option::take) {
                Some(next) => mode = next,
                None => {
                    in_flight.remove(visit_id);
                    guard.armed = false;
                    return outcome;
                }
            }
        }
    }

    /// Reacts to a connectivity change. On the offline to online transition
    /// every cached record that is not synced gets pushed.
    pub async fn on_connectivity_change(&self, online: bool) -> Vec<(String, SyncOutcome)> {
        let was_online = self.last_online.swap(online, Ordering::SeqCst);
        if !online || was_online {
            return Vec::new();
        }
        tracing::info!("connectivity restored, syncing cached visits");
        self.sync_unsynced().await
    }

    /// Pushes every cached record that is not synced, complete ones as final
    pub async fn sync_unsynced(&self) -> Vec<(String, SyncOutcome)> {
        let visits = match self.cache.unsynced_visits() {
            Ok(visits) => visits,
            Err(err) => {
                tracing::warn!(error = %err, "cannot list cached visits");
                return Vec::new();
            }
        };

        let mut outcomes = Vec::with_capacity(visits.len());
        for visit_id in visits {
            let mode = match self.cache.load(&visit_id) {
                Ok(Some(data)) if data.is_complete() => SyncMode::Complete,
                _ => SyncMode::Partial,
            };
            let outcome = self.sync(&visit_id, mode).await;
            outcomes.push((visit_id, outcome));
        }
        outcomes
    }

    /// Follows a connectivity feed until the sender is dropped
    pub fn spawn_watch(self: Arc<Self>, mut online: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while online.changed().await.is_ok() {
                let now_online = *online.borrow_and_update();
                for (visit_id, outcome) in self.on_connectivity_change(now_online).await {
                    tracing::debug!(visit_id = %visit_id, outcome = ?outcome, "reconnect sync");
                }
            }
        })
    }

    async fn run_once(&self, visit_id: &str, mode: SyncMode) -> SyncOutcome {
        match self.push_record(visit_id, mode).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_transient() => {
                tracing::warn!(visit_id, error = %err, "sync deferred");
                SyncOutcome::Pending { reason: err.to_string() }
            }
            Err(err) => {
                tracing::warn!(visit_id, error = %err, "sync failed");
                if let Err(cache_err) = self.mark_failed(visit_id) {
                    tracing::warn!(visit_id, error = %cache_err, "cannot record sync failure");
                }
                SyncOutcome::Failed { reason: err.to_string() }
            }
        }
    }

    async fn push_record(&self, visit_id: &str, mode: SyncMode) -> Result<SyncOutcome, SyncError> {
        if !self.env.is_online() {
            return Err(SyncError::Offline);
        }
        let Some(data) = self.cache.load(visit_id)? else {
            return Ok(SyncOutcome::NothingToSync);
        };

        self.check_drift(&data).await?;
        let data = self.upload_staged(data).await?;

        // Um registro completo sempre segue push, finalize e clear
        let partial = !data.is_complete();
        if mode == SyncMode::Partial && !partial {
            tracing::debug!(visit_id, "save requested on a complete record, finalizing instead");
        }
        self.remote.server.push(&data, partial).await?;
        tracing::debug!(visit_id, revision = data.revision, partial, "sampling data pushed");

        if partial {
            return Ok(self.acknowledge(&data)?);
        }

        let receipt = self.remote.finalizer.finalize(&data).await?;
        let pushed = data.revision;
        let outcome = self.cache.update(visit_id, |slot| {
            let current = slot.as_ref().map(|d| d.revision).unwrap_or(pushed);
            if current != pushed {
                return Ok::<_, SyncError>(SyncOutcome::Superseded { pushed, current });
            }
            *slot = None;
            Ok(SyncOutcome::Finalized { receipt })
        })?;
        tracing::info!(visit_id, outcome = ?outcome, "visit finalized");
        Ok(outcome)
    }

    /// Refuses records whose template changed underneath them
    async fn check_drift(&self, data: &SamplingData) -> Result<(), SyncError> {
        if !data.is_consistent() {
            return Err(SyncError::TemplateDrift(format!(
                "record for {} has duplicate or excess steps",
                data.visit_id
            )));
        }
        let current = self.remote.templates.fetch_template(&data.template_id).await?;
        if !data.matches_template(&current) {
            return Err(SyncError::TemplateDrift(format!(
                "template {} changed since the visit started",
                data.template_id
            )));
        }
        Ok(())
    }

    /// Uploads staged files and patches their URLs into the cached record
    async fn upload_staged(&self, data: SamplingData) -> Result<SamplingData, SyncError> {
        if !data.has_pending_uploads() {
            return Ok(data);
        }

        let mut uploaded = Vec::new();
        for step in &data.steps {
            for file in step.pending_uploads() {
                let url = self.remote.server.upload_file(&data.visit_id, file).await?;
                tracing::debug!(visit_id = %data.visit_id, step_id = %step.step_id, file = %file.name, "file uploaded");
                uploaded.push((step.step_id.clone(), file.name.clone(), url));
            }
        }

        self.cache.update(&data.visit_id, |slot| {
            let Some(record) = slot.as_mut() else {
                return Ok::<_, SyncError>(());
            };
            for (step_id, name, url) in &uploaded {
                let file = record
                    .steps
                    .iter_mut()
                    .filter(|s| &s.step_id == step_id)
                    .flat_map(|s| s.files.iter_mut())
                    .find(|f| &f.name == name && f.url.is_none());
                if let Some(file) = file {
                    file.url = Some(url.clone());
                }
            }
            Ok(())
        })?;

        Ok(self.cache.load(&data.visit_id)?.unwrap_or(data))
    }

    fn acknowledge(&self, pushed: &SamplingData) -> Result<SyncOutcome, SyncError> {
        let now = self.env.now();
        self.cache.update(&pushed.visit_id, |slot| {
            let Some(record) = slot.as_mut() else {
                return Ok(SyncOutcome::NothingToSync);
            };
            if record.revision != pushed.revision {
                return Ok(SyncOutcome::Superseded {
                    pushed: pushed.revision,
                    current: record.revision,
                });
            }
            record.sync_status = SyncStatus::Synced;
            record.last_synced_at = Some(now);
            Ok(SyncOutcome::Synced { revision: record.revision })
        })
    }

    fn mark_failed(&self, visit_id: &str) -> Result<(), SyncError> {
        self.cache.update(visit_id, |slot| {
            if let Some(record) = slot.as_mut() {
                if record.sync_status != SyncStatus::Synced {
                    record.sync_status = SyncStatus::Failed;
                }
            }
            Ok(())
        })
    }
}

/// Releases the in-flight slot when a sync future is dropped midway
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<String, Option<SyncMode>>>,
    visit_id: &'a str,
    armed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.in_flight.lock().remove(self.visit_id);
        }
    }
}

impl std::fmt::Debug for SyncReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SyncReconciler")
            .field("in_flight", &self.in_flight.lock().len())
            .finish_non_exhaustive()
    }
}
