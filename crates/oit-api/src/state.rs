//! Shared agent state: collaborators and open sessions

use crate::config::{AgentConfig, ConfigError};
use crate::metrics::Metrics;
use oit_cache::{CacheError, FileStore, KeyValueStore, MemoryStore, SamplingCache};
use oit_core::{ConnectivityFlag, Environment, NoGeolocation, SystemClock};
use oit_gate::{GateProfile, ValidationJudge};
use oit_sequencer::SamplingSession;
use oit_sync::{HttpJudge, HttpServer, Remote, SyncError, SyncReconciler, TemplateSource};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("METRICS/{0}")]
    Metrics(#[from] prometheus::Error),
}

pub type SharedSession = Arc<tokio::sync::Mutex<SamplingSession>>;

#[derive(Clone)]
pub struct AppState {
    pub env: Environment,
    pub connectivity: Arc<ConnectivityFlag>,
    pub cache: Arc<SamplingCache>,
    pub reconciler: Arc<SyncReconciler>,
    pub templates: Arc<dyn TemplateSource>,
    pub judge: Arc<dyn ValidationJudge>,
    pub profile: GateProfile,
    pub sessions: Arc<Mutex<HashMap<String, SharedSession>>>,
    /// One open at a time per visit
    opening: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
    pub metrics: Metrics,
}

/// Everything the agent talks to, injected so tests can swap in fakes
pub struct Collaborators {
    pub store: Arc<dyn KeyValueStore>,
    pub remote: Remote,
    pub judge: Arc<dyn ValidationJudge>,
}

impl AppState {
    pub fn new(
        env: Environment,
        connectivity: Arc<ConnectivityFlag>,
        collaborators: Collaborators,
        profile: GateProfile,
    ) -> Result<Self, StartupError> {
        let cache = Arc::new(SamplingCache::new(collaborators.store));
        let templates = collaborators.remote.templates.clone();
        let reconciler = Arc::new(SyncReconciler::new(cache.clone(), collaborators.remote, env.clone()));
        Ok(Self {
            env,
            connectivity,
            cache,
            reconciler,
            templates,
            judge: collaborators.judge,
            profile,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            opening: Arc::new(Mutex::new(HashMap::new())),
            metrics: Metrics::new()?,
        })
    }

    /// Production wiring: system clock, HTTP collaborators, configured cache
    pub fn from_config(config: &AgentConfig) -> Result<Self, StartupError> {
        let connectivity = Arc::new(ConnectivityFlag::new(true));
        let env = Environment::new(Arc::new(SystemClock), connectivity.clone(), Arc::new(NoGeolocation))
            .with_site_offset(config.site_offset()?);

        let store: Arc<dyn KeyValueStore> = match &config.cache_dir {
            Some(dir) => Arc::new(FileStore::open(dir)?),
            None => {
                tracing::warn!("no cache directory configured, captured data will not survive a restart");
                Arc::new(MemoryStore::new())
            }
        };

        let server = Arc::new(HttpServer::new(config.server_url.clone(), config.http_timeout())?);
        let judge = Arc::new(HttpJudge::new(config.judge_url.clone(), config.http_timeout())?);
        let remote = Remote {
            server: server.clone(),
            templates: server.clone(),
            finalizer: server,
        };

        Self::new(env, connectivity, Collaborators { store, remote, judge }, config.gate_profile())
    }

    pub fn session(&self, visit_id: &str) -> Option<SharedSession> {
        self.sessions.lock().get(visit_id).cloned()
    }

    /// Lock held while a visit is being opened
    pub fn open_lock(&self, visit_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.opening.lock().entry(visit_id.to_string()).or_default().clone()
    }

    /// Registers a session unless one is already open; returns the one in the map
    pub fn register(&self, visit_id: &str, session: SharedSession) -> (SharedSession, bool) {
        let mut sessions = self.sessions.lock();
        let inserted = !sessions.contains_key(visit_id);
        let current = sessions.entry(visit_id.to_string()).or_insert(session).clone();
        self.metrics.open_sessions.set(sessions.len() as i64);
        (current, inserted)
    }

    pub fn unregister(&self, visit_id: &str) -> Option<SharedSession> {
        let mut sessions = self.sessions.lock();
        let removed = sessions.remove(visit_id);
        self.metrics.open_sessions.set(sessions.len() as i64);
        self.opening.lock().remove(visit_id);
        removed
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("env", &self.env)
            .field("sessions", &self.sessions.lock().len())
            .finish_non_exhaustive()
    }
}
