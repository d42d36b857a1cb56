//! Prometheus counters for the field agent
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub captures: IntCounterVec,
    pub validations: IntCounterVec,
    pub syncs: IntCounterVec,
    pub open_sessions: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let captures = IntCounterVec::new(
            Opts::new("oit_captures_total", "Step captures by result"),
            &["result"],
        )?;
        let validations = IntCounterVec::new(
            Opts::new("oit_validation_submissions_total", "Judge submissions by trigger"),
            &["trigger"],
        )?;
        let syncs = IntCounterVec::new(
            Opts::new("oit_syncs_total", "Sync attempts by outcome"),
            &["outcome"],
        )?;
        let open_sessions = IntGauge::new("oit_open_sessions", "Sessions currently open")?;

        registry.register(Box::new(captures.clone()))?;
        registry.register(Box::new(validations.clone()))?;
        registry.register(Box::new(syncs.clone()))?;
        registry.register(Box::new(open_sessions.clone()))?;

        Ok(Self { registry, captures, validations, syncs, open_sessions })
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}
