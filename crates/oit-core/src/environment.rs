//! Environment: capacidades do dispositivo injetadas no sequenciador
//!
//! Clock, connectivity and geolocation are reached only through this object
//! so tests can substitute fakes.

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Connectivity state toggled by platform events
#[derive(Debug)]
pub struct ConnectivityFlag {
    online: AtomicBool,
}

impl ConnectivityFlag {
    pub fn new(online: bool) -> Self {
        Self { online: AtomicBool::new(online) }
    }

    /// Stores the new state and returns the previous one
    pub fn set_online(&self, online: bool) -> bool {
        self.online.swap(online, Ordering::SeqCst)
    }
}

impl Default for ConnectivityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeoError {
    #[error("GEO/permission denied")]
    PermissionDenied,
    #[error("GEO/position unavailable: {0}")]
    Unavailable(String),
    #[error("GEO/timeout")]
    Timeout,
}

#[async_trait]
pub trait Geolocation: Send + Sync {
    async fn current_position(&self) -> Result<GeoPosition, GeoError>;
}

/// Device without a location provider
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGeolocation;

#[async_trait]
impl Geolocation for NoGeolocation {
    async fn current_position(&self) -> Result<GeoPosition, GeoError> {
        Err(GeoError::Unavailable("no location provider".to_string()))
    }
}

/// Always answers with the same result
#[derive(Debug, Clone)]
pub struct FixedGeolocation(pub Result<GeoPosition, GeoError>);

#[async_trait]
impl Geolocation for FixedGeolocation {
    async fn current_position(&self) -> Result<GeoPosition, GeoError> {
        self.0.clone()
    }
}

/// Capabilities handed to the sequencer at construction
#[derive(Clone)]
pub struct Environment {
    pub clock: Arc<dyn Clock>,
    pub connectivity: Arc<dyn Connectivity>,
    pub geolocation: Arc<dyn Geolocation>,
    /// UTC offset of the sampling site, used for calendar-day comparisons
    pub site_offset: FixedOffset,
}

impl Environment {
    pub fn new(
        clock: Arc<dyn Clock>,
        connectivity: Arc<dyn Connectivity>,
        geolocation: Arc<dyn Geolocation>,
    ) -> Self {
        Self {
            clock,
            connectivity,
            geolocation,
            site_offset: utc(),
        }
    }

    /// System clock, always online, no geolocation
    pub fn system() -> Self {
        Self::new(
            Arc::new(SystemClock),
            Arc::new(ConnectivityFlag::default()),
            Arc::new(NoGeolocation),
        )
    }

    pub fn with_site_offset(mut self, offset: FixedOffset) -> Self {
        self.site_offset = offset;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("now", &self.now())
            .field("online", &self.is_online())
            .field("site_offset", &self.site_offset)
            .finish()
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2026, 10, 18, 8, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::hours(2));
        assert_eq!(clock.now(), start + Duration::hours(2));
    }

    #[test]
    fn test_connectivity_flag_reports_previous() {
        let flag = ConnectivityFlag::new(false);
        assert!(!flag.set_online(true));
        assert!(flag.is_online());
    }

    #[tokio::test]
    async fn test_fixed_geolocation() {
        let geo = FixedGeolocation(Err(GeoError::PermissionDenied));
        assert_eq!(geo.current_position().await, Err(GeoError::PermissionDenied));
    }
}
