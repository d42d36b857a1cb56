//! Geolocation acquisition for a draft
use crate::draft::{CaptureDraft, LocationState};
use oit_core::{GeoError, Geolocation};

/// Requests the current position. Failures become a draft state, never an error.
pub async fn acquire_location(geolocation: &dyn Geolocation) -> LocationState {
    match geolocation.current_position().await {
        Ok(position) => LocationState::Acquired { position },
        Err(GeoError::PermissionDenied) => {
            tracing::warn!("geolocation permission denied, continuing without position");
            LocationState::Denied
        }
        Err(err) => {
            tracing::warn!(error = %err, "geolocation unavailable");
            LocationState::Unavailable { reason: err.to_string() }
        }
    }
}

impl CaptureDraft {
    pub async fn locate(&mut self, geolocation: &dyn Geolocation) -> &LocationState {
        self.location = acquire_location(geolocation).await;
        &self.location
    }
}
