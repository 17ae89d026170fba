//! Vehicle State Gateway
//!
//! The single entry point the assistant uses to read or change vehicle state.
//! A gateway is built once at startup around a [`VehicleBackend`] and then
//! shared by handle. Its contract is that it never fails the conversation:
//! reads degrade to [`VehicleStatus::fallback`] and writes always report
//! success, with every backend problem logged here and nowhere else.

use crate::{
    backend::{BackendCredentials, BackendMode, MockBackend, SupabaseBackend, VehicleBackend},
    vehicle::{VehicleAction, VehicleStatus},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Why a reading came from the fallback record instead of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// No backend is configured.
    MockMode,
    /// The backend answered but holds no row for the vehicle.
    NotFound,
    /// The backend call failed.
    BackendError,
}

/// Where a [`StatusReading`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    /// Read from the backend.
    Live,
    /// Synthesized from [`VehicleStatus::fallback`].
    Fallback(FallbackReason),
}

/// A vehicle status together with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReading {
    /// The record to answer with, live or fallback.
    pub status: VehicleStatus,
    /// Where `status` came from.
    pub source: StatusSource,
}

impl StatusReading {
    /// True when the reading reflects the backend rather than the fallback
    /// record.
    pub fn is_live(&self) -> bool {
        self.source == StatusSource::Live
    }
}

/// Failures a vehicle-state provider may report to its callers.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Vehicle backend failure: {0}")]
    Backend(String),
}

/// The read/write surface the tools depend on.
///
/// [`VehicleGateway`] is the production implementation and never returns
/// `Err`; the error type exists so the tool layer's containment is explicit.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VehicleState: Send + Sync {
    async fn get_status(&self, vehicle_id: &str) -> Result<StatusReading, GatewayError>;

    async fn update_action(
        &self,
        action: VehicleAction,
        vehicle_id: &str,
    ) -> Result<bool, GatewayError>;
}

/// Resilient accessor and mutator for vehicle status records.
#[derive(Clone)]
pub struct VehicleGateway {
    backend: Arc<dyn VehicleBackend>,
}

impl VehicleGateway {
    /// Wraps an already-built backend.
    pub fn new(backend: Arc<dyn VehicleBackend>) -> Self {
        Self { backend }
    }

    /// A gateway with no backend, permanently serving the fallback record.
    pub fn mock() -> Self {
        Self::new(Arc::new(MockBackend))
    }

    /// Picks the backend from the configured credentials.
    ///
    /// Missing credentials, or credentials the HTTP client rejects, put the
    /// gateway in mock mode for the rest of the process.
    pub fn from_credentials(credentials: Option<BackendCredentials>) -> Self {
        let Some(credentials) = credentials else {
            warn!(
                "Supabase credentials not found (SUPABASE_URL or SUPABASE_KEY/ANON_KEY/SERVICE_KEY). Using MOCK data."
            );
            return Self::mock();
        };

        match SupabaseBackend::new(&credentials) {
            Ok(backend) => {
                info!(url = %credentials.url, "Connected to Supabase vehicle backend.");
                Self::new(Arc::new(backend))
            }
            Err(e) => {
                error!(error = %e, "Failed to set up Supabase client. Using MOCK data.");
                Self::mock()
            }
        }
    }

    /// Whether reads can reach live data or only the fallback record.
    pub fn mode(&self) -> BackendMode {
        self.backend.mode()
    }

    /// Returns the status of `vehicle_id`. Never fails.
    pub async fn get_status(&self, vehicle_id: &str) -> StatusReading {
        if self.backend.mode() == BackendMode::Mock {
            return Self::fallback(vehicle_id, FallbackReason::MockMode);
        }

        match self.backend.fetch_status(vehicle_id).await {
            Ok(Some(status)) => {
                debug!(
                    %vehicle_id,
                    battery_level = status.battery_level,
                    charging_status = %status.charging_status,
                    "Live vehicle status"
                );
                StatusReading {
                    status,
                    source: StatusSource::Live,
                }
            }
            Ok(None) => {
                warn!(%vehicle_id, "Vehicle not found. Serving fallback status.");
                Self::fallback(vehicle_id, FallbackReason::NotFound)
            }
            Err(e) => {
                error!(
                    %vehicle_id,
                    error = %e,
                    "Error fetching vehicle status. Serving fallback status."
                );
                Self::fallback(vehicle_id, FallbackReason::BackendError)
            }
        }
    }

    /// Applies `action` to `vehicle_id`. Always reports success; a failed
    /// write is only logged.
    pub async fn update_action(&self, action: VehicleAction, vehicle_id: &str) -> bool {
        let (column, value) = action.column();
        match self.backend.write_action(vehicle_id, action).await {
            Ok(()) => {
                info!(%vehicle_id, column, value, "Vehicle updated");
            }
            Err(e) => {
                error!(%vehicle_id, column, value, error = %e, "Error updating vehicle status");
            }
        }
        true
    }

    fn fallback(vehicle_id: &str, reason: FallbackReason) -> StatusReading {
        StatusReading {
            status: VehicleStatus::fallback(vehicle_id),
            source: StatusSource::Fallback(reason),
        }
    }
}

#[async_trait]
impl VehicleState for VehicleGateway {
    async fn get_status(&self, vehicle_id: &str) -> Result<StatusReading, GatewayError> {
        Ok(VehicleGateway::get_status(self, vehicle_id).await)
    }

    async fn update_action(
        &self,
        action: VehicleAction,
        vehicle_id: &str,
    ) -> Result<bool, GatewayError> {
        Ok(VehicleGateway::update_action(self, action, vehicle_id).await)
    }
}
