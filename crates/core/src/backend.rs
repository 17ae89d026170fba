//! Vehicle Backends
//!
//! A backend is the store that actually holds vehicle records. The gateway
//! talks to it through the [`VehicleBackend`] capability and never sees which
//! implementation it was given:
//!
//! - [`SupabaseBackend`]: the hosted `vehicles` table, reached through
//!   Supabase's PostgREST endpoint.
//! - [`MockBackend`]: an in-process stand-in that always serves the fallback
//!   record and accepts every write.

use crate::vehicle::{ChargingStatus, VehicleAction, VehicleStatus};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::info;

/// Errors raised by a backend. These never leave the gateway.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP request to backend failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid backend credentials: {0}")]
    InvalidCredentials(String),
}

/// Whether a backend holds real data or only serves the fallback record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    Live,
    Mock,
}

/// Read/write access to vehicle records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VehicleBackend: Send + Sync {
    /// Looks up a vehicle. `Ok(None)` means the lookup succeeded with zero rows.
    async fn fetch_status(&self, vehicle_id: &str) -> Result<Option<VehicleStatus>, BackendError>;

    /// Writes the single column that `action` maps to.
    async fn write_action(&self, vehicle_id: &str, action: VehicleAction)
    -> Result<(), BackendError>;

    fn mode(&self) -> BackendMode {
        BackendMode::Live
    }
}

/// URL and API key of a Supabase project.
#[derive(Debug)]
pub struct BackendCredentials {
    pub url: String,
    pub key: SecretString,
}

// --- Mock ---

/// Backend used when no credentials are configured.
///
/// Writes are logged and dropped, so every read keeps returning the same
/// fallback record.
#[derive(Debug, Default, Clone)]
pub struct MockBackend;

#[async_trait]
impl VehicleBackend for MockBackend {
    async fn fetch_status(&self, vehicle_id: &str) -> Result<Option<VehicleStatus>, BackendError> {
        Ok(Some(VehicleStatus::fallback(vehicle_id)))
    }

    async fn write_action(
        &self,
        vehicle_id: &str,
        action: VehicleAction,
    ) -> Result<(), BackendError> {
        let (column, value) = action.column();
        info!(%vehicle_id, column, value, "[MOCK DB] Update accepted");
        Ok(())
    }

    fn mode(&self) -> BackendMode {
        BackendMode::Mock
    }
}

// --- Supabase ---

/// A row of the `vehicles` table as PostgREST returns it. Columns other
/// than `vehicle_id` may be missing or null on hand-seeded rows.
#[derive(Deserialize, Debug)]
struct VehicleRow {
    vehicle_id: String,
    battery_level: Option<u8>,
    ac_is_on: Option<bool>,
    cabin_temperature: Option<f64>,
    is_locked: Option<bool>,
    charging_status: Option<ChargingStatus>,
}

impl From<VehicleRow> for VehicleStatus {
    fn from(row: VehicleRow) -> Self {
        let defaults = VehicleStatus::fallback(&row.vehicle_id);
        Self {
            battery_level: row.battery_level.unwrap_or(defaults.battery_level),
            ac_is_on: row.ac_is_on.unwrap_or(defaults.ac_is_on),
            cabin_temperature: row.cabin_temperature.unwrap_or(defaults.cabin_temperature),
            is_locked: row.is_locked.unwrap_or(defaults.is_locked),
            charging_status: row.charging_status.unwrap_or(defaults.charging_status),
            vehicle_id: row.vehicle_id,
        }
    }
}

/// Backend for the `vehicles` table of a Supabase project.
pub struct SupabaseBackend {
    client: reqwest::Client,
    table_url: String,
}

impl SupabaseBackend {
    /// Builds an HTTP client that authenticates every request with `key`.
    pub fn new(credentials: &BackendCredentials) -> Result<Self, BackendError> {
        let key = credentials.key.expose_secret();
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(key)
                .map_err(|e| BackendError::InvalidCredentials(e.to_string()))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| BackendError::InvalidCredentials(e.to_string()))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        let table_url = format!("{}/rest/v1/vehicles", credentials.url.trim_end_matches('/'));

        Ok(Self { client, table_url })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(BackendError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl VehicleBackend for SupabaseBackend {
    async fn fetch_status(&self, vehicle_id: &str) -> Result<Option<VehicleStatus>, BackendError> {
        let response = self
            .client
            .get(&self.table_url)
            .query(&[
                ("vehicle_id", format!("eq.{}", vehicle_id)),
                ("select", "*".to_string()),
            ])
            .send()
            .await?;
        let rows: Vec<VehicleRow> = Self::check(response).await?.json().await?;
        Ok(rows.into_iter().next().map(VehicleStatus::from))
    }

    async fn write_action(
        &self,
        vehicle_id: &str,
        action: VehicleAction,
    ) -> Result<(), BackendError> {
        let (column, value) = action.column();
        let mut body = serde_json::Map::new();
        body.insert(column.to_string(), serde_json::Value::Bool(value));
        let response = self
            .client
            .patch(&self.table_url)
            .query(&[("vehicle_id", format!("eq.{}", vehicle_id))])
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
