//! ELD provider adapters
//!
//! Every supported telematics vendor implements [`EldProvider`], a uniform
//! capability surface the rest of the service programs against. Adapters
//! translate vendor payloads into the normalized record types here and map
//! vendor failures into the closed [`ProviderError`] taxonomy.

pub mod motive;
pub mod registry;
pub mod samsara;

pub use registry::{ProviderRegistry, RegistryError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

/// Provider failure taxonomy.
///
/// Adapters must collapse every vendor-specific failure into one of these
/// variants; callers match exhaustively to decide retry and connection
/// lifecycle behavior.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Credentials were rejected; the connection needs re-authorization
    /// unless a token refresh succeeds.
    #[error("authentication expired: {details}")]
    AuthExpired { details: String },
    /// The vendor throttled us; honor retry_after when given.
    #[error("rate limited by provider")]
    RateLimited { retry_after_secs: Option<u64> },
    /// The requested resource does not exist on the vendor side.
    #[error("not found: {details}")]
    NotFound { details: String },
    /// Network-level or 5xx failure worth retrying.
    #[error("transient provider error: {details}")]
    Transient { details: String },
    /// Anything the adapter could not classify.
    #[error("provider error: {details}")]
    Unknown { details: String },
}

impl ProviderError {
    /// Map an upstream HTTP status into the error taxonomy.
    pub fn from_status(status: u16, body: Option<String>, retry_after_secs: Option<u64>) -> Self {
        let details = body.unwrap_or_default();
        match status {
            401 | 403 => ProviderError::AuthExpired { details },
            404 => ProviderError::NotFound { details },
            429 => ProviderError::RateLimited { retry_after_secs },
            500..=599 => ProviderError::Transient { details },
            _ => ProviderError::Unknown {
                details: format!("HTTP {}: {}", status, details),
            },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() {
            ProviderError::Transient {
                details: error.to_string(),
            }
        } else if error.is_decode() {
            ProviderError::Unknown {
                details: format!("malformed response: {}", error),
            }
        } else {
            ProviderError::Unknown {
                details: error.to_string(),
            }
        }
    }
}

/// Static description of a registered provider.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProviderMetadata {
    /// Stable slug used in URLs and the connections table
    pub slug: String,
    /// Human-readable display name
    pub display_name: String,
    /// Whether the provider pushes webhook events
    pub webhooks: bool,
}

/// Parameters for building an OAuth authorization URL.
#[derive(Debug, Clone)]
pub struct AuthorizeParams {
    pub tenant_id: Uuid,
    pub redirect_uri: String,
    pub state: String,
}

/// Parameters for exchanging an authorization code.
#[derive(Debug, Clone)]
pub struct ExchangeCodeParams {
    pub code: String,
    pub redirect_uri: String,
}

/// Token material returned by an OAuth exchange or refresh.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Provider-side account or organization identifier, when reported
    pub external_id: Option<String>,
}

/// Normalized vehicle as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleRecord {
    pub external_id: String,
    pub name: String,
    pub vin: Option<String>,
    pub license_plate: Option<String>,
}

/// Normalized driver as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverRecord {
    pub external_id: String,
    pub name: String,
    pub license_number: Option<String>,
    pub email: Option<String>,
}

/// Normalized daily hours-of-service summary.
#[derive(Debug, Clone, PartialEq)]
pub struct HosLogRecord {
    pub external_driver_id: String,
    /// Calendar date in YYYY-MM-DD form
    pub log_date: String,
    pub duty_status: String,
    pub drive_time_secs: i64,
    pub on_duty_time_secs: i64,
    /// Violations reported for this day; empty means clean
    pub violations: Vec<HosViolation>,
}

/// A single hours-of-service violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HosViolation {
    /// Violation kind (e.g. "11_hour_driving", "14_hour_shift")
    pub kind: String,
    pub description: Option<String>,
}

/// Normalized GPS breadcrumb.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRecord {
    pub external_vehicle_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_mph: Option<f64>,
    pub heading: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Normalized diagnostic fault code.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultRecord {
    pub external_fault_id: String,
    pub external_vehicle_id: String,
    pub code: String,
    pub description: Option<String>,
    pub severity: Option<String>,
    /// Whether the vendor still reports the fault as active; resolved
    /// faults are stored but never alert
    pub active: bool,
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Normalized monthly per-jurisdiction mileage entry.
#[derive(Debug, Clone, PartialEq)]
pub struct IftaRecord {
    pub external_vehicle_id: String,
    pub jurisdiction: String,
    /// Reporting month in YYYY-MM form
    pub period_month: String,
    pub miles: f64,
}

/// Uniform capability surface every ELD provider adapter implements.
#[async_trait]
pub trait EldProvider: Send + Sync {
    /// Static metadata for this provider.
    fn metadata(&self) -> ProviderMetadata;

    /// Build the OAuth authorization URL the user is redirected to.
    fn authorize_url(&self, params: AuthorizeParams) -> Result<Url, ProviderError>;

    /// Exchange an authorization code for token material.
    async fn exchange_code(&self, params: ExchangeCodeParams) -> Result<TokenGrant, ProviderError>;

    /// Obtain fresh token material from a refresh token.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError>;

    /// Fetch the vehicle roster. Also used as the cheap credential probe
    /// when verifying a connection.
    async fn fetch_vehicles(&self, access_token: &str) -> Result<Vec<VehicleRecord>, ProviderError>;

    /// Fetch the driver roster.
    async fn fetch_drivers(&self, access_token: &str) -> Result<Vec<DriverRecord>, ProviderError>;

    /// Fetch daily hours-of-service summaries on or after `since`.
    async fn fetch_hos_logs(
        &self,
        access_token: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<HosLogRecord>, ProviderError>;

    /// Fetch current vehicle locations.
    async fn fetch_vehicle_locations(
        &self,
        access_token: &str,
    ) -> Result<Vec<LocationRecord>, ProviderError>;

    /// Fetch open diagnostic fault codes.
    async fn fetch_fault_codes(
        &self,
        access_token: &str,
    ) -> Result<Vec<FaultRecord>, ProviderError>;

    /// Fetch per-jurisdiction mileage for the given reporting month.
    async fn fetch_ifta_mileage(
        &self,
        access_token: &str,
        period_month: &str,
    ) -> Result<Vec<IftaRecord>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_status_mapping() {
        assert!(matches!(
            ProviderError::from_status(401, None, None),
            ProviderError::AuthExpired { .. }
        ));
        assert!(matches!(
            ProviderError::from_status(403, None, None),
            ProviderError::AuthExpired { .. }
        ));
        assert!(matches!(
            ProviderError::from_status(404, None, None),
            ProviderError::NotFound { .. }
        ));
        assert!(matches!(
            ProviderError::from_status(429, None, Some(30)),
            ProviderError::RateLimited {
                retry_after_secs: Some(30)
            }
        ));
        assert!(matches!(
            ProviderError::from_status(503, None, None),
            ProviderError::Transient { .. }
        ));
        assert!(matches!(
            ProviderError::from_status(418, None, None),
            ProviderError::Unknown { .. }
        ));
    }
}
