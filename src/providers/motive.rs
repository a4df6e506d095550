//! Motive provider adapter
//!
//! Talks to the Motive (formerly KeepTruckin) fleet API. Motive wraps each
//! list item in an object keyed by the entity name and uses numeric ids,
//! which are normalized to strings here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;
use url::Url;

use crate::providers::{
    AuthorizeParams, DriverRecord, EldProvider, ExchangeCodeParams, FaultRecord, HosLogRecord,
    HosViolation, IftaRecord, LocationRecord, ProviderError, ProviderMetadata, TokenGrant,
    VehicleRecord,
};

pub const MOTIVE_SLUG: &str = "motive";

/// Adapter for the Motive fleet API.
pub struct MotiveProvider {
    client_id: String,
    client_secret: String,
    oauth_base: String,
    api_base: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    company_id: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct VehiclesResponse {
    vehicles: Vec<VehicleWrapper>,
}

#[derive(Debug, Deserialize)]
struct VehicleWrapper {
    vehicle: MotiveVehicle,
}

#[derive(Debug, Deserialize)]
struct MotiveVehicle {
    id: i64,
    number: Option<String>,
    vin: Option<String>,
    license_plate_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriversResponse {
    users: Vec<UserWrapper>,
}

#[derive(Debug, Deserialize)]
struct UserWrapper {
    user: MotiveUser,
}

#[derive(Debug, Deserialize)]
struct MotiveUser {
    id: i64,
    first_name: Option<String>,
    last_name: Option<String>,
    drivers_license_number: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HosLogsResponse {
    logs: Vec<LogWrapper>,
}

#[derive(Debug, Deserialize)]
struct LogWrapper {
    log: MotiveHosLog,
}

#[derive(Debug, Deserialize)]
struct MotiveHosLog {
    driver: MotiveRef,
    date: String,
    duty_status: Option<String>,
    #[serde(default)]
    driving_duration_secs: i64,
    #[serde(default)]
    on_duty_duration_secs: i64,
    #[serde(default)]
    hos_violations: Vec<MotiveViolation>,
}

#[derive(Debug, Deserialize)]
struct MotiveViolation {
    violation_type: String,
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MotiveRef {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct LocationsResponse {
    vehicles: Vec<LocationWrapper>,
}

#[derive(Debug, Deserialize)]
struct LocationWrapper {
    vehicle: MotiveVehicleLocation,
}

#[derive(Debug, Deserialize)]
struct MotiveVehicleLocation {
    id: i64,
    current_location: Option<MotiveGps>,
}

#[derive(Debug, Deserialize)]
struct MotiveGps {
    lat: f64,
    lon: f64,
    speed: Option<f64>,
    bearing: Option<f64>,
    located_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct FaultsResponse {
    fault_codes: Vec<FaultWrapper>,
}

#[derive(Debug, Deserialize)]
struct FaultWrapper {
    fault_code: MotiveFault,
}

#[derive(Debug, Deserialize)]
struct MotiveFault {
    id: i64,
    vehicle: MotiveRef,
    code: String,
    description: Option<String>,
    severity: Option<String>,
    status: Option<String>,
    first_observed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct IftaResponse {
    ifta_trip_summaries: Vec<IftaWrapper>,
}

#[derive(Debug, Deserialize)]
struct IftaWrapper {
    ifta_trip_summary: MotiveIftaSummary,
}

#[derive(Debug, Deserialize)]
struct MotiveIftaSummary {
    vehicle: MotiveRef,
    jurisdiction: String,
    distance: f64,
}

impl MotiveProvider {
    pub fn new(
        client_id: String,
        client_secret: String,
        oauth_base: String,
        api_base: String,
        timeout_seconds: u64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .unwrap_or_default();

        Self {
            client_id,
            client_secret,
            oauth_base,
            api_base,
            client,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        access_token: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse().ok());
            let body = response.text().await.ok();
            Err(ProviderError::from_status(status, body, retry_after))
        }
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenGrant, ProviderError> {
        let response = self
            .client
            .post(format!("{}/token", self.oauth_base))
            .header("Accept", "application/json")
            .form(params)
            .send()
            .await?;

        if response.status().is_success() {
            let token: TokenResponse = response.json().await?;
            // company_id may come back as a number or a string.
            let external_id = token.company_id.map(|v| match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            });
            Ok(TokenGrant {
                access_token: token.access_token,
                refresh_token: token.refresh_token,
                external_id,
            })
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.ok();
            Err(ProviderError::from_status(status, body, None))
        }
    }
}

#[async_trait]
impl EldProvider for MotiveProvider {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            slug: MOTIVE_SLUG.to_string(),
            display_name: "Motive".to_string(),
            webhooks: true,
        }
    }

    fn authorize_url(&self, params: AuthorizeParams) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&format!("{}/authorize", self.oauth_base)).map_err(|e| {
            ProviderError::Unknown {
                details: format!("invalid oauth base: {}", e),
            }
        })?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &params.redirect_uri)
            .append_pair("state", &params.state)
            .append_pair("response_type", "code");
        Ok(url)
    }

    #[instrument(skip(self, params))]
    async fn exchange_code(&self, params: ExchangeCodeParams) -> Result<TokenGrant, ProviderError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("code", &params.code),
            ("redirect_uri", &params.redirect_uri),
        ])
        .await
    }

    #[instrument(skip_all)]
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    #[instrument(skip_all)]
    async fn fetch_vehicles(&self, access_token: &str) -> Result<Vec<VehicleRecord>, ProviderError> {
        let response: VehiclesResponse = self.get_json("/v1/vehicles", access_token, &[]).await?;

        Ok(response
            .vehicles
            .into_iter()
            .map(|w| {
                let v = w.vehicle;
                VehicleRecord {
                    name: v.number.unwrap_or_else(|| v.id.to_string()),
                    external_id: v.id.to_string(),
                    vin: v.vin,
                    license_plate: v.license_plate_number,
                }
            })
            .collect())
    }

    #[instrument(skip_all)]
    async fn fetch_drivers(&self, access_token: &str) -> Result<Vec<DriverRecord>, ProviderError> {
        let response: DriversResponse = self
            .get_json("/v1/users", access_token, &[("role", "driver".to_string())])
            .await?;

        Ok(response
            .users
            .into_iter()
            .map(|w| {
                let u = w.user;
                let name = match (&u.first_name, &u.last_name) {
                    (Some(first), Some(last)) => format!("{} {}", first, last),
                    (Some(first), None) => first.clone(),
                    (None, Some(last)) => last.clone(),
                    (None, None) => u.id.to_string(),
                };
                DriverRecord {
                    external_id: u.id.to_string(),
                    name,
                    license_number: u.drivers_license_number,
                    email: u.email,
                }
            })
            .collect())
    }

    #[instrument(skip_all)]
    async fn fetch_hos_logs(
        &self,
        access_token: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<HosLogRecord>, ProviderError> {
        let response: HosLogsResponse = self
            .get_json(
                "/v1/logs",
                access_token,
                &[("start_date", since.format("%Y-%m-%d").to_string())],
            )
            .await?;

        Ok(response
            .logs
            .into_iter()
            .map(|w| {
                let log = w.log;
                HosLogRecord {
                    external_driver_id: log.driver.id.to_string(),
                    log_date: log.date,
                    duty_status: log.duty_status.unwrap_or_else(|| "off_duty".to_string()),
                    drive_time_secs: log.driving_duration_secs,
                    on_duty_time_secs: log.on_duty_duration_secs,
                    violations: log
                        .hos_violations
                        .into_iter()
                        .map(|v| HosViolation {
                            kind: v.violation_type,
                            description: v.notes,
                        })
                        .collect(),
                }
            })
            .collect())
    }

    #[instrument(skip_all)]
    async fn fetch_vehicle_locations(
        &self,
        access_token: &str,
    ) -> Result<Vec<LocationRecord>, ProviderError> {
        let response: LocationsResponse = self
            .get_json("/v1/vehicle_locations", access_token, &[])
            .await?;

        Ok(response
            .vehicles
            .into_iter()
            .filter_map(|w| {
                let v = w.vehicle;
                v.current_location.map(|gps| LocationRecord {
                    external_vehicle_id: v.id.to_string(),
                    latitude: gps.lat,
                    longitude: gps.lon,
                    speed_mph: gps.speed,
                    heading: gps.bearing,
                    recorded_at: gps.located_at,
                })
            })
            .collect())
    }

    #[instrument(skip_all)]
    async fn fetch_fault_codes(
        &self,
        access_token: &str,
    ) -> Result<Vec<FaultRecord>, ProviderError> {
        let response: FaultsResponse = self.get_json("/v1/fault_codes", access_token, &[]).await?;

        Ok(response
            .fault_codes
            .into_iter()
            .map(|w| {
                let f = w.fault_code;
                FaultRecord {
                    external_fault_id: f.id.to_string(),
                    external_vehicle_id: f.vehicle.id.to_string(),
                    code: f.code,
                    description: f.description,
                    severity: f.severity,
                    active: f.status.as_deref() != Some("resolved"),
                    occurred_at: f.first_observed_at,
                }
            })
            .collect())
    }

    #[instrument(skip_all)]
    async fn fetch_ifta_mileage(
        &self,
        access_token: &str,
        period_month: &str,
    ) -> Result<Vec<IftaRecord>, ProviderError> {
        let response: IftaResponse = self
            .get_json(
                "/v1/ifta/trip_summaries",
                access_token,
                &[("month", period_month.to_string())],
            )
            .await?;

        Ok(response
            .ifta_trip_summaries
            .into_iter()
            .map(|w| {
                let s = w.ifta_trip_summary;
                IftaRecord {
                    external_vehicle_id: s.vehicle.id.to_string(),
                    jurisdiction: s.jurisdiction,
                    period_month: period_month.to_string(),
                    miles: s.distance,
                }
            })
            .collect())
    }
}
