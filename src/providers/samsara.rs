//! Samsara provider adapter
//!
//! Talks to the Samsara fleet API and translates its payloads into the
//! normalized record types. Samsara wraps list responses in a `data` array
//! and uses camelCase field names.

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

pub const SAMSARA_SLUG: &str = "samsara";

/// Adapter for the Samsara fleet API.
pub struct SamsaraProvider {
    client_id: String,
    client_secret: String,
    oauth_base: String,
    api_base: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    #[serde(rename = "orgId")]
    org_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SamsaraVehicle {
    id: String,
    name: Option<String>,
    vin: Option<String>,
    #[serde(rename = "licensePlate")]
    license_plate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SamsaraDriver {
    id: String,
    name: Option<String>,
    #[serde(rename = "licenseNumber")]
    license_number: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SamsaraHosLog {
    driver: SamsaraRef,
    #[serde(rename = "logDate")]
    log_date: String,
    #[serde(rename = "dutyStatus")]
    duty_status: Option<String>,
    #[serde(rename = "driveDurationMs", default)]
    drive_duration_ms: i64,
    #[serde(rename = "onDutyDurationMs", default)]
    on_duty_duration_ms: i64,
    #[serde(default)]
    violations: Vec<SamsaraViolation>,
}

#[derive(Debug, Deserialize)]
struct SamsaraViolation {
    #[serde(rename = "type")]
    kind: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SamsaraRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SamsaraVehicleLocation {
    id: String,
    location: SamsaraGps,
}

#[derive(Debug, Deserialize)]
struct SamsaraGps {
    latitude: f64,
    longitude: f64,
    #[serde(rename = "speedMilesPerHour")]
    speed_mph: Option<f64>,
    heading: Option<f64>,
    time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SamsaraFault {
    id: String,
    vehicle: SamsaraRef,
    code: String,
    description: Option<String>,
    severity: Option<String>,
    #[serde(rename = "occurredAtTime")]
    occurred_at: Option<DateTime<Utc>>,
    #[serde(rename = "resolvedAtTime")]
    resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SamsaraIftaEntry {
    vehicle: SamsaraRef,
    jurisdiction: String,
    #[serde(rename = "totalMiles")]
    total_miles: f64,
}

impl SamsaraProvider {
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

    async fn token_request(
        &self,
        params: &[(&str, &str)],
    ) -> Result<TokenGrant, ProviderError> {
        let response = self
            .client
            .post(format!("{}/token", self.oauth_base))
            .header("Accept", "application/json")
            .form(params)
            .send()
            .await?;

        if response.status().is_success() {
            let token: TokenResponse = response.json().await?;
            Ok(TokenGrant {
                access_token: token.access_token,
                refresh_token: token.refresh_token,
                external_id: token.org_id,
            })
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.ok();
            Err(ProviderError::from_status(status, body, None))
        }
    }
}

#[async_trait]
impl EldProvider for SamsaraProvider {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            slug: SAMSARA_SLUG.to_string(),
            display_name: "Samsara".to_string(),
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
        let envelope: DataEnvelope<SamsaraVehicle> = self
            .get_json("/fleet/vehicles", access_token, &[])
            .await?;

        Ok(envelope
            .data
            .into_iter()
            .map(|v| VehicleRecord {
                name: v.name.unwrap_or_else(|| v.id.clone()),
                external_id: v.id,
                vin: v.vin,
                license_plate: v.license_plate,
            })
            .collect())
    }

    #[instrument(skip_all)]
    async fn fetch_drivers(&self, access_token: &str) -> Result<Vec<DriverRecord>, ProviderError> {
        let envelope: DataEnvelope<SamsaraDriver> =
            self.get_json("/fleet/drivers", access_token, &[]).await?;

        Ok(envelope
            .data
            .into_iter()
            .map(|d| DriverRecord {
                name: d.name.unwrap_or_else(|| d.id.clone()),
                external_id: d.id,
                license_number: d.license_number,
                email: d.email,
            })
            .collect())
    }

    #[instrument(skip_all)]
    async fn fetch_hos_logs(
        &self,
        access_token: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<HosLogRecord>, ProviderError> {
        let envelope: DataEnvelope<SamsaraHosLog> = self
            .get_json(
                "/fleet/hos/daily-logs",
                access_token,
                &[("startDate", since.format("%Y-%m-%d").to_string())],
            )
            .await?;

        Ok(envelope
            .data
            .into_iter()
            .map(|log| HosLogRecord {
                external_driver_id: log.driver.id,
                log_date: log.log_date,
                duty_status: log.duty_status.unwrap_or_else(|| "off_duty".to_string()),
                drive_time_secs: log.drive_duration_ms / 1000,
                on_duty_time_secs: log.on_duty_duration_ms / 1000,
                violations: log
                    .violations
                    .into_iter()
                    .map(|v| HosViolation {
                        kind: v.kind,
                        description: v.description,
                    })
                    .collect(),
            })
            .collect())
    }

    #[instrument(skip_all)]
    async fn fetch_vehicle_locations(
        &self,
        access_token: &str,
    ) -> Result<Vec<LocationRecord>, ProviderError> {
        let envelope: DataEnvelope<SamsaraVehicleLocation> = self
            .get_json("/fleet/vehicles/locations", access_token, &[])
            .await?;

        Ok(envelope
            .data
            .into_iter()
            .map(|v| LocationRecord {
                external_vehicle_id: v.id,
                latitude: v.location.latitude,
                longitude: v.location.longitude,
                speed_mph: v.location.speed_mph,
                heading: v.location.heading,
                recorded_at: v.location.time,
            })
            .collect())
    }

    #[instrument(skip_all)]
    async fn fetch_fault_codes(
        &self,
        access_token: &str,
    ) -> Result<Vec<FaultRecord>, ProviderError> {
        let envelope: DataEnvelope<SamsaraFault> = self
            .get_json("/fleet/defects/fault-codes", access_token, &[])
            .await?;

        Ok(envelope
            .data
            .into_iter()
            .map(|f| FaultRecord {
                external_fault_id: f.id,
                external_vehicle_id: f.vehicle.id,
                code: f.code,
                description: f.description,
                severity: f.severity,
                active: f.resolved_at.is_none(),
                occurred_at: f.occurred_at,
            })
            .collect())
    }

    #[instrument(skip_all)]
    async fn fetch_ifta_mileage(
        &self,
        access_token: &str,
        period_month: &str,
    ) -> Result<Vec<IftaRecord>, ProviderError> {
        let envelope: DataEnvelope<SamsaraIftaEntry> = self
            .get_json(
                "/fleet/reports/ifta",
                access_token,
                &[("month", period_month.to_string())],
            )
            .await?;

        Ok(envelope
            .data
            .into_iter()
            .map(|entry| IftaRecord {
                external_vehicle_id: entry.vehicle.id,
                jurisdiction: entry.jurisdiction,
                period_month: period_month.to_string(),
                miles: entry.total_miles,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> SamsaraProvider {
        SamsaraProvider::new(
            "client-id".to_string(),
            "client-secret".to_string(),
            format!("{}/oauth2", server.uri()),
            server.uri(),
            5,
        )
    }

    #[tokio::test]
    async fn test_fetch_vehicles_parses_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fleet/vehicles"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"id": "v-1", "name": "Truck 12", "vin": "1FUJA6CK", "licensePlate": "ABC123"},
                    {"id": "v-2", "name": null, "vin": null, "licensePlate": null}
                ]
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let vehicles = provider.fetch_vehicles("tok").await.unwrap();

        assert_eq!(vehicles.len(), 2);
        assert_eq!(vehicles[0].external_id, "v-1");
        assert_eq!(vehicles[0].name, "Truck 12");
        assert_eq!(vehicles[0].vin.as_deref(), Some("1FUJA6CK"));
        // Falls back to the external id when the vendor omits the name.
        assert_eq!(vehicles[1].name, "v-2");
    }

    #[tokio::test]
    async fn test_fetch_vehicles_maps_401_to_auth_expired() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fleet/vehicles"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let result = provider.fetch_vehicles("expired").await;

        assert!(matches!(result, Err(ProviderError::AuthExpired { .. })));
    }

    #[tokio::test]
    async fn test_fetch_drivers_maps_429_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fleet/drivers"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("Retry-After", "30"),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let result = provider.fetch_drivers("tok").await;

        assert!(matches!(
            result,
            Err(ProviderError::RateLimited {
                retry_after_secs: Some(30)
            })
        ));
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-123",
                "refresh_token": "rt-456",
                "orgId": "org-789"
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let grant = provider
            .exchange_code(ExchangeCodeParams {
                code: "auth-code".to_string(),
                redirect_uri: "http://localhost/callback".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(grant.access_token, "at-123");
        assert_eq!(grant.refresh_token.as_deref(), Some("rt-456"));
        assert_eq!(grant.external_id.as_deref(), Some("org-789"));
    }

    #[tokio::test]
    async fn test_hos_logs_convert_durations() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fleet/hos/daily-logs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "driver": {"id": "d-1"},
                    "logDate": "2026-01-10",
                    "dutyStatus": "driving",
                    "driveDurationMs": 3_600_000,
                    "onDutyDurationMs": 7_200_000,
                    "violations": [{"type": "11_hour_driving", "description": "Exceeded 11h"}]
                }]
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let logs = provider.fetch_hos_logs("tok", Utc::now()).await.unwrap();

        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].external_driver_id, "d-1");
        assert_eq!(logs[0].drive_time_secs, 3600);
        assert_eq!(logs[0].on_duty_time_secs, 7200);
        assert_eq!(logs[0].violations[0].kind, "11_hour_driving");
    }

    #[tokio::test]
    async fn test_fault_codes_track_resolution() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fleet/defects/fault-codes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {
                        "id": "f-1",
                        "vehicle": {"id": "v-1"},
                        "code": "SPN 100 FMI 1",
                        "description": "Engine oil pressure",
                        "severity": "critical",
                        "occurredAtTime": "2026-01-10T08:00:00Z"
                    },
                    {
                        "id": "f-2",
                        "vehicle": {"id": "v-1"},
                        "code": "SPN 520 FMI 4",
                        "description": null,
                        "severity": "critical",
                        "occurredAtTime": "2026-01-09T12:00:00Z",
                        "resolvedAtTime": "2026-01-10T06:30:00Z"
                    }
                ]
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let faults = provider.fetch_fault_codes("tok").await.unwrap();

        assert_eq!(faults.len(), 2);
        // Open fault stays active; a resolvedAtTime flips it off.
        assert!(faults[0].active);
        assert!(!faults[1].active);
    }

    #[test]
    fn test_authorize_url_contains_oauth_params() {
        let provider = SamsaraProvider::new(
            "client-id".to_string(),
            "secret".to_string(),
            "https://api.samsara.com/oauth2".to_string(),
            "https://api.samsara.com".to_string(),
            30,
        );

        let url = provider
            .authorize_url(AuthorizeParams {
                tenant_id: uuid::Uuid::new_v4(),
                redirect_uri: "https://app.example.com/callback".to_string(),
                state: "state-token".to_string(),
            })
            .unwrap();

        assert!(url.as_str().starts_with("https://api.samsara.com/oauth2/authorize"));
        let pairs: Vec<_> = url.query_pairs().collect();
        assert!(pairs.iter().any(|(k, v)| k == "client_id" && v == "client-id"));
        assert!(pairs.iter().any(|(k, v)| k == "state" && v == "state-token"));
        assert!(pairs.iter().any(|(k, v)| k == "response_type" && v == "code"));
    }
}
