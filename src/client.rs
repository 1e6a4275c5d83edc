//! Blocking HTTP clients for the external collaborators of the synchronizer.
//!
//! - `ureq` agent with a global timeout, one attempt per request (no retries).
//! - Non-success statuses are returned as [`HttpError::Status`] rather than
//!   folded into transport errors, so callers can report the status code.
//! - Bodies are decoded through `serde_path_to_error` so a schema mismatch
//!   names the JSON path that failed.

use http::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::models::open_meteo::{ArchiveResponse, DAILY_VARIABLES, DailyRecord, NominatimPlace, TimezoneProbe};
use crate::services::resolve::{GeocodedPlace, Geocoder, TimezoneLookup};
use crate::services::sync::{ArchiveRequest, WeatherArchive};

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("http {0}")]
    Status(StatusCode),
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl HttpError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HttpError::Timeout)
    }
}

// Statuses never arrive here: the agent is built with `http_status_as_error(false)`
// and `get_json` inspects them itself.
impl From<ureq::Error> for HttpError {
    fn from(value: ureq::Error) -> Self {
        match value {
            ureq::Error::Timeout(_) => HttpError::Timeout,
            other => HttpError::Transport(other.to_string()),
        }
    }
}

/// Enforces a minimum spacing between calls, across threads.
#[derive(Debug)]
struct Throttle {
    min_spacing: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl Throttle {
    fn new(min_spacing: Duration) -> Self {
        Throttle {
            min_spacing,
            last_call: Mutex::new(None),
        }
    }

    /// Block until `min_spacing` has passed since the previous `wait` returned.
    fn wait(&self) {
        let mut last_call = self.last_call.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_spacing {
                thread::sleep(self.min_spacing - elapsed);
            }
        }
        *last_call = Some(Instant::now());
    }
}

/// Shared agent plus the identifying User-Agent every request carries.
#[derive(Debug, Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    user_agent: String,
}

impl HttpClient {
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        HttpClient {
            agent: ureq::Agent::new_with_config(config),
            user_agent: user_agent.into(),
        }
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T, HttpError> {
        let mut req = self
            .agent
            .get(url)
            .header("Accept", "application/json")
            .header("User-Agent", &self.user_agent);
        for (k, v) in query {
            req = req.query(*k, v);
        }

        let response = req.call()?;
        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status(status));
        }

        let body = response.into_body().read_to_string()?;
        let mut de = serde_json::Deserializer::from_str(&body);
        serde_path_to_error::deserialize(&mut de).map_err(|e| HttpError::Decode(e.to_string()))
    }
}

/// Nominatim's usage policy allows one request per second.
pub const NOMINATIM_MIN_SPACING: Duration = Duration::from_secs(1);

/// Nominatim free-text search, first hit only. Calls are spaced by
/// [`NOMINATIM_MIN_SPACING`] even when several workers share the geocoder.
#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    http: HttpClient,
    search_url: String,
    throttle: Arc<Throttle>,
}

impl NominatimGeocoder {
    pub fn new(http: HttpClient, search_url: impl Into<String>) -> Self {
        NominatimGeocoder {
            http,
            search_url: search_url.into(),
            throttle: Arc::new(Throttle::new(NOMINATIM_MIN_SPACING)),
        }
    }
}

impl Geocoder for NominatimGeocoder {
    fn geocode(&self, name: &str) -> Result<Option<GeocodedPlace>, HttpError> {
        self.throttle.wait();
        let hits: Vec<NominatimPlace> = self.http.get_json(
            &self.search_url,
            &[
                ("q", name.to_string()),
                ("format", "jsonv2".to_string()),
                ("limit", "1".to_string()),
            ],
        )?;
        let Some(hit) = hits.into_iter().next() else {
            return Ok(None);
        };

        let parse = |field: &str, raw: &str| {
            raw.trim()
                .parse::<f64>()
                .map_err(|_| HttpError::Decode(format!("{}: `{}` is not a number", field, raw)))
        };
        Ok(Some(GeocodedPlace {
            latitude: parse("lat", &hit.lat)?,
            longitude: parse("lon", &hit.lon)?,
            display_address: hit.display_name,
        }))
    }
}

/// Timezone lookup backed by the Open-Meteo forecast endpoint, which resolves
/// coordinates to an IANA zone when asked for `timezone=auto`.
#[derive(Debug, Clone)]
pub struct OpenMeteoTimezones {
    http: HttpClient,
    forecast_url: String,
}

impl OpenMeteoTimezones {
    pub fn new(http: HttpClient, forecast_url: impl Into<String>) -> Self {
        OpenMeteoTimezones {
            http,
            forecast_url: forecast_url.into(),
        }
    }
}

impl TimezoneLookup for OpenMeteoTimezones {
    fn timezone_at(&self, latitude: f64, longitude: f64) -> Result<Option<String>, HttpError> {
        let probe: TimezoneProbe = self.http.get_json(
            &self.forecast_url,
            &[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("timezone", "auto".to_string()),
                ("forecast_days", "1".to_string()),
            ],
        )?;
        Ok(probe.timezone.filter(|tz| !tz.trim().is_empty()))
    }
}

/// Historical daily weather from the Open-Meteo archive.
#[derive(Debug, Clone)]
pub struct OpenMeteoArchive {
    http: HttpClient,
    archive_url: String,
}

impl OpenMeteoArchive {
    pub fn new(http: HttpClient, archive_url: impl Into<String>) -> Self {
        OpenMeteoArchive {
            http,
            archive_url: archive_url.into(),
        }
    }
}

impl WeatherArchive for OpenMeteoArchive {
    fn fetch_daily(&self, request: &ArchiveRequest) -> Result<Vec<DailyRecord>, HttpError> {
        let response: ArchiveResponse = self.http.get_json(
            &self.archive_url,
            &[
                ("latitude", request.latitude.to_string()),
                ("longitude", request.longitude.to_string()),
                ("start_date", request.range.start.format("%Y-%m-%d").to_string()),
                ("end_date", request.range.end.format("%Y-%m-%d").to_string()),
                ("daily", DAILY_VARIABLES.join(",")),
                ("timezone", request.timezone.clone()),
            ],
        )?;
        response.daily.records().map_err(HttpError::Decode)
    }
}

/// The three production collaborators, sharing one agent.
pub fn clients_from_config(cfg: &Config) -> (NominatimGeocoder, OpenMeteoTimezones, OpenMeteoArchive) {
    let http = HttpClient::new(cfg.user_agent.clone(), cfg.http_timeout);
    (
        NominatimGeocoder::new(http.clone(), cfg.geocoder_url.clone()),
        OpenMeteoTimezones::new(http.clone(), cfg.timezone_url.clone()),
        OpenMeteoArchive::new(http, cfg.archive_url.clone()),
    )
}
