//! Shared fixtures for unit tests: an in-memory store and fake collaborators.

use diesel::sqlite::SqliteConnection;
use http::StatusCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::client::HttpError;
use crate::models::open_meteo::DailyRecord;
use crate::services::migrate::{open_store, prepare_store};
use crate::services::resolve::{GeocodedPlace, Geocoder, ResolvedLocation, TimezoneLookup};
use crate::services::sync::{ArchiveRequest, WeatherArchive};

pub fn memory_store() -> SqliteConnection {
    let mut conn = open_store(":memory:").expect("in-memory sqlite");
    prepare_store(&mut conn).expect("prepare in-memory store");
    conn
}

pub fn resolved_london() -> ResolvedLocation {
    ResolvedLocation {
        latitude: 51.5073,
        longitude: -0.1276,
        region: "Great Britain".to_string(),
        timezone: "Europe/London".to_string(),
    }
}

#[derive(Debug, Default)]
pub struct FakeGeocoder {
    places: HashMap<String, GeocodedPlace>,
    failing: bool,
}

impl FakeGeocoder {
    pub fn with(mut self, name: &str, latitude: f64, longitude: f64, address: &str) -> Self {
        self.places.insert(
            name.to_string(),
            GeocodedPlace {
                latitude,
                longitude,
                display_address: address.to_string(),
            },
        );
        self
    }

    /// Every lookup fails at the transport level.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }
}

impl Geocoder for FakeGeocoder {
    fn geocode(&self, name: &str) -> Result<Option<GeocodedPlace>, HttpError> {
        if self.failing {
            return Err(HttpError::Transport("connection refused".to_string()));
        }
        Ok(self.places.get(name).cloned())
    }
}

#[derive(Debug, Default)]
pub struct FakeTimezones {
    zones: Vec<(f64, f64, String)>,
}

impl FakeTimezones {
    pub fn with(mut self, latitude: f64, longitude: f64, timezone: &str) -> Self {
        self.zones.push((latitude, longitude, timezone.to_string()));
        self
    }
}

impl TimezoneLookup for FakeTimezones {
    fn timezone_at(&self, latitude: f64, longitude: f64) -> Result<Option<String>, HttpError> {
        Ok(self
            .zones
            .iter()
            .find(|(lat, lon, _)| *lat == latitude && *lon == longitude)
            .map(|(_, _, tz)| tz.clone()))
    }
}

#[derive(Debug, Clone)]
enum ArchiveReply {
    Records(Vec<DailyRecord>),
    Status(u16),
    Timeout,
}

/// Archive keyed by request coordinates. Unknown coordinates get an empty series.
#[derive(Debug, Default)]
pub struct FakeArchive {
    replies: Vec<(f64, f64, ArchiveReply)>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ArchiveRequest>>,
    trip: Option<Arc<AtomicBool>>,
}

impl FakeArchive {
    pub fn with_records(self, latitude: f64, longitude: f64, records: Vec<DailyRecord>) -> Self {
        self.reply(latitude, longitude, ArchiveReply::Records(records))
    }

    pub fn with_status(self, latitude: f64, longitude: f64, status: u16) -> Self {
        self.reply(latitude, longitude, ArchiveReply::Status(status))
    }

    pub fn with_timeout(self, latitude: f64, longitude: f64) -> Self {
        self.reply(latitude, longitude, ArchiveReply::Timeout)
    }

    /// Raise `flag` on every fetch, as an operator abort would mid-batch.
    pub fn tripping(mut self, flag: Arc<AtomicBool>) -> Self {
        self.trip = Some(flag);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ArchiveRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn reply(mut self, latitude: f64, longitude: f64, reply: ArchiveReply) -> Self {
        self.replies.push((latitude, longitude, reply));
        self
    }
}

impl WeatherArchive for FakeArchive {
    fn fetch_daily(&self, request: &ArchiveRequest) -> Result<Vec<DailyRecord>, HttpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        if let Some(flag) = &self.trip {
            flag.store(true, Ordering::SeqCst);
        }

        let reply = self
            .replies
            .iter()
            .find(|(lat, lon, _)| *lat == request.latitude && *lon == request.longitude)
            .map(|(_, _, reply)| reply.clone());
        match reply {
            Some(ArchiveReply::Records(records)) => Ok(records),
            Some(ArchiveReply::Status(code)) => Err(HttpError::Status(
                StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            )),
            Some(ArchiveReply::Timeout) => Err(HttpError::Timeout),
            None => Ok(Vec::new()),
        }
    }
}
