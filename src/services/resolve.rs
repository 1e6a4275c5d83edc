//! Location name → coordinates, owning region and timezone.

use log::debug;

use crate::client::HttpError;
use crate::config::AliasTable;

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodedPlace {
    pub latitude: f64,
    pub longitude: f64,
    /// Comma-separated, most specific first; the last token is the country.
    pub display_address: String,
}

pub trait Geocoder: Send + Sync {
    fn geocode(&self, name: &str) -> Result<Option<GeocodedPlace>, HttpError>;
}

pub trait TimezoneLookup: Send + Sync {
    fn timezone_at(&self, latitude: f64, longitude: f64) -> Result<Option<String>, HttpError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub region: String,
    pub timezone: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("location `{0}` not found")]
    LocationNotFound(String),
    #[error("no timezone found for `{location}` at ({latitude}, {longitude})")]
    TimezoneNotFound {
        location: String,
        latitude: f64,
        longitude: f64,
    },
    #[error("lookup for `{location}` failed: {source}")]
    LookupFailed {
        location: String,
        #[source]
        source: HttpError,
    },
}

pub struct LocationResolver<G, T> {
    geocoder: G,
    timezones: T,
    region_aliases: AliasTable,
    timezone_aliases: AliasTable,
}

impl<G: Geocoder, T: TimezoneLookup> LocationResolver<G, T> {
    /// A resolver with empty alias tables.
    pub fn new(geocoder: G, timezones: T) -> Self {
        LocationResolver {
            geocoder,
            timezones,
            region_aliases: AliasTable::new(),
            timezone_aliases: AliasTable::new(),
        }
    }

    pub fn with_region_aliases(mut self, aliases: AliasTable) -> Self {
        self.region_aliases = aliases;
        self
    }

    pub fn with_timezone_aliases(mut self, aliases: AliasTable) -> Self {
        self.timezone_aliases = aliases;
        self
    }

    pub fn resolve(&self, name: &str) -> Result<ResolvedLocation, ResolveError> {
        let lookup_failed = |source| ResolveError::LookupFailed {
            location: name.to_string(),
            source,
        };

        if name.trim().is_empty() {
            return Err(ResolveError::LocationNotFound(name.to_string()));
        }

        let place = self
            .geocoder
            .geocode(name)
            .map_err(lookup_failed)?
            .ok_or_else(|| ResolveError::LocationNotFound(name.to_string()))?;

        let reported_region = region_from_address(&place.display_address);
        if reported_region.is_empty() {
            return Err(ResolveError::LocationNotFound(name.to_string()));
        }

        let reported_timezone = self
            .timezones
            .timezone_at(place.latitude, place.longitude)
            .map_err(lookup_failed)?
            .ok_or_else(|| ResolveError::TimezoneNotFound {
                location: name.to_string(),
                latitude: place.latitude,
                longitude: place.longitude,
            })?;

        let region = self.region_aliases.canonical(reported_region).to_string();
        let timezone = self.timezone_aliases.canonical(&reported_timezone).to_string();
        if region != reported_region || timezone != reported_timezone {
            debug!(
                "Resolve: {} normalized ({}, {}) -> ({}, {})",
                name, reported_region, reported_timezone, region, timezone
            );
        }

        Ok(ResolvedLocation {
            latitude: place.latitude,
            longitude: place.longitude,
            region,
            timezone,
        })
    }
}

/// The last comma-separated token of a display address, trimmed.
pub fn region_from_address(address: &str) -> &str {
    address.rsplit(',').next().unwrap_or_default().trim()
}
