//! Wire models for the external lookups: the Open-Meteo archive and forecast
//! endpoints and the Nominatim search endpoint.
//!
//! Only the fields the synchronizer consumes are modeled; serde ignores the rest.

use chrono::NaiveDate;
use serde::Deserialize;

use crate::db::models::Measurements;

/// Daily variables requested from the archive, in request order.
pub const DAILY_VARIABLES: [&str; 5] = [
    "temperature_2m_max",
    "temperature_2m_min",
    "temperature_2m_mean",
    "precipitation_sum",
    "shortwave_radiation_sum",
];

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveResponse {
    #[serde(default)]
    pub timezone: Option<String>,
    pub daily: DailySeries,
}

/// Parallel arrays indexed by day offset. A variable missing from the body
/// deserializes as empty and is then rejected by [`DailySeries::records`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DailySeries {
    pub time: Vec<NaiveDate>,
    #[serde(default)]
    pub temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    pub temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    pub temperature_2m_mean: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation_sum: Vec<Option<f64>>,
    #[serde(default)]
    pub shortwave_radiation_sum: Vec<Option<f64>>,
}

/// One day of fetched values for a location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub values: Measurements,
}

impl DailySeries {
    /// Zip the parallel arrays into per-day records.
    ///
    /// Errors with the offending variable name when an array does not have
    /// one entry per day.
    pub fn records(&self) -> Result<Vec<DailyRecord>, String> {
        let days = self.time.len();
        let columns: [(&str, &Vec<Option<f64>>); 5] = [
            ("temperature_2m_max", &self.temperature_2m_max),
            ("temperature_2m_min", &self.temperature_2m_min),
            ("temperature_2m_mean", &self.temperature_2m_mean),
            ("precipitation_sum", &self.precipitation_sum),
            ("shortwave_radiation_sum", &self.shortwave_radiation_sum),
        ];
        for (name, values) in columns {
            if values.len() != days {
                return Err(format!(
                    "daily.{} has {} entries, expected {} (one per daily.time entry)",
                    name,
                    values.len(),
                    days
                ));
            }
        }

        Ok(self
            .time
            .iter()
            .enumerate()
            .map(|(i, date)| DailyRecord {
                date: *date,
                values: Measurements {
                    min_temp: self.temperature_2m_min[i],
                    max_temp: self.temperature_2m_max[i],
                    mean_temp: self.temperature_2m_mean[i],
                    precipitation: self.precipitation_sum[i],
                    solar_radiation: self.shortwave_radiation_sum[i],
                },
            })
            .collect())
    }
}

/// A single Nominatim search hit. Coordinates arrive as decimal strings.
#[derive(Debug, Clone, Deserialize)]
pub struct NominatimPlace {
    pub lat: String,
    pub lon: String,
    pub display_name: String,
}

/// The metadata part of an Open-Meteo forecast response requested with
/// `timezone=auto`.
#[derive(Debug, Clone, Deserialize)]
pub struct TimezoneProbe {
    #[serde(default)]
    pub timezone: Option<String>,
}
