//! Merge policy for daily readings.
//!
//! A stored field is a placeholder when it is absent or exactly zero. Only
//! placeholders are replaced by fetched values, so a partial re-fetch can
//! backfill gaps but never overwrite a populated measurement.
//!
//! A genuine zero (a dry day) is indistinguishable from a placeholder, so a
//! later fetch may replace it with a non-zero value for the same day.

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::debug;

use crate::db::models::{Measurements, NewReading, Reading, ReadingChanges};
use crate::models::open_meteo::DailyRecord;
use crate::schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    Inserted,
    Updated,
    Unchanged,
}

pub fn is_placeholder(value: Option<f64>) -> bool {
    match value {
        None => true,
        Some(v) => v == 0.0,
    }
}

/// The stored value survives unless it is a placeholder and a fetched value exists.
fn merge_field(stored: Option<f64>, fetched: Option<f64>) -> Option<f64> {
    if is_placeholder(stored) { fetched.or(stored) } else { stored }
}

pub fn merge(stored: &Measurements, fetched: &Measurements) -> Measurements {
    Measurements {
        min_temp: merge_field(stored.min_temp, fetched.min_temp),
        max_temp: merge_field(stored.max_temp, fetched.max_temp),
        mean_temp: merge_field(stored.mean_temp, fetched.mean_temp),
        precipitation: merge_field(stored.precipitation, fetched.precipitation),
        solar_radiation: merge_field(stored.solar_radiation, fetched.solar_radiation),
    }
}

/// Only the fields whose value differs between `stored` and `merged`.
pub fn changes(stored: &Measurements, merged: &Measurements) -> ReadingChanges {
    let pick = |old: Option<f64>, new: Option<f64>| if old == new { None } else { new };
    ReadingChanges {
        min_temp: pick(stored.min_temp, merged.min_temp),
        max_temp: pick(stored.max_temp, merged.max_temp),
        mean_temp: pick(stored.mean_temp, merged.mean_temp),
        precipitation: pick(stored.precipitation, merged.precipitation),
        solar_radiation: pick(stored.solar_radiation, merged.solar_radiation),
    }
}

/// Insert or merge one fetched day for a location.
///
/// The lookup and the write share one immediate transaction so two merges of
/// the same (date, location) pair cannot interleave.
pub fn merge_day(conn: &mut SqliteConnection, location_id: i32, record: &DailyRecord) -> QueryResult<MergeAction> {
    use schema::daily_weather_entries::dsl as R;

    conn.immediate_transaction(|conn| {
        let existing: Option<Reading> = R::daily_weather_entries
            .filter(R::date.eq(record.date).and(R::city_id.eq(location_id)))
            .select(Reading::as_select())
            .first(conn)
            .optional()?;

        let Some(row) = existing else {
            diesel::insert_into(R::daily_weather_entries)
                .values(&NewReading::new(record.date, location_id, &record.values))
                .execute(conn)?;
            debug!("Merge: inserted {} for location {}", record.date, location_id);
            return Ok(MergeAction::Inserted);
        };

        let stored = row.measurements();
        let delta = changes(&stored, &merge(&stored, &record.values));
        if delta.is_empty() {
            return Ok(MergeAction::Unchanged);
        }
        diesel::update(R::daily_weather_entries.find(row.id))
            .set(&delta)
            .execute(conn)?;
        debug!("Merge: backfilled {} for location {}: {:?}", record.date, location_id, delta);
        Ok(MergeAction::Updated)
    })
}
