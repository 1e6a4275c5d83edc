//! Diesel model structs for regions, locations and daily readings.
//!
//! Struct fields use the domain vocabulary (`region_id`, `location_id`,
//! `solar_radiation`); `column_name` maps them onto the store's column names.

use chrono::NaiveDate;
use diesel::prelude::*;

use crate::schema;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Selectable)]
#[diesel(table_name = schema::countries)]
pub struct Region {
    pub id: i32,
    pub name: String,
    pub timezone: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::countries)]
pub struct NewRegion<'a> {
    pub name: &'a str,
    pub timezone: &'a str,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Selectable)]
#[diesel(table_name = schema::cities)]
pub struct Location {
    pub id: i32,
    pub name: String,
    pub longitude: f64,
    pub latitude: f64,
    #[diesel(column_name = country_id)]
    pub region_id: i32,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::cities)]
pub struct NewLocation<'a> {
    pub name: &'a str,
    pub longitude: f64,
    pub latitude: f64,
    #[diesel(column_name = country_id)]
    pub region_id: i32,
}

/// The five numeric fields of a daily reading.
///
/// `None` means the value is absent, either in the store or in the archive
/// response. The stored `sw_radiation` column is never null, so it always
/// comes back as `Some`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurements {
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
    pub mean_temp: Option<f64>,
    pub precipitation: Option<f64>,
    pub solar_radiation: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Selectable)]
#[diesel(table_name = schema::daily_weather_entries)]
pub struct Reading {
    pub id: i32,
    pub date: NaiveDate,
    #[diesel(column_name = city_id)]
    pub location_id: i32,
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
    pub mean_temp: Option<f64>,
    pub precipitation: Option<f64>,
    #[diesel(column_name = sw_radiation)]
    pub solar_radiation: f64,
}

impl Reading {
    pub fn measurements(&self) -> Measurements {
        Measurements {
            min_temp: self.min_temp,
            max_temp: self.max_temp,
            mean_temp: self.mean_temp,
            precipitation: self.precipitation,
            solar_radiation: Some(self.solar_radiation),
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::daily_weather_entries)]
pub struct NewReading {
    pub date: NaiveDate,
    #[diesel(column_name = city_id)]
    pub location_id: i32,
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
    pub mean_temp: Option<f64>,
    pub precipitation: Option<f64>,
    #[diesel(column_name = sw_radiation)]
    pub solar_radiation: f64,
}

impl NewReading {
    pub fn new(date: NaiveDate, location_id: i32, values: &Measurements) -> Self {
        NewReading {
            date,
            location_id,
            min_temp: values.min_temp,
            max_temp: values.max_temp,
            mean_temp: values.mean_temp,
            precipitation: values.precipitation,
            solar_radiation: values.solar_radiation.unwrap_or_default(),
        }
    }
}

/// Partial update of a reading. `None` fields are left out of the UPDATE.
#[derive(Debug, Clone, Default, PartialEq, AsChangeset)]
#[diesel(table_name = schema::daily_weather_entries)]
pub struct ReadingChanges {
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
    pub mean_temp: Option<f64>,
    pub precipitation: Option<f64>,
    #[diesel(column_name = sw_radiation)]
    pub solar_radiation: Option<f64>,
}

impl ReadingChanges {
    pub fn is_empty(&self) -> bool {
        *self == ReadingChanges::default()
    }
}
