//! Read-only aggregates over stored readings.

use chrono::{Duration, NaiveDate};
use diesel::dsl::avg;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use crate::db::models::Location;
use crate::schema;

#[derive(Debug, Clone, PartialEq)]
pub struct LocationAverage {
    pub location_id: i32,
    pub name: String,
    pub average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionAverage {
    pub region_id: i32,
    pub name: String,
    pub average: Option<f64>,
}

fn year_bounds(year: i32) -> Option<(NaiveDate, NaiveDate)> {
    Some((NaiveDate::from_ymd_opt(year, 1, 1)?, NaiveDate::from_ymd_opt(year, 12, 31)?))
}

pub fn list_locations(conn: &mut SqliteConnection) -> QueryResult<Vec<Location>> {
    schema::cities::table
        .order(schema::cities::name)
        .select(Location::as_select())
        .load(conn)
}

pub fn find_location(conn: &mut SqliteConnection, name: &str) -> QueryResult<Option<Location>> {
    schema::cities::table
        .filter(schema::cities::name.eq(name))
        .select(Location::as_select())
        .first(conn)
        .optional()
}

/// Mean of `mean_temp` for one location over a calendar year.
pub fn average_annual_temperature(
    conn: &mut SqliteConnection,
    location_id: i32,
    year: i32,
) -> QueryResult<Option<f64>> {
    use schema::daily_weather_entries::dsl as R;

    let Some((from, to)) = year_bounds(year) else {
        return Ok(None);
    };
    R::daily_weather_entries
        .filter(R::city_id.eq(location_id))
        .filter(R::date.between(from, to))
        .select(avg(R::mean_temp))
        .get_result(conn)
}

/// Mean precipitation over the seven days starting at `start`.
pub fn average_seven_day_precipitation(
    conn: &mut SqliteConnection,
    location_id: i32,
    start: NaiveDate,
) -> QueryResult<Option<f64>> {
    use schema::daily_weather_entries::dsl as R;

    R::daily_weather_entries
        .filter(R::city_id.eq(location_id))
        .filter(R::date.between(start, start + Duration::days(6)))
        .select(avg(R::precipitation))
        .get_result(conn)
}

/// Mean of `mean_temp` per location over `from..=to`. Locations without
/// readings in the window are omitted.
pub fn average_mean_temperature_by_location(
    conn: &mut SqliteConnection,
    from: NaiveDate,
    to: NaiveDate,
) -> QueryResult<Vec<LocationAverage>> {
    use schema::cities::dsl as L;
    use schema::daily_weather_entries::dsl as R;

    let rows: Vec<(i32, String, Option<f64>)> = L::cities
        .inner_join(R::daily_weather_entries)
        .filter(R::date.between(from, to))
        .group_by((L::id, L::name))
        .select((L::id, L::name, avg(R::mean_temp)))
        .order(L::name)
        .load(conn)?;
    Ok(rows
        .into_iter()
        .map(|(location_id, name, average)| LocationAverage {
            location_id,
            name,
            average,
        })
        .collect())
}

/// Mean daily precipitation per region over a calendar year.
pub fn average_annual_precipitation_by_region(
    conn: &mut SqliteConnection,
    year: i32,
) -> QueryResult<Vec<RegionAverage>> {
    use schema::cities::dsl as L;
    use schema::countries::dsl as C;
    use schema::daily_weather_entries::dsl as R;

    let Some((from, to)) = year_bounds(year) else {
        return Ok(Vec::new());
    };
    let rows: Vec<(i32, String, Option<f64>)> = C::countries
        .inner_join(L::cities.inner_join(R::daily_weather_entries))
        .filter(R::date.between(from, to))
        .group_by((C::id, C::name))
        .select((C::id, C::name, avg(R::precipitation)))
        .order(C::name)
        .load(conn)?;
    Ok(rows
        .into_iter()
        .map(|(region_id, name, average)| RegionAverage {
            region_id,
            name,
            average,
        })
        .collect())
}
