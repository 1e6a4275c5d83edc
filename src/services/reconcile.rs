use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::{debug, info};

use crate::db::models as dbm;
use crate::schema;
use crate::services::resolve::ResolvedLocation;

/// Coordinates closer than this are treated as unchanged.
const COORD_EPSILON: f64 = 1e-9;

fn approx_eq(lhs: f64, rhs: f64) -> bool {
    (lhs - rhs).abs() <= COORD_EPSILON
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationChange {
    Created,
    Updated { coordinates: bool, region: bool },
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    pub location_id: i32,
    pub region_id: i32,
    pub region_created: bool,
    pub location: LocationChange,
}

/// Find or create the region and location rows for a resolved location.
///
/// An existing region keeps its timezone. An existing location keeps its id
/// and name; its coordinates and region reference follow `resolved`.
pub fn reconcile(
    conn: &mut SqliteConnection,
    name: &str,
    resolved: &ResolvedLocation,
) -> QueryResult<Reconciled> {
    conn.immediate_transaction(|conn| {
        let (region_id, region_created) = find_or_create_region(conn, &resolved.region, &resolved.timezone)?;
        let (location_id, location) = upsert_location(conn, name, resolved, region_id)?;
        Ok(Reconciled {
            location_id,
            region_id,
            region_created,
            location,
        })
    })
}

fn find_or_create_region(conn: &mut SqliteConnection, name: &str, timezone: &str) -> QueryResult<(i32, bool)> {
    use schema::countries::dsl as C;

    let existing: Option<i32> = C::countries
        .filter(C::name.eq(name))
        .select(C::id)
        .first(conn)
        .optional()?;
    if let Some(id) = existing {
        return Ok((id, false));
    }

    diesel::insert_into(C::countries)
        .values(&dbm::NewRegion { name, timezone })
        .execute(conn)?;
    let id = C::countries.filter(C::name.eq(name)).select(C::id).first(conn)?;
    info!("Reconcile: created region {} ({}) as id {}", name, timezone, id);
    Ok((id, true))
}

fn upsert_location(
    conn: &mut SqliteConnection,
    name: &str,
    resolved: &ResolvedLocation,
    region_id: i32,
) -> QueryResult<(i32, LocationChange)> {
    use schema::cities::dsl as L;

    let existing: Option<dbm::Location> = L::cities
        .filter(L::name.eq(name))
        .select(dbm::Location::as_select())
        .first(conn)
        .optional()?;

    let Some(row) = existing else {
        diesel::insert_into(L::cities)
            .values(&dbm::NewLocation {
                name,
                longitude: resolved.longitude,
                latitude: resolved.latitude,
                region_id,
            })
            .execute(conn)?;
        let id = L::cities.filter(L::name.eq(name)).select(L::id).first(conn)?;
        info!("Reconcile: created location {} as id {}", name, id);
        return Ok((id, LocationChange::Created));
    };

    let coordinates = !approx_eq(row.longitude, resolved.longitude) || !approx_eq(row.latitude, resolved.latitude);
    if coordinates {
        diesel::update(L::cities.find(row.id))
            .set((L::longitude.eq(resolved.longitude), L::latitude.eq(resolved.latitude)))
            .execute(conn)?;
        info!(
            "Reconcile: moved {} from ({}, {}) to ({}, {})",
            name, row.latitude, row.longitude, resolved.latitude, resolved.longitude
        );
    }

    let region = row.region_id != region_id;
    if region {
        diesel::update(L::cities.find(row.id))
            .set(L::country_id.eq(region_id))
            .execute(conn)?;
        info!("Reconcile: re-homed {} from region {} to {}", name, row.region_id, region_id);
    }

    if coordinates || region {
        Ok((row.id, LocationChange::Updated { coordinates, region }))
    } else {
        debug!("Reconcile: {} unchanged (id {})", name, row.id);
        Ok((row.id, LocationChange::Unchanged))
    }
}
