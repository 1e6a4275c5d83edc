//! Batch synchronization of the weather archive into the store.
//!
//! Per location: resolve, reconcile, fetch, then merge day by day. Locations
//! are independent; a failure in one is recorded in its report and the batch
//! moves on. Only an invalid date range or a schema failure stops the batch.

use chrono::NaiveDate;
use diesel::sqlite::SqliteConnection;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use crate::client::HttpError;
use crate::config::DEFAULT_MAX_PARALLEL_FETCHES;
use crate::error::SyncError;
use crate::models::open_meteo::DailyRecord;
use crate::services::dates::{self, DateRange};
use crate::services::merge::{MergeAction, merge_day};
use crate::services::migrate::prepare_store;
use crate::services::reconcile::reconcile;
use crate::services::resolve::{Geocoder, LocationResolver, TimezoneLookup};

/// Source of historical daily weather.
pub trait WeatherArchive: Send + Sync {
    fn fetch_daily(&self, request: &ArchiveRequest) -> Result<Vec<DailyRecord>, HttpError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub range: DateRange,
    /// Days are aligned to this zone by the archive.
    pub timezone: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSummary {
    pub location_id: i32,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Days whose merge hit a storage error, with the diagnostic.
    pub failed_days: Vec<(NaiveDate, String)>,
}

#[derive(Debug)]
pub struct LocationReport {
    pub location: String,
    pub outcome: Result<SyncSummary, SyncError>,
}

type Store<'c> = Mutex<&'c mut SqliteConnection>;

fn lock<'a, 'c>(store: &'a Store<'c>) -> MutexGuard<'a, &'c mut SqliteConnection> {
    // every write runs in its own transaction, so a poisoned lock guards no partial state
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Synchronizer<G, T, A> {
    resolver: LocationResolver<G, T>,
    archive: A,
    workers: NonZeroUsize,
    abort: Arc<AtomicBool>,
}

impl<G, T, A> Synchronizer<G, T, A>
where
    G: Geocoder,
    T: TimezoneLookup,
    A: WeatherArchive,
{
    pub fn new(resolver: LocationResolver<G, T>, archive: A) -> Self {
        Synchronizer {
            resolver,
            archive,
            workers: NonZeroUsize::new(DEFAULT_MAX_PARALLEL_FETCHES).unwrap_or(NonZeroUsize::MIN),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Upper bound on locations processed concurrently.
    pub fn with_workers(mut self, workers: NonZeroUsize) -> Self {
        self.workers = workers;
        self
    }

    /// Setting the flag stops scheduling further locations. Locations already
    /// in flight run to completion; the rest are reported as aborted.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Validate the raw date range, then sync every distinct location in it.
    pub fn sync(
        &self,
        conn: &mut SqliteConnection,
        locations: &[String],
        start: &str,
        end: &str,
    ) -> Result<Vec<LocationReport>, SyncError> {
        let range = dates::validate(start, end)?;
        self.sync_range(conn, locations, range)
    }

    /// Sync an already validated range. Reports follow the order of first
    /// appearance in `locations`.
    pub fn sync_range(
        &self,
        conn: &mut SqliteConnection,
        locations: &[String],
        range: DateRange,
    ) -> Result<Vec<LocationReport>, SyncError> {
        prepare_store(conn)?;

        let names = distinct_names(locations);
        if names.is_empty() {
            info!("Sync: no locations requested");
            return Ok(Vec::new());
        }
        let workers = self.workers.get().min(names.len());
        info!(
            "Sync: {} location(s) over {} ({} day(s)) with {} worker(s)",
            names.len(),
            range,
            range.days(),
            workers
        );

        let store: Store<'_> = Mutex::new(conn);
        let next = AtomicUsize::new(0);
        let (store, next, queue) = (&store, &next, names.as_slice());

        let finished: Vec<(usize, Result<SyncSummary, SyncError>)> = thread::scope(|scope| {
            let handles = (0..workers)
                .map(|_| {
                    scope.spawn(move || {
                        let mut done = Vec::new();
                        while !self.abort.load(Ordering::SeqCst) {
                            let index = next.fetch_add(1, Ordering::SeqCst);
                            let Some(name) = queue.get(index) else { break };
                            done.push((index, self.sync_location(store, name, range)));
                        }
                        done
                    })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        });

        let mut outcomes: Vec<Option<Result<SyncSummary, SyncError>>> = names.iter().map(|_| None).collect();
        for (index, outcome) in finished {
            outcomes[index] = Some(outcome);
        }

        let reports = names
            .iter()
            .zip(outcomes)
            .map(|(name, outcome)| {
                let outcome = outcome.unwrap_or_else(|| Err(SyncError::Aborted(name.clone())));
                if let Err(e) = &outcome {
                    warn!("Sync: {} failed [{}]: {}", name, e.kind(), e);
                }
                LocationReport {
                    location: name.clone(),
                    outcome,
                }
            })
            .collect::<Vec<_>>();

        let succeeded = reports.iter().filter(|r| r.outcome.is_ok()).count();
        info!("Sync: finished, {} of {} location(s) succeeded", succeeded, reports.len());
        Ok(reports)
    }

    fn sync_location(&self, store: &Store<'_>, name: &str, range: DateRange) -> Result<SyncSummary, SyncError> {
        let resolved = self.resolver.resolve(name)?;
        info!(
            "Sync: resolved {} to ({}, {}) in {} [{}]",
            name, resolved.latitude, resolved.longitude, resolved.region, resolved.timezone
        );

        let reconciled = reconcile(&mut **lock(store), name, &resolved)?;
        debug!("Sync: {} reconciled as {:?}", name, reconciled);

        let request = ArchiveRequest {
            latitude: resolved.latitude,
            longitude: resolved.longitude,
            range,
            timezone: resolved.timezone,
        };
        let records = self.archive.fetch_daily(&request).map_err(|source| SyncError::Fetch {
            location: name.to_string(),
            source,
        })?;
        info!("Sync: fetched {} day(s) for {}", records.len(), name);

        let mut summary = SyncSummary {
            location_id: reconciled.location_id,
            ..SyncSummary::default()
        };
        for record in &records {
            // the lock is taken per day so other locations can interleave
            let merged = merge_day(&mut **lock(store), reconciled.location_id, record);
            match merged {
                Ok(MergeAction::Inserted) => summary.inserted += 1,
                Ok(MergeAction::Updated) => summary.updated += 1,
                Ok(MergeAction::Unchanged) => summary.unchanged += 1,
                Err(e) => {
                    warn!("Sync: merging {} for {} failed: {}", record.date, name, e);
                    summary.failed_days.push((record.date, e.to_string()));
                }
            }
        }

        info!(
            "Sync: {} done (inserted={}, updated={}, unchanged={}, failed_days={})",
            name,
            summary.inserted,
            summary.updated,
            summary.unchanged,
            summary.failed_days.len()
        );
        Ok(summary)
    }
}

/// Trimmed names in order of first appearance. A blank name is kept so it
/// is reported like any other unresolvable location.
fn distinct_names(locations: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    locations
        .iter()
        .map(|name| name.trim())
        .filter(|name| seen.insert(*name))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AliasTable;
    use crate::db::models::{Measurements, Reading, Region};
    use crate::schema;
    use crate::services::migrate::table_columns;
    use crate::test_support::{FakeArchive, FakeGeocoder, FakeTimezones, memory_store};
    use diesel::connection::SimpleConnection;
    use diesel::prelude::*;

    const LONDON: (f64, f64) = (51.5073, -0.1276);
    const LEEDS: (f64, f64) = (53.7965, -1.5478);
    const PARIS: (f64, f64) = (48.8534, 2.3488);

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, d).unwrap()
    }

    fn record(d: u32, min: f64, max: f64, mean: f64, precipitation: f64, radiation: f64) -> DailyRecord {
        DailyRecord {
            date: day(d),
            values: Measurements {
                min_temp: Some(min),
                max_temp: Some(max),
                mean_temp: Some(mean),
                precipitation: Some(precipitation),
                solar_radiation: Some(radiation),
            },
        }
    }

    fn london_days() -> Vec<DailyRecord> {
        vec![record(1, 8.4, 13.1, 11.0, 3.2, 2.5), record(2, 4.9, 11.6, 8.1, 0.9, 3.1)]
    }

    fn resolver() -> LocationResolver<FakeGeocoder, FakeTimezones> {
        let geocoder = FakeGeocoder::default()
            .with("London", LONDON.0, LONDON.1, "London, Greater London, England, United Kingdom")
            .with("ValidCity", LONDON.0, LONDON.1, "London, Greater London, England, United Kingdom")
            .with("Leeds", LEEDS.0, LEEDS.1, "Leeds, West Yorkshire, England, United Kingdom")
            .with("Paris", PARIS.0, PARIS.1, "Paris, Ile-de-France, France métropolitaine, France");
        let timezones = FakeTimezones::default()
            .with(LONDON.0, LONDON.1, "Europe/London")
            .with(LEEDS.0, LEEDS.1, "Europe/London")
            .with(PARIS.0, PARIS.1, "Europe/Paris");
        LocationResolver::new(geocoder, timezones)
            .with_region_aliases(AliasTable::parse("United Kingdom=Great Britain").unwrap())
            .with_timezone_aliases(AliasTable::parse("Europe/Paris=Europe/Berlin").unwrap())
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn readings(conn: &mut SqliteConnection) -> Vec<Reading> {
        schema::daily_weather_entries::table
            .order(schema::daily_weather_entries::date)
            .select(Reading::as_select())
            .load(conn)
            .unwrap()
    }

    #[test]
    fn london_end_to_end() {
        let mut conn = memory_store();
        let archive = FakeArchive::default().with_records(LONDON.0, LONDON.1, london_days());
        let sync = Synchronizer::new(resolver(), archive);

        let reports = sync
            .sync(&mut conn, &names(&["London"]), "2023-01-01", "2023-01-02")
            .expect("batch runs");
        assert_eq!(reports.len(), 1);
        let summary = reports[0].outcome.as_ref().expect("London syncs");
        assert_eq!(summary.inserted, 2);
        assert!(summary.failed_days.is_empty());

        let regions: Vec<Region> = schema::countries::table
            .select(Region::as_select())
            .load(&mut conn)
            .unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].name, "Great Britain");
        assert_eq!(regions[0].timezone, "Europe/London");

        let cities: i64 = schema::cities::table.count().get_result(&mut conn).unwrap();
        assert_eq!(cities, 1);

        let rows = readings(&mut conn);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, day(1));
        assert_eq!(rows[1].date, day(2));
        let stored: Vec<Measurements> = rows.iter().map(Reading::measurements).collect();
        let fetched: Vec<Measurements> = london_days().iter().map(|r| r.values).collect();
        assert_eq!(stored, fetched);
        assert!(rows.iter().all(|r| r.location_id == summary.location_id));

        let request = &sync.archive.requests()[0];
        assert_eq!(request.timezone, "Europe/London");
        assert_eq!(request.range.start, day(1));
        assert_eq!(request.range.end, day(2));
    }

    #[test]
    fn repeated_sync_leaves_store_unchanged() {
        let mut conn = memory_store();
        let archive = FakeArchive::default().with_records(LONDON.0, LONDON.1, london_days());
        let sync = Synchronizer::new(resolver(), archive);
        let locations = names(&["London"]);

        sync.sync(&mut conn, &locations, "2023-01-01", "2023-01-02").unwrap();
        let before = readings(&mut conn);

        let reports = sync.sync(&mut conn, &locations, "2023-01-01", "2023-01-02").unwrap();
        let summary = reports[0].outcome.as_ref().unwrap();
        assert_eq!((summary.inserted, summary.updated, summary.unchanged), (0, 0, 2));
        assert_eq!(readings(&mut conn), before);
    }

    #[test]
    fn partial_failure_is_isolated() {
        let mut conn = memory_store();
        let archive = FakeArchive::default().with_records(LONDON.0, LONDON.1, london_days());
        let sync = Synchronizer::new(resolver(), archive);

        let reports = sync
            .sync(&mut conn, &names(&["ValidCity", "NoSuchPlace123"]), "2023-01-01", "2023-01-02")
            .unwrap();
        assert_eq!(reports[0].location, "ValidCity");
        assert!(reports[0].outcome.is_ok());
        assert_eq!(reports[1].location, "NoSuchPlace123");
        let err = reports[1].outcome.as_ref().unwrap_err();
        assert_eq!(err.kind(), "LocationNotFound");
        assert_eq!(readings(&mut conn).len(), 2);
    }

    #[test]
    fn fetch_errors_fail_only_their_location() {
        let mut conn = memory_store();
        let archive = FakeArchive::default()
            .with_status(LONDON.0, LONDON.1, 503)
            .with_timeout(LEEDS.0, LEEDS.1)
            .with_records(PARIS.0, PARIS.1, vec![record(1, 5.0, 9.0, 7.0, 1.1, 1.4)]);
        let sync = Synchronizer::new(resolver(), archive);

        let reports = sync
            .sync(&mut conn, &names(&["London", "Leeds", "Paris"]), "2023-01-01", "2023-01-02")
            .unwrap();
        let kinds: Vec<&str> = reports
            .iter()
            .map(|r| r.outcome.as_ref().map_or_else(SyncError::kind, |_| "ok"))
            .collect();
        assert_eq!(kinds, vec!["FetchFailed", "FetchTimeout", "ok"]);
        assert!(reports[0].outcome.as_ref().unwrap_err().to_string().contains("503"));

        // the failed locations were still reconciled before the fetch
        let cities: i64 = schema::cities::table.count().get_result(&mut conn).unwrap();
        assert_eq!(cities, 3);
        assert_eq!(readings(&mut conn).len(), 1);
        assert!(sync.archive.requests().iter().any(|r| r.timezone == "Europe/Berlin"));
    }

    #[test]
    fn invalid_range_has_no_side_effects() {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        let sync = Synchronizer::new(resolver(), FakeArchive::default());

        let err = sync
            .sync(&mut conn, &names(&["London"]), "2023-01-02", "2023-01-01")
            .unwrap_err();
        assert_eq!(err.kind(), "RangeOrderError");
        assert!(err.is_fatal());

        let err = sync.sync(&mut conn, &names(&["London"]), "yesterday", "2023-01-01").unwrap_err();
        assert_eq!(err.kind(), "InvalidDateFormat");

        assert!(table_columns(&mut conn, "countries").unwrap().is_empty());
        assert_eq!(sync.archive.calls(), 0);
    }

    #[test]
    fn duplicate_names_are_synced_once_in_request_order() {
        let mut conn = memory_store();
        let archive = FakeArchive::default()
            .with_records(LONDON.0, LONDON.1, london_days())
            .with_records(LEEDS.0, LEEDS.1, london_days());
        let sync = Synchronizer::new(resolver(), archive);

        let reports = sync
            .sync(&mut conn, &names(&["London", "Leeds", " London", "", " "]), "2023-01-01", "2023-01-02")
            .unwrap();
        let order: Vec<&str> = reports.iter().map(|r| r.location.as_str()).collect();
        assert_eq!(order, vec!["London", "Leeds", ""]);
        assert_eq!(reports[2].outcome.as_ref().unwrap_err().kind(), "LocationNotFound");
        assert_eq!(sync.archive.calls(), 2);
        assert_eq!(readings(&mut conn).len(), 4);
    }

    #[test]
    fn storage_error_on_one_day_keeps_the_rest() {
        let mut conn = memory_store();
        conn.batch_execute(
            "CREATE TRIGGER reject_second_day BEFORE INSERT ON daily_weather_entries
             WHEN NEW.date = '2023-01-02'
             BEGIN SELECT RAISE(ABORT, 'rejected by trigger'); END;",
        )
        .unwrap();
        let archive = FakeArchive::default().with_records(LONDON.0, LONDON.1, london_days());
        let sync = Synchronizer::new(resolver(), archive);

        let reports = sync
            .sync(&mut conn, &names(&["London"]), "2023-01-01", "2023-01-02")
            .unwrap();
        let summary = reports[0].outcome.as_ref().unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.failed_days.len(), 1);
        assert_eq!(summary.failed_days[0].0, day(2));
        assert!(summary.failed_days[0].1.contains("rejected by trigger"));
    }

    #[test]
    fn abort_before_start_reports_every_location_aborted() {
        let mut conn = memory_store();
        let sync = Synchronizer::new(resolver(), FakeArchive::default());
        sync.abort_handle().store(true, Ordering::SeqCst);

        let reports = sync
            .sync(&mut conn, &names(&["London", "Leeds"]), "2023-01-01", "2023-01-02")
            .unwrap();
        assert!(
            reports
                .iter()
                .all(|r| r.outcome.as_ref().is_err_and(|e| e.kind() == "Aborted"))
        );
        assert_eq!(sync.archive.calls(), 0);
    }

    #[test]
    fn abort_mid_batch_lets_in_flight_location_finish() {
        let mut conn = memory_store();
        let abort = Arc::new(AtomicBool::new(false));
        let archive = FakeArchive::default()
            .with_records(LONDON.0, LONDON.1, london_days())
            .with_records(LEEDS.0, LEEDS.1, london_days())
            .tripping(Arc::clone(&abort));
        let mut sync = Synchronizer::new(resolver(), archive).with_workers(NonZeroUsize::MIN);
        sync.abort = abort;

        let reports = sync
            .sync(&mut conn, &names(&["London", "Leeds"]), "2023-01-01", "2023-01-02")
            .unwrap();
        assert_eq!(reports[0].outcome.as_ref().unwrap().inserted, 2);
        assert_eq!(reports[1].outcome.as_ref().unwrap_err().kind(), "Aborted");
    }

    #[test]
    fn parallel_workers_keep_request_order() {
        let mut conn = memory_store();
        let archive = FakeArchive::default()
            .with_records(LONDON.0, LONDON.1, london_days())
            .with_records(LEEDS.0, LEEDS.1, london_days())
            .with_records(PARIS.0, PARIS.1, london_days());
        let sync = Synchronizer::new(resolver(), archive).with_workers(NonZeroUsize::new(3).unwrap());

        let requested = names(&["Paris", "NoSuchPlace123", "Leeds", "London"]);
        let reports = sync.sync(&mut conn, &requested, "2023-01-01", "2023-01-02").unwrap();
        let order: Vec<String> = reports.iter().map(|r| r.location.clone()).collect();
        assert_eq!(order, requested);
        assert_eq!(reports.iter().filter(|r| r.outcome.is_ok()).count(), 3);
        assert_eq!(readings(&mut conn).len(), 6);

        let regions: i64 = schema::countries::table.count().get_result(&mut conn).unwrap();
        assert_eq!(regions, 2);
    }
}
