//! Daily aggregation runner
//!
//! Orchestrates one aggregation run: builds the window, rebuilds the
//! relationship mapping, classifies and reduces the activity log, runs
//! the received-data queries, and stores the result tables under the
//! watermark policy.
//!
//! Watermark policy:
//! - A closed-day run for day D skips any result table whose watermark
//!   is already at or past D. Otherwise stale rows for D are deleted,
//!   the day is recomputed and inserted, and the watermark advances to
//!   D, all in one transaction per table.
//! - An open-day run (today) always deletes and recomputes but never
//!   advances the watermark; the next closed-day run finalizes the day.

pub mod activity;
pub mod received;

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::db::repo::{APP_ACTIVITY_TABLE, DATA_RECEIVED_TABLE, PATIENT_ACTIVITY_TABLE};
use crate::db::Database;
use crate::error::Result;
use crate::relationships::RelationshipMapping;

/// One local calendar day expressed as a UTC time range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationWindow {
    /// The local calendar day being aggregated
    pub day: NaiveDate,
    /// First instant of the day
    pub start: DateTime<Utc>,
    /// Last instant of the day (23:59:59.999 local)
    pub end: DateTime<Utc>,
}

fn local_to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    // DST gaps have no unambiguous local representation; fall back to
    // reading the naive time as UTC rather than failing the run.
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

impl AggregationWindow {
    /// Window covering one local calendar day
    pub fn for_day(day: NaiveDate) -> Self {
        let start = day.and_hms_opt(0, 0, 0).unwrap_or_default();
        let end = day.and_hms_milli_opt(23, 59, 59, 999).unwrap_or_default();
        Self {
            day,
            start: local_to_utc(start),
            end: local_to_utc(end),
        }
    }

    /// Yesterday's (closed) window
    pub fn yesterday() -> Self {
        Self::for_day(Local::now().date_naive() - Duration::days(1))
    }

    /// Today's (still open) window
    pub fn today() -> Self {
        Self::for_day(Local::now().date_naive())
    }
}

/// What one aggregation run did
#[derive(Debug, Clone, Default)]
pub struct UpdateOutcome {
    /// Rows stored per table (None when skipped by the watermark)
    pub app_activity_rows: Option<usize>,
    pub patient_activity_rows: Option<usize>,
    pub data_received_rows: Option<usize>,
    /// Patient-scoped entries dropped for lack of a usable relationship
    pub skipped_unresolved: usize,
    /// Entries whose username has no modern user record
    pub skipped_unknown_users: usize,
    /// Control-record patients with no modern patient record
    pub skipped_unmapped_patients: usize,
}

/// Runs the full daily aggregation against one database
pub struct UpdateRunner<'a> {
    db: &'a Database,
}

impl<'a> UpdateRunner<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Execute one run for `window`. `closed_day` selects the watermark
    /// policy: skip already-finalized days and advance on success.
    pub fn run(&self, window: &AggregationWindow, closed_day: bool) -> Result<UpdateOutcome> {
        tracing::info!(
            day = %window.day,
            closed_day,
            "Starting daily usage statistics aggregation"
        );

        let mut outcome = UpdateOutcome::default();

        let need_app = self.needs_run(APP_ACTIVITY_TABLE, window.day, closed_day)?;
        let need_patient = self.needs_run(PATIENT_ACTIVITY_TABLE, window.day, closed_day)?;

        if need_app || need_patient {
            let relationship_rows = self.db.list_relationship_rows(window.day)?;
            let mapping = RelationshipMapping::build(&relationship_rows);
            let user_ids = self.db.user_ids_by_username()?;
            let entries = self.db.list_activity_entries(window.start, window.end)?;
            tracing::debug!(
                entries = entries.len(),
                patients = mapping.patient_count(),
                "Loaded activity window"
            );

            let aggregation = activity::aggregate_window(&entries, &mapping, &user_ids, window);
            outcome.skipped_unresolved = aggregation.skipped_unresolved;
            outcome.skipped_unknown_users = aggregation.skipped_unknown_users;

            if need_app {
                let stored = self.db.store_daily_user_app_activity(
                    window.day,
                    &aggregation.user_rows,
                    closed_day,
                )?;
                tracing::info!(rows = stored, "Stored daily user app activity");
                outcome.app_activity_rows = Some(stored);
            }
            if need_patient {
                let stored = self.db.store_daily_user_patient_activity(
                    window.day,
                    &aggregation.patient_rows,
                    closed_day,
                )?;
                tracing::info!(rows = stored, "Stored daily user patient activity");
                outcome.patient_activity_rows = Some(stored);
            }
        } else {
            tracing::info!(day = %window.day, "Activity tables already aggregated, skipping");
        }

        if self.needs_run(DATA_RECEIVED_TABLE, window.day, closed_day)? {
            let (rows, skipped) = received::aggregate_received(self.db, window)?;
            outcome.skipped_unmapped_patients = skipped;
            let stored = self
                .db
                .store_daily_patient_data_received(window.day, &rows, closed_day)?;
            tracing::info!(rows = stored, "Stored daily patient data received");
            outcome.data_received_rows = Some(stored);
        } else {
            tracing::info!(day = %window.day, "Received-data table already aggregated, skipping");
        }

        Ok(outcome)
    }

    fn needs_run(&self, table: &str, day: NaiveDate, closed_day: bool) -> Result<bool> {
        if !closed_day {
            return Ok(true);
        }
        Ok(match self.db.watermark(table)? {
            Some(watermark) => watermark < day,
            None => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use chrono::Duration;

    fn seeded_db() -> (Database, AggregationWindow) {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();

        let window = AggregationWindow::yesterday();
        let joined = window.start - Duration::days(30);

        // marge has a confirmed self-relationship to patient legacy 51
        let user = db.insert_user("marge", "en", true, joined, None).unwrap();
        let caregiver = db.insert_caregiver_profile(user, Some(51)).unwrap();
        let patient = db
            .insert_patient(Some(51), SexType::Female, DataAccessType::All, None, joined)
            .unwrap();
        db.insert_relationship(
            patient,
            caregiver,
            RelationshipStatus::Confirmed,
            joined.date_naive(),
            None,
        )
        .unwrap();

        (db, window)
    }

    fn in_window(window: &AggregationWindow, hours: i64) -> DateTime<Utc> {
        window.start + Duration::hours(hours)
    }

    #[test]
    fn test_marge_checkin_scenario() {
        let (db, window) = seeded_db();
        db.insert_activity_log("Checkin", "", Some(51), "marge", in_window(&window, 9))
            .unwrap();
        db.insert_activity_log("Checkin", "", Some(51), "marge", in_window(&window, 10))
            .unwrap();
        db.insert_activity_log("DocumentContent", "", Some(51), "marge", in_window(&window, 11))
            .unwrap();

        let outcome = UpdateRunner::new(&db).run(&window, true).unwrap();
        assert_eq!(outcome.patient_activity_rows, Some(1));

        let (checkins, documents, date): (i64, i64, String) = db
            .connection()
            .query_row(
                "SELECT count_checkins, count_documents, action_date
                 FROM daily_user_patient_activity",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(checkins, 2);
        assert_eq!(documents, 1);
        assert_eq!(date, window.day.format("%Y-%m-%d").to_string());
    }

    #[test]
    fn test_watermark_makes_second_run_a_noop() {
        let (db, window) = seeded_db();
        db.insert_activity_log("Login", "OMITTED", None, "marge", in_window(&window, 9))
            .unwrap();

        let first = UpdateRunner::new(&db).run(&window, true).unwrap();
        assert_eq!(first.app_activity_rows, Some(1));

        let second = UpdateRunner::new(&db).run(&window, true).unwrap();
        assert_eq!(second.app_activity_rows, None);
        assert_eq!(second.patient_activity_rows, None);
        assert_eq!(second.data_received_rows, None);

        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM daily_user_app_activity", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_open_day_runs_recompute() {
        let (db, window) = seeded_db();
        db.insert_activity_log("Login", "OMITTED", None, "marge", in_window(&window, 9))
            .unwrap();

        let runner = UpdateRunner::new(&db);
        runner.run(&window, false).unwrap();
        db.insert_activity_log("Login", "OMITTED", None, "marge", in_window(&window, 10))
            .unwrap();
        runner.run(&window, false).unwrap();

        // Still one row per user per day, with the recomputed count
        let (rows, logins): (i64, i64) = db
            .connection()
            .query_row(
                "SELECT COUNT(*), SUM(count_logins) FROM daily_user_app_activity",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(logins, 2);
        // Open-day runs never advance the watermark
        assert_eq!(db.watermark(APP_ACTIVITY_TABLE).unwrap(), None);
    }

    #[test]
    fn test_window_exclusivity() {
        let (db, window) = seeded_db();
        // Entry dated the day after the window must not be counted
        db.insert_activity_log(
            "Checkin",
            "",
            Some(51),
            "marge",
            window.end + Duration::hours(6),
        )
        .unwrap();

        let outcome = UpdateRunner::new(&db).run(&window, true).unwrap();
        assert_eq!(outcome.patient_activity_rows, Some(0));
    }

    #[test]
    fn test_unresolved_relationship_is_dropped() {
        let (db, window) = seeded_db();
        // bart has no relationship to patient 51
        db.insert_user("bart", "en", true, window.start - Duration::days(10), None)
            .unwrap();
        db.insert_activity_log("Checkin", "", Some(51), "bart", in_window(&window, 9))
            .unwrap();

        let outcome = UpdateRunner::new(&db).run(&window, true).unwrap();
        assert_eq!(outcome.patient_activity_rows, Some(0));
        assert_eq!(outcome.skipped_unresolved, 1);
    }
}
