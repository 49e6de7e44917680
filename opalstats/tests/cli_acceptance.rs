use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use chrono::{DateTime, Duration, Utc};
use opalstats_core::{
    AggregationWindow, DataAccessType, Database, RelationshipStatus, SexType,
};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    fn db_path(&self) -> PathBuf {
        self.xdg_data.join("opalstats/data.db")
    }

    fn write_config(&self, content: &str) {
        let dir = self.xdg_config.join("opalstats");
        fs::create_dir_all(&dir).expect("failed to create config dir");
        fs::write(dir.join("config.toml"), content).expect("failed to write config");
    }

    fn open_db(&self) -> Database {
        let db = Database::open(&self.db_path()).expect("failed to open db");
        db.migrate().expect("failed to migrate db");
        db
    }
}

fn command(env: &CliTestEnv, bin_name: &str) -> Command {
    let mut cmd = Command::cargo_bin(bin_name).expect("binary should build");
    cmd.env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state);
    cmd
}

/// Seed marge with a confirmed self-relationship to legacy patient 51
/// and return her activity window for yesterday.
fn seed_marge(db: &Database) -> (AggregationWindow, i64) {
    let window = AggregationWindow::yesterday();
    let joined = window.start - Duration::days(30);

    let user = db
        .insert_user("marge", "en", true, joined, None)
        .expect("insert user");
    let caregiver = db
        .insert_caregiver_profile(user, Some(51))
        .expect("insert caregiver");
    let patient = db
        .insert_patient(Some(51), SexType::Female, DataAccessType::All, None, joined)
        .expect("insert patient");
    db.insert_relationship(
        patient,
        caregiver,
        RelationshipStatus::Confirmed,
        joined.date_naive(),
        None,
    )
    .expect("insert relationship");

    (window, user)
}

fn log_activity(db: &Database, request: &str, target: Option<i64>, at: DateTime<Utc>) {
    db.insert_activity_log(request, "", target, "marge", at)
        .expect("insert activity log");
}

fn patient_activity_row(db_path: &Path) -> Option<(i64, i64, i64)> {
    let db = Database::open(&db_path.to_path_buf()).expect("failed to open db");
    let conn = db.connection();
    conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(count_checkins), 0), COALESCE(SUM(count_documents), 0)
         FROM daily_user_patient_activity",
        [],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )
    .ok()
}

#[test]
fn update_populates_daily_statistics() {
    let env = CliTestEnv::new();
    let db = env.open_db();
    let (window, _) = seed_marge(&db);

    log_activity(&db, "Checkin", Some(51), window.start + Duration::hours(9));
    log_activity(&db, "Checkin", Some(51), window.start + Duration::hours(10));
    log_activity(
        &db,
        "DocumentContent",
        Some(51),
        window.start + Duration::hours(11),
    );
    drop(db);

    command(&env, "update_daily_usage_statistics")
        .assert()
        .success()
        .stdout(predicates::str::contains(
            "Successfully populated daily statistics data",
        ));

    let (rows, checkins, documents) = patient_activity_row(&env.db_path()).unwrap();
    assert_eq!(rows, 1, "exactly one patient activity row");
    assert_eq!(checkins, 2);
    assert_eq!(documents, 1);
}

#[test]
fn second_run_is_idempotent() {
    let env = CliTestEnv::new();
    let db = env.open_db();
    let (window, _) = seed_marge(&db);
    log_activity(&db, "Checkin", Some(51), window.start + Duration::hours(9));
    drop(db);

    command(&env, "update_daily_usage_statistics").assert().success();
    command(&env, "update_daily_usage_statistics").assert().success();

    let (rows, checkins, _) = patient_activity_row(&env.db_path()).unwrap();
    assert_eq!(rows, 1);
    assert_eq!(checkins, 1);
}

#[test]
fn today_flag_announces_itself() {
    let env = CliTestEnv::new();
    let db = env.open_db();
    seed_marge(&db);
    drop(db);

    command(&env, "update_daily_usage_statistics")
        .arg("--today")
        .assert()
        .success()
        .stdout(predicates::str::contains(
            "Calculating usage statistics for today",
        ));
}

#[test]
fn force_delete_is_refused_in_production() {
    let env = CliTestEnv::new();
    env.write_config("[environment]\nproduction = true\n");

    let db = env.open_db();
    let (window, _) = seed_marge(&db);
    log_activity(&db, "Checkin", Some(51), window.start + Duration::hours(9));
    drop(db);

    // Populate first, then try to force-delete
    command(&env, "update_daily_usage_statistics").assert().success();
    command(&env, "update_daily_usage_statistics")
        .arg("--force-delete")
        .assert()
        .success()
        .stdout(predicates::str::contains(
            "Existing usage statistics data cannot be deleted in production environment",
        ));

    let (rows, _, _) = patient_activity_row(&env.db_path()).unwrap();
    assert_eq!(rows, 1, "data must survive the refused force-delete");
}

#[test]
fn force_delete_can_be_declined() {
    let env = CliTestEnv::new();
    let db = env.open_db();
    let (window, _) = seed_marge(&db);
    log_activity(&db, "Checkin", Some(51), window.start + Duration::hours(9));
    drop(db);

    command(&env, "update_daily_usage_statistics").assert().success();

    let assert = command(&env, "update_daily_usage_statistics")
        .arg("--force-delete")
        .write_stdin("no\n")
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(stdout.contains("Deleting existing usage statistics data"));
    assert!(stdout.contains("Are you sure you want to do this?"));
    assert!(stdout.contains("Type 'yes' to continue, or 'no' to cancel:"));
    assert!(stdout.contains("Usage statistics update is cancelled"));
    assert!(!stdout.contains("Successfully populated daily statistics data"));

    let (rows, _, _) = patient_activity_row(&env.db_path()).unwrap();
    assert_eq!(rows, 1, "declined force-delete must not touch the data");
}

#[test]
fn force_delete_is_handled_before_today_announcement() {
    let env = CliTestEnv::new();
    let db = env.open_db();
    seed_marge(&db);
    drop(db);

    // Combined flags: the delete prompt precedes the today line
    let assert = command(&env, "update_daily_usage_statistics")
        .args(["--today", "--force-delete"])
        .write_stdin("yes\n")
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let deleting = stdout
        .find("Deleting existing usage statistics data")
        .expect("delete announcement missing");
    let today = stdout
        .find("Calculating usage statistics for today")
        .expect("today announcement missing");
    assert!(deleting < today);

    // A declined delete returns before the today announcement
    let assert = command(&env, "update_daily_usage_statistics")
        .args(["--today", "--force-delete"])
        .write_stdin("no\n")
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(stdout.contains("Usage statistics update is cancelled"));
    assert!(!stdout.contains("Calculating usage statistics for today"));
}

#[test]
fn force_delete_clears_and_repopulates() {
    let env = CliTestEnv::new();
    let db = env.open_db();
    let (window, _) = seed_marge(&db);
    log_activity(&db, "Checkin", Some(51), window.start + Duration::hours(9));
    drop(db);

    command(&env, "update_daily_usage_statistics").assert().success();

    command(&env, "update_daily_usage_statistics")
        .arg("--force-delete")
        .write_stdin("yes\n")
        .assert()
        .success()
        .stdout(predicates::str::contains(
            "Successfully populated daily statistics data",
        ));

    // The watermark was cleared, so the day was recomputed from scratch
    let (rows, checkins, _) = patient_activity_row(&env.db_path()).unwrap();
    assert_eq!(rows, 1);
    assert_eq!(checkins, 1);
}

#[test]
fn report_prints_json_and_exports_csv() {
    let env = CliTestEnv::new();
    let db = env.open_db();
    let (window, _) = seed_marge(&db);
    log_activity(&db, "Login", None, window.start + Duration::hours(9));
    log_activity(&db, "Login", None, window.start + Duration::hours(10));
    drop(db);

    command(&env, "update_daily_usage_statistics").assert().success();

    let day = window.day.format("%Y-%m-%d").to_string();
    let export_path = env.home.join("logins.csv");
    let assert = command(&env, "usage_statistics_report")
        .args([
            "--report",
            "logins",
            "--start",
            &day,
            "--end",
            &day,
            "--export",
            export_path.to_str().unwrap(),
        ])
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let rows: serde_json::Value = serde_json::from_str(&stdout).expect("stdout should be JSON");
    assert_eq!(rows[0]["day"], day);
    assert_eq!(rows[0]["total_logins"], 2);
    assert_eq!(rows[0]["unique_user_logins"], 1);

    let csv = fs::read_to_string(&export_path).expect("export file should exist");
    assert!(csv.starts_with("day,total_logins,unique_user_logins,avg_logins_per_user"));
    assert!(csv.contains(&day));
}

#[test]
fn report_rejects_unsupported_export_format() {
    let env = CliTestEnv::new();
    let db = env.open_db();
    let (window, _) = seed_marge(&db);
    log_activity(&db, "Login", None, window.start + Duration::hours(9));
    drop(db);

    command(&env, "update_daily_usage_statistics").assert().success();

    let day = window.day.format("%Y-%m-%d").to_string();
    let export_path = env.home.join("out.tsv");
    command(&env, "usage_statistics_report")
        .args([
            "--report",
            "logins",
            "--start",
            &day,
            "--end",
            &day,
            "--export",
            export_path.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicates::str::contains(
            "Invalid file format, please use either csv or xlsx",
        ));
}
